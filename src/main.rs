use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use issue_forge::cli::{Cli, Command};
use issue_forge::commands::{self, InitOutcome, Services};
use issue_forge::config::{ForgeConfig, LoggingConfig};
use issue_forge::error;
use issue_forge::host::branch_name;
use issue_forge::logging;
use issue_forge::orchestrator::{self, Orchestrator};

/// First Ctrl-C asks the loop to stop after the current item; a second one
/// exits right away.
fn install_stop_handler() -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_clone = stop.clone();
    ctrlc::set_handler(move || {
        if stop_clone.swap(true, Ordering::Relaxed) {
            eprintln!("forced shutdown");
            std::process::exit(1);
        }
        eprintln!("shutting down after the current issue (Ctrl-C again to force)");
    })
    .context("failed to install Ctrl-C handler")?;
    Ok(stop)
}

fn load_config(cli: &Cli, cwd: &std::path::Path) -> Result<(ForgeConfig, Option<PathBuf>)> {
    let (mut config, path) = match &cli.config {
        Some(path) => (ForgeConfig::load_file(path)?, Some(path.clone())),
        None => ForgeConfig::load(cwd)?,
    };
    config.apply_env(|key| std::env::var(key).ok());
    Ok((config, path))
}

fn quiet_logging(base: LoggingConfig) -> LoggingConfig {
    LoggingConfig {
        level: "warn".to_string(),
        file_enabled: false,
        ..base
    }
}

fn main() {
    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {e:#}");
        std::process::exit(error::exit_status(&e));
    }
}

fn run(cli: Cli) -> Result<()> {
    let cwd = std::env::current_dir().context("failed to get current directory (was it deleted?)")?;

    // A broken config file must not stop `init` from writing a fresh one.
    if matches!(cli.command, Command::Init) {
        logging::init(cli.verbose, &quiet_logging(LoggingConfig::default()))?;
        match commands::init_config(&cwd)? {
            InitOutcome::Created(path) => println!("Created {}", path.display()),
            InitOutcome::AlreadyExists(path) => {
                println!("Config file already exists: {}", path.display())
            }
        }
        return Ok(());
    }

    let (config, config_path) = load_config(&cli, &cwd)?;

    let quiet = matches!(cli.command, Command::Config { .. } | Command::Status);
    let log_config = if quiet {
        quiet_logging(config.logging.clone())
    } else {
        config.logging.clone()
    };
    logging::init(cli.verbose, &log_config)?;

    if !quiet {
        match config_path {
            Some(ref p) => info!("loaded config from {}", p.display()),
            None => info!("no config file found, using defaults"),
        }
    }

    match cli.command {
        Command::Start => {
            config.validate()?;
            let stop = install_stop_handler()?;
            let services = Services::new(config);
            let notifier = services.notifier();
            let processor = services.processor(notifier.clone());
            let mut orchestrator = Orchestrator::new(
                services.orchestrator_config(),
                Box::new(processor),
                notifier,
                services.clock.clone(),
                stop,
            );
            let connected =
                orchestrator.connect_projects(&services.config, |entry| services.connect(entry));
            if connected == 0 {
                anyhow::bail!("no project could be initialized");
            }
            orchestrator.run();
        }
        Command::Run { issue, project } => {
            config.validate()?;
            let services = Services::new(config);
            let entry = orchestrator::pick_project(&services.config.projects, project.as_deref())?;
            let host = services.connect(entry)?;
            let processor = services.processor(services.notifier());
            match orchestrator::run_once(&processor, host.as_ref(), issue)? {
                Some((item, outcome)) => {
                    info!(issue = item.number, "single run finished");
                    println!("{}", commands::describe_outcome(&outcome));
                }
                None => println!("No open issues found."),
            }
        }
        Command::Scan => {
            let services = Services::new(config);
            for entry in &services.config.projects {
                println!("{}", entry.path.display());
                let items = services
                    .connect(entry)
                    .and_then(|host| host.fetch_open_items());
                match items {
                    Ok(items) => print!("{}", commands::render_scan(&items)),
                    Err(e) => {
                        warn!(project = %entry.path.display(), error = %e, "scan failed");
                        println!("  Error: {e}");
                    }
                }
            }
        }
        // Handled before config load.
        Command::Init => {}
        Command::Config { json } => {
            if json {
                println!("{}", commands::render_config_json(&config, config_path.as_deref())?);
            } else {
                print!("{}", commands::render_config_human(&config, config_path.as_deref()));
            }
        }
        Command::Status => println!("{}", commands::render_status(config_path.as_deref())),
        Command::Cleanup { project, issue } => {
            let services = Services::new(config);
            let entry = orchestrator::pick_project(&services.config.projects, project.as_deref())?;
            let host = services.connect(entry)?;
            let branch = branch_name(issue);
            host.cleanup_branch(&branch);
            println!("Cleaned up {branch} in {}", entry.path.display());
        }
    }

    Ok(())
}
