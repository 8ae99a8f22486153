use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "issue-forge",
    about = "Turn open GitHub issues into reviewed pull requests with an AI pipeline",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Config file to use instead of searching upward from the current directory
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Poll every configured project until interrupted
    Start,

    /// Process a single issue and exit
    Run {
        /// Issue number (defaults to the oldest open issue)
        #[arg(short, long)]
        issue: Option<u64>,

        /// Project path (defaults to the first configured project)
        #[arg(short, long)]
        project: Option<PathBuf>,
    },

    /// List open issues for every configured project
    Scan,

    /// Write a starter config.yaml in the current directory
    Init,

    /// Show the resolved configuration
    Config {
        /// Emit machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Show which config file is in use
    Status,

    /// Remove the local work branch of an issue
    Cleanup {
        /// Project path (defaults to the first configured project)
        #[arg(short, long)]
        project: Option<PathBuf>,

        /// Issue number whose branch should be removed
        #[arg(short, long)]
        issue: u64,
    },
}
