pub mod audit;
pub mod cli;
pub mod clock;
pub mod commands;
pub mod config;
pub mod error;
pub mod github;
pub mod host;
pub mod logging;
pub mod notify;
pub mod orchestrator;
pub mod pipeline;
pub mod process;
pub mod processor;
pub mod retry;
pub mod schedule;
pub mod workspace;
