//! CLI subcommand argument definitions and implementations for newsgate.
//!
//! Each subcommand struct defines its flags and arguments matching the
//! CLI interface contract.
pub mod config_test;
pub mod once;
pub mod queue;
pub mod run;
pub mod stats;

use clap::Args;

/// Arguments for the `run` subcommand.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Queue processor/retry-sweeper tick interval, in seconds.
    #[arg(long, default_value = "60")]
    pub queue_interval: u64,
}

/// Arguments for the `once` subcommand.
#[derive(Debug, Args)]
pub struct OnceArgs;

/// Arguments for the `queue process` / `queue sweep` subcommands.
#[derive(Debug, Args)]
pub struct QueueArgs {
    #[command(subcommand)]
    pub action: QueueAction,
}

#[derive(Debug, clap::Subcommand)]
pub enum QueueAction {
    /// Drain pending webhook jobs through the tier engine and pipeline.
    Process,
    /// Sweep `failed/` jobs: requeue transient failures, dead-letter the rest.
    Sweep,
}

/// Arguments for the `config test` subcommand.
#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Debug, clap::Subcommand)]
pub enum ConfigAction {
    /// Validate every loaded source and the global config.
    Test,
}

/// Arguments for the `stats` subcommand.
#[derive(Debug, Args)]
pub struct StatsArgs {
    /// Narrow to a single source id.
    #[arg(long)]
    pub source: Option<String>,
}
