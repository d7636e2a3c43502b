//! Newsgate CLI - news-aggregation republishing gateway.
//!
//! Entry point for the `newsgate` binary. Parses CLI arguments,
//! initializes logging, loads configuration, and dispatches to
//! subcommand handlers.
mod commands;

use clap::Parser;
use newsgate_core::config;
use tracing_subscriber::EnvFilter;

/// News-aggregation republishing gateway
#[derive(Parser)]
#[command(name = "newsgate")]
#[command(version)]
#[command(about = "News-aggregation republishing gateway")]
#[command(after_help = "\
Quick start:
  1. Populate config/global.toml and config/sources/*.toml under --config
  2. newsgate config test   — validate configuration
  3. newsgate run           — start the agent")]
struct Cli {
    /// Path to the configuration root (containing global.toml, sources/, platforms/)
    #[arg(short = 'c', long, global = true, default_value = "~/.newsgate/config")]
    config: String,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Start the orchestrator loop, queue processor, and retry sweeper
    Run(commands::RunArgs),
    /// Run a single orchestrator pass over every configured source
    Once(commands::OnceArgs),
    /// Drain or sweep the webhook queue
    Queue(commands::QueueArgs),
    /// Validate configuration
    Config(commands::ConfigArgs),
    /// Show per-source and aggregate stats
    Stats(commands::StatsArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing-subscriber.
    //
    // Priority: RUST_LOG env var > --verbose/--quiet flags > default (warn).
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("newsgate=debug,newsgate_core=debug,info")
    } else if cli.quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::new("newsgate=info,newsgate_core=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(cli.verbose)
        .compact()
        .init();

    let config_root = std::path::PathBuf::from(newsgate_core::storage::expand_tilde(&cli.config));

    let global = config::load_global(&config_root).map_err(|e| {
        anyhow::anyhow!("failed to load global config: {e}\nHint: check {}/global.toml", config_root.display())
    })?;
    let sources = config::load_sources(&config_root).map_err(|e| anyhow::anyhow!("failed to load sources: {e}"))?;

    match cli.command {
        Commands::Run(args) => {
            commands::run::execute(global, sources, args).await?;
        }
        Commands::Once(args) => {
            commands::once::execute(global, sources, args).await?;
        }
        Commands::Queue(args) => {
            commands::queue::execute(global, sources, args).await?;
        }
        Commands::Config(args) => {
            let passed = commands::config_test::execute(&global, &sources, args).await?;
            if !passed {
                std::process::exit(1);
            }
        }
        Commands::Stats(args) => {
            commands::stats::execute(global, sources, args).await?;
        }
    }

    Ok(())
}
