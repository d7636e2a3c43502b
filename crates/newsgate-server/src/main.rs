//! Newsgate webhook ingress server binary.
//!
//! Serves the HTTP ingress for `/api/ifttt/twitter` and
//! `/api/mastodon/broadcast`, and runs the queue processor and retry
//! sweeper loops alongside it so a single process is a complete standalone
//! daemon (§4.7).

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use newsgate_core::automation::{scheduler_from_config, Runtime};
use newsgate_core::config;
use newsgate_core::queue::{processor, sweeper};
use newsgate_core::storage;
use newsgate_server::state::AppState;
use tracing_subscriber::EnvFilter;

/// Newsgate webhook ingress server.
#[derive(Parser)]
#[command(name = "newsgate-server", version, about)]
struct Cli {
    /// Path to the newsgate configuration directory.
    #[arg(long, default_value = "~/.newsgate/config")]
    config: String,

    /// Host address to bind to. Use 0.0.0.0 for LAN access.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on. Defaults to the configured `webhook_port`.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config_root = std::path::PathBuf::from(storage::expand_tilde(&cli.config));

    let global = config::load_global(&config_root)
        .map_err(|e| anyhow::anyhow!("failed to load global config: {e}"))?;
    let sources = config::load_sources(&config_root)
        .map_err(|e| anyhow::anyhow!("failed to load sources: {e}"))?;

    let pool = storage::init_db(&global.db_path).await?;
    let bind_port = cli.port.unwrap_or(global.webhook_port);

    let queue_dir = std::path::PathBuf::from(storage::expand_tilde(&global.queue_dir));
    let queue_dir_test = std::path::PathBuf::from(storage::expand_tilde(&global.queue_dir_test));
    let broadcast_queue_dir = std::path::PathBuf::from(storage::expand_tilde(&global.broadcast_queue_dir));

    if cli.host == "0.0.0.0" {
        tracing::warn!("binding to 0.0.0.0 — webhook ingress reachable from the LAN");
    }

    let state = Arc::new(AppState {
        db: pool.clone(),
        global: global.clone(),
        sources: sources.clone(),
        queue_dir: queue_dir.clone(),
        queue_dir_test,
        broadcast_queue_dir,
    });

    let router = newsgate_server::build_router(state);

    let mut runtime = Runtime::new();

    {
        let cancel = runtime.cancel_token();
        let bind_host = cli.host.clone();
        runtime.spawn("http-ingress", async move {
            let listener = match tokio::net::TcpListener::bind(format!("{bind_host}:{bind_port}")).await {
                Ok(l) => l,
                Err(e) => {
                    tracing::error!(error = %e, "failed to bind webhook ingress server");
                    return;
                }
            };
            tracing::info!(host = %bind_host, port = bind_port, "listening for webhook requests");
            let serve = axum::serve(listener, router);
            if let Err(e) = serve.with_graceful_shutdown(async move { cancel.cancelled().await }).await {
                tracing::error!(error = %e, "webhook ingress server exited with error");
            }
        });
    }

    {
        let pool = pool.clone();
        let global = global.clone();
        let sources = sources.clone();
        let queue_dir = queue_dir.clone();
        let cancel = runtime.cancel_token();
        runtime.spawn("queue-processor", async move {
            let client = reqwest::Client::new();
            let scheduler = scheduler_from_config(60, 0, 5);
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                match processor::run_processor(&pool, &client, &global, &sources, &queue_dir).await {
                    Ok(summary) => tracing::info!(?summary, "queue processor pass complete"),
                    Err(e) => tracing::warn!(error = %e, "queue processor pass failed"),
                }
                tokio::select! {
                    () = scheduler.tick() => {}
                    () = cancel.cancelled() => break,
                }
            }
        });
    }

    {
        let cancel = runtime.cancel_token();
        runtime.spawn("retry-sweeper", async move {
            let scheduler = scheduler_from_config(300, 0, 30);
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                match sweeper::sweep(Path::new(&queue_dir)) {
                    Ok(summary) => {
                        if summary.requeued > 0 || summary.dead_lettered > 0 {
                            tracing::info!(?summary, "retry sweep complete");
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "retry sweep failed"),
                }
                tokio::select! {
                    () = scheduler.tick() => {}
                    () = cancel.cancelled() => break,
                }
            }
        });
    }

    tracing::info!(tasks = runtime.task_count(), "newsgate server running");
    runtime.run_until_shutdown().await;

    pool.close().await;
    Ok(())
}
