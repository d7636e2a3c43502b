//! Implementation of the `newsgate run` command.
//!
//! The main entry point for continuous operation: loads configuration,
//! opens the state store, and spawns the orchestrator loop alongside the
//! queue processor and retry sweeper, running until a shutdown signal is
//! received.

use std::path::Path;
use std::time::Duration;

use newsgate_core::automation::{scheduler_from_config, Runtime};
use newsgate_core::config::{GlobalConfig, SourceConfig};
use newsgate_core::orchestrator::Orchestrator;
use newsgate_core::queue::{processor, sweeper};

use super::RunArgs;

/// Execute the `newsgate run` command.
pub async fn execute(global: GlobalConfig, sources: Vec<SourceConfig>, args: RunArgs) -> anyhow::Result<()> {
    let pool = newsgate_core::storage::init_db(&global.db_path)
        .await
        .map_err(|e| anyhow::anyhow!("database initialization failed: {e}"))?;
    tracing::info!(sources = sources.len(), "configuration loaded");

    let mut runtime = Runtime::new();

    // Orchestrator loop: priority-interval polling of pullable sources.
    {
        let orchestrator = Orchestrator::new(pool.clone(), global.clone());
        let cancel = runtime.cancel_token();
        let sources = sources.clone();
        runtime.spawn("orchestrator", async move {
            let scheduler = scheduler_from_config(60, 0, 5);
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                match orchestrator.run_once(&sources, &cancel).await {
                    Ok(summary) => tracing::info!(?summary, "orchestrator pass complete"),
                    Err(e) => tracing::error!(error = %e, "orchestrator pass failed"),
                }
                tokio::select! {
                    () = scheduler.tick() => {}
                    () = cancel.cancelled() => break,
                }
            }
        });
    }

    // Queue processor: drains the webhook queue on a short, jittered tick.
    {
        let pool = pool.clone();
        let global = global.clone();
        let sources = sources.clone();
        let queue_dir = newsgate_core::storage::expand_tilde(&global.queue_dir);
        let cancel = runtime.cancel_token();
        let interval = args.queue_interval;
        runtime.spawn("queue-processor", async move {
            let client = reqwest::Client::new();
            let scheduler = scheduler_from_config(interval, 0, 5);
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                match processor::run_processor(&pool, &client, &global, &sources, Path::new(&queue_dir)).await {
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

    // Retry sweeper: requeues transient failures, dead-letters the rest.
    {
        let global = global.clone();
        let queue_dir = newsgate_core::storage::expand_tilde(&global.queue_dir);
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

    tracing::info!(tasks = runtime.task_count(), "all automation tasks spawned, running until shutdown");
    runtime.run_until_shutdown().await;

    pool.close().await;
    tracing::info!("shutdown complete");
    Ok(())
}
