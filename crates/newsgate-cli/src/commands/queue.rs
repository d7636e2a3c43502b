//! Implementation of the `newsgate queue process` / `newsgate queue sweep`
//! commands: one-shot runs of the webhook queue processor and retry
//! sweeper, for cron-driven deployments that don't run `newsgate run`.

use std::path::Path;

use newsgate_core::config::{GlobalConfig, SourceConfig};
use newsgate_core::queue::{processor, sweeper};

use super::{QueueAction, QueueArgs};

/// Execute the `newsgate queue` command.
pub async fn execute(global: GlobalConfig, sources: Vec<SourceConfig>, args: QueueArgs) -> anyhow::Result<()> {
    let queue_dir = newsgate_core::storage::expand_tilde(&global.queue_dir);

    match args.action {
        QueueAction::Process => {
            let pool = newsgate_core::storage::init_db(&global.db_path)
                .await
                .map_err(|e| anyhow::anyhow!("database initialization failed: {e}"))?;
            let client = reqwest::Client::new();

            let summary = processor::run_processor(&pool, &client, &global, &sources, Path::new(&queue_dir)).await?;
            eprintln!(
                "processed queue: {} published, {} skipped, {} failed, {} unresolved, {} deferred",
                summary.published, summary.skipped, summary.failed, summary.unresolved, summary.deferred,
            );
            pool.close().await;
        }
        QueueAction::Sweep => {
            let summary = sweeper::sweep(Path::new(&queue_dir))?;
            eprintln!("swept failed queue: {} requeued, {} dead-lettered", summary.requeued, summary.dead_lettered);
        }
    }

    Ok(())
}
