//! Implementation of the `newsgate once` command: a single orchestrator
//! pass over every configured source, useful for cron-driven deployments
//! or manual debugging.

use newsgate_core::config::{GlobalConfig, SourceConfig};
use newsgate_core::orchestrator::Orchestrator;

use super::OnceArgs;

/// Execute the `newsgate once` command.
pub async fn execute(global: GlobalConfig, sources: Vec<SourceConfig>, _args: OnceArgs) -> anyhow::Result<()> {
    let pool = newsgate_core::storage::init_db(&global.db_path)
        .await
        .map_err(|e| anyhow::anyhow!("database initialization failed: {e}"))?;

    let orchestrator = Orchestrator::new(pool.clone(), global);
    let cancel = tokio_util::sync::CancellationToken::new();
    let summary = orchestrator.run_once(&sources, &cancel).await?;

    eprintln!(
        "checked {} source(s): {} published, {} skipped, {} failed, {} errored, {} in maintenance window",
        summary.sources_checked,
        summary.posts_published,
        summary.posts_skipped,
        summary.posts_failed,
        summary.sources_errored,
        summary.sources_skipped_maintenance,
    );

    pool.close().await;
    Ok(())
}
