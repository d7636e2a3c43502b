//! Implementation of the `newsgate stats` command: prints per-source
//! scheduling state and aggregate activity counts.

use newsgate_core::config::{GlobalConfig, SourceConfig};
use newsgate_core::storage::{self, activity_log::ActivityAction};

use super::StatsArgs;

/// Execute the `newsgate stats` command.
pub async fn execute(global: GlobalConfig, sources: Vec<SourceConfig>, args: StatsArgs) -> anyhow::Result<()> {
    let pool = storage::init_db(&global.db_path)
        .await
        .map_err(|e| anyhow::anyhow!("database initialization failed: {e}"))?;

    let filtered: Vec<&SourceConfig> = match &args.source {
        Some(id) => sources.iter().filter(|s| &s.id == id).collect(),
        None => sources.iter().collect(),
    };

    eprintln!();
    eprintln!("=== Newsgate Stats ===");
    eprintln!();

    for source in &filtered {
        let state = storage::source_state::get_source_state(&pool, &source.id).await?;
        let published = storage::published_posts::count_total(&pool, Some(&source.id)).await?;
        let errors = storage::activity_log::count_by_action(&pool, &source.id, ActivityAction::Error).await?;

        eprintln!(
            "{:<20} published: {:>5} | error_count: {:>3} (total errors logged: {errors}) | last_check: {}",
            source.id,
            published,
            state.error_count,
            state.last_check.map_or_else(|| "never".to_string(), |t| t.to_rfc3339()),
        );
    }

    eprintln!();
    let total_published = storage::published_posts::count_total(&pool, None).await?;
    let total_skipped = storage::activity_log::count_by_action_total(&pool, ActivityAction::Skip).await?;
    let total_errors = storage::activity_log::count_by_action_total(&pool, ActivityAction::Error).await?;
    eprintln!("Totals: {total_published} published, {total_skipped} skipped, {total_errors} errors");
    eprintln!();

    pool.close().await;
    Ok(())
}
