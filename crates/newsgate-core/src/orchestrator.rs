//! The Orchestrator + Scheduler (Component H, §4.1, §5): the pull-path
//! driver. Selects sources due for a check by their configured priority
//! interval, fetches new posts through the matching [`Adapter`], and runs
//! each through the [`pipeline`](crate::pipeline). Twitter sources are
//! excluded from polling — they arrive exclusively through the webhook
//! ingress and the [`queue`](crate::queue) processor.
//!
//! Exactly one worker iterates sources sequentially within a run (§5): no
//! two sources are ever processed concurrently, though the queue
//! processor and retry sweeper may run alongside as separate tasks.

use chrono::{Timelike, Utc};

use crate::adapters::{build_http_client, Adapter, BlueskyAdapter, RssAdapter, YoutubeAdapter};
use crate::config::{GlobalConfig, Priority, SourceConfig, SourceParams};
use crate::error::{AdapterError, StorageError};
use crate::pipeline::{run_post, PipelineOutcome, ThreadCache};
use crate::publisher::Publisher;
use crate::storage::{self, activity_log::ActivityAction, DbPool};

/// Sources pulled per priority tier in one [`run_once`] pass (§4.1's
/// `sources_due_for_check(interval, limit)` contract).
pub const DEFAULT_SOURCE_LIMIT: i64 = 50;
/// Posts fetched per source per pass.
pub const DEFAULT_FETCH_LIMIT: usize = 20;

/// Orchestrates one or more polling passes over a fixed set of sources.
pub struct Orchestrator {
    pool: DbPool,
    http: reqwest::Client,
    global: GlobalConfig,
}

/// Tally of one [`Orchestrator::run_once`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub sources_checked: usize,
    pub posts_published: usize,
    pub posts_skipped: usize,
    pub posts_failed: usize,
    pub sources_errored: usize,
    pub sources_skipped_maintenance: usize,
}

impl Orchestrator {
    /// Build an orchestrator against an already-initialised state store.
    pub fn new(pool: DbPool, global: GlobalConfig) -> Self {
        Self { pool, http: build_http_client("newsgate/0.1"), global }
    }

    /// Run exactly one pass over `sources`: for each priority tier, select
    /// the sources due for a check and process them to completion before
    /// moving to the next tier. A `cancel`-requested shutdown finishes the
    /// source currently in flight and stops before starting another (§5).
    pub async fn run_once(
        &self,
        sources: &[SourceConfig],
        cancel: &tokio_util::sync::CancellationToken,
    ) -> Result<RunSummary, StorageError> {
        let mut summary = RunSummary::default();
        let mut thread_cache = ThreadCache::new();

        for priority in [Priority::High, Priority::Normal, Priority::Low] {
            let candidates: Vec<String> = sources
                .iter()
                .filter(|s| s.enabled && s.priority == priority && pollable(s))
                .map(|s| s.id.clone())
                .collect();
            if candidates.is_empty() {
                continue;
            }

            let due = storage::source_state::sources_due_for_check(
                &self.pool,
                &candidates,
                priority.interval(),
                DEFAULT_SOURCE_LIMIT,
            )
            .await?;

            for source_id in due {
                if cancel.is_cancelled() {
                    tracing::info!("shutdown requested, stopping before next source");
                    return Ok(summary);
                }
                let Some(source) = sources.iter().find(|s| s.id == source_id) else { continue };
                self.process_source(source, &mut thread_cache, &mut summary).await?;
            }
        }

        Ok(summary)
    }

    async fn process_source(
        &self,
        source: &SourceConfig,
        thread_cache: &mut ThreadCache,
        summary: &mut RunSummary,
    ) -> Result<(), StorageError> {
        if in_maintenance_window(source) {
            summary.sources_skipped_maintenance += 1;
            storage::activity_log::log(
                &self.pool,
                Some(&source.id),
                ActivityAction::Skip,
                serde_json::json!({ "reason": "skip_hours" }),
            )
            .await?;
            return Ok(());
        }

        summary.sources_checked += 1;
        let state = storage::source_state::get_source_state(&self.pool, &source.id).await?;

        let adapter_result = build_adapter(source, self.http.clone());
        let adapter = match adapter_result {
            Ok(adapter) => adapter,
            Err(e) => {
                summary.sources_errored += 1;
                storage::source_state::mark_check_error(&self.pool, &source.id, &e.to_string()).await?;
                storage::activity_log::log(
                    &self.pool,
                    Some(&source.id),
                    ActivityAction::Error,
                    serde_json::json!({ "reason": e.to_string() }),
                )
                .await?;
                return Ok(());
            }
        };

        storage::activity_log::log(&self.pool, Some(&source.id), ActivityAction::Fetch, serde_json::json!({})).await?;

        let mut posts = match adapter.fetch(state.last_success, DEFAULT_FETCH_LIMIT).await {
            Ok(posts) => posts,
            Err(AdapterError::Transient { message, .. }) => {
                tracing::warn!(source_id = %source.id, message, "transient fetch error, will retry next pass");
                storage::activity_log::log(
                    &self.pool,
                    Some(&source.id),
                    ActivityAction::TransientError,
                    serde_json::json!({ "reason": message }),
                )
                .await?;
                return Ok(());
            }
            Err(e) => {
                summary.sources_errored += 1;
                storage::source_state::mark_check_error(&self.pool, &source.id, &e.to_string()).await?;
                storage::activity_log::log(
                    &self.pool,
                    Some(&source.id),
                    ActivityAction::Error,
                    serde_json::json!({ "reason": e.to_string() }),
                )
                .await?;
                return Ok(());
            }
        };

        posts.sort_by_key(|p| p.published_at);

        let publisher = Publisher::new(self.http.clone(), self.global.instance.clone(), source.target_account.token.clone());
        let mut any_failed = false;

        for post in &posts {
            match run_post(&self.pool, &publisher, source, post, thread_cache).await? {
                PipelineOutcome::Published { .. } => summary.posts_published += 1,
                PipelineOutcome::Skipped { .. } => summary.posts_skipped += 1,
                PipelineOutcome::Failed { .. } => {
                    summary.posts_failed += 1;
                    any_failed = true;
                }
            }
        }

        if !any_failed {
            storage::source_state::mark_check_success(&self.pool, &source.id, 0).await?;
        }

        Ok(())
    }
}

/// Twitter sources never poll (§4.6: arrival is webhook-only); they are
/// excluded from every `sources_due_for_check` candidate list.
fn pollable(source: &SourceConfig) -> bool {
    !matches!(source.source_params, SourceParams::Twitter(_))
}

fn in_maintenance_window(source: &SourceConfig) -> bool {
    let hour = Utc::now().hour() as u8;
    source.scheduling.skip_hours.contains(&hour)
}

fn build_adapter(source: &SourceConfig, client: reqwest::Client) -> Result<Box<dyn Adapter>, AdapterError> {
    match &source.source_params {
        SourceParams::Rss(p) => Ok(Box::new(RssAdapter::new(source.id.clone(), p.feed_url.clone(), client))),
        SourceParams::Youtube(p) => {
            Ok(Box::new(YoutubeAdapter::new(source.id.clone(), p.channel_id.clone(), p.exclude_shorts, client)?))
        }
        SourceParams::Bluesky(p) => Ok(Box::new(BlueskyAdapter::new(
            source.id.clone(),
            p.actor.clone(),
            p.feed_url.clone(),
            p.creator.clone(),
            p.rkey.clone(),
            p.include_self_replies,
            client,
        ))),
        SourceParams::Twitter(_) => Err(AdapterError::UnsupportedConfig {
            source_id: source.id.clone(),
            message: "twitter sources are never polled by the orchestrator".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        FilteringConfig, FormattingConfig, MentionsConfig, ProcessingConfig, RssParams, SchedulingConfig,
        TargetAccount, TwitterParams,
    };

    fn source_with(params: SourceParams, skip_hours: Vec<u8>) -> SourceConfig {
        SourceConfig {
            id: "src".into(),
            enabled: true,
            priority: Priority::Normal,
            source_params: params,
            target_account: TargetAccount::default(),
            formatting: FormattingConfig::default(),
            filtering: FilteringConfig::default(),
            processing: ProcessingConfig::default(),
            mentions: MentionsConfig::default(),
            profile_sync: None,
            scheduling: SchedulingConfig { skip_hours },
        }
    }

    #[test]
    fn twitter_sources_are_not_pollable() {
        let source = source_with(SourceParams::Twitter(TwitterParams { handle: "foo".into() }), vec![]);
        assert!(!pollable(&source));
    }

    #[test]
    fn rss_sources_are_pollable() {
        let source = source_with(SourceParams::Rss(RssParams::default()), vec![]);
        assert!(pollable(&source));
    }

    #[test]
    fn build_adapter_rejects_twitter() {
        let source = source_with(SourceParams::Twitter(TwitterParams { handle: "foo".into() }), vec![]);
        let err = build_adapter(&source, build_http_client("t")).unwrap_err();
        assert!(matches!(err, AdapterError::UnsupportedConfig { .. }));
    }

    #[test]
    fn maintenance_window_matches_current_hour() {
        let current_hour = Utc::now().hour() as u8;
        let source = source_with(SourceParams::Rss(RssParams::default()), vec![current_hour]);
        assert!(in_maintenance_window(&source));

        let other_hour = (current_hour + 12) % 24;
        let source = source_with(SourceParams::Rss(RssParams::default()), vec![other_hour]);
        assert!(!in_maintenance_window(&source));
    }
}
