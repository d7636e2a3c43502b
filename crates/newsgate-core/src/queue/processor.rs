//! Queue processor (§4.7): drains `pending/`, partitioning by the
//! resolved source's scheduling [`Priority`](crate::config::Priority).
//! `high` sources are processed immediately, one job at a time; `normal`
//! and `low` sources are batched, honouring `BATCH_DELAY`/`MAX_AGE`, with
//! same-`(source, author)` jobs ordered by ascending post id so thread
//! replies resolve against an already-published parent.

use std::path::Path;

use chrono::Utc;

use super::{PendingJob, ProcessorLock};
use crate::adapters::TwitterScraperAdapter;
use crate::config::{Priority, SourceConfig, SourceParams};
use crate::error::{QueueError, StorageError};
use crate::pipeline::{run_post, PipelineOutcome, ThreadCache};
use crate::publisher::Publisher;
use crate::tier::{self, EmbedJsonClient};

/// A processor run aborts on the first state-store failure (mirrors the
/// orchestrator's `StorageError` escalation, §7) but otherwise tallies
/// every job it handled.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("state store error: {0}")]
    Storage(#[from] StorageError),
}

/// Tally of one processor run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessorSummary {
    pub published: usize,
    pub skipped: usize,
    pub failed: usize,
    pub unresolved: usize,
    pub deferred: usize,
}

/// Run one processor pass over `queue_dir`. Acquires the advisory
/// single-writer lock for the duration of the pass.
pub async fn run_processor(
    pool: &crate::storage::DbPool,
    http: &reqwest::Client,
    global: &crate::config::GlobalConfig,
    sources: &[SourceConfig],
    queue_dir: &Path,
) -> Result<ProcessorSummary, ProcessorError> {
    let _lock = ProcessorLock::acquire(queue_dir)?;

    let scraper = TwitterScraperAdapter::new("queue-processor", global.scraper_bridge_url.clone(), http.clone());
    let embed_json = if global.embed_json_url.is_empty() {
        EmbedJsonClient::new(http.clone())
    } else {
        EmbedJsonClient::new(http.clone()).with_base_url(global.embed_json_url.clone())
    };

    let pending = super::list_pending(queue_dir)?;
    let mut summary = ProcessorSummary::default();
    let mut thread_cache = ThreadCache::new();

    let mut high_jobs = Vec::new();
    let mut batch_jobs = Vec::new();

    for pending_job in pending {
        match crate::config::find_source_for_webhook(sources, &pending_job.job.username, pending_job.job.bot_id.as_deref()) {
            Ok(source) => {
                if source.priority == Priority::High {
                    high_jobs.push((pending_job, source.clone()));
                } else {
                    batch_jobs.push((pending_job, source.clone()));
                }
            }
            Err(e) => {
                summary.unresolved += 1;
                super::fail_job(queue_dir, &pending_job.path, pending_job.job, &e.to_string())?;
            }
        }
    }

    for (pending_job, source) in high_jobs {
        process_one(pool, http, global, &scraper, &embed_json, queue_dir, &mut thread_cache, pending_job, &source, &mut summary).await?;
    }

    let batch = select_batch(batch_jobs);
    summary.deferred += batch.deferred;
    for (pending_job, source) in batch.ready {
        process_one(pool, http, global, &scraper, &embed_json, queue_dir, &mut thread_cache, pending_job, &source, &mut summary).await?;
    }

    Ok(summary)
}

struct BatchSelection {
    ready: Vec<(PendingJob, SourceConfig)>,
    deferred: usize,
}

/// Select which batched (normal/low) jobs run this pass, and in what
/// order, per §4.7's batching rule.
fn select_batch(mut jobs: Vec<(PendingJob, SourceConfig)>) -> BatchSelection {
    let now = Utc::now();
    let force_all = jobs
        .iter()
        .any(|(pending, _)| now - pending.job.enqueued_at >= super::MAX_AGE);

    if !force_all {
        let deferred_count = jobs
            .iter()
            .filter(|(pending, _)| now - pending.job.enqueued_at < super::BATCH_DELAY)
            .count();
        jobs.retain(|(pending, _)| now - pending.job.enqueued_at >= super::BATCH_DELAY);
        let ready = group_and_order(jobs);
        return BatchSelection { ready, deferred: deferred_count };
    }

    BatchSelection { ready: group_and_order(jobs), deferred: 0 }
}

/// Group ready jobs by `(source_id, username)`, order each group by
/// ascending post id, and order groups by their earliest job's enqueue
/// time so the overall pass stays roughly oldest-first.
fn group_and_order(jobs: Vec<(PendingJob, SourceConfig)>) -> Vec<(PendingJob, SourceConfig)> {
    use std::collections::BTreeMap;

    let mut groups: BTreeMap<(String, String), Vec<(PendingJob, SourceConfig)>> = BTreeMap::new();
    for (pending, source) in jobs {
        let key = (source.id.clone(), pending.job.username.clone());
        groups.entry(key).or_default().push((pending, source));
    }

    let mut group_list: Vec<Vec<(PendingJob, SourceConfig)>> = groups.into_values().collect();
    for group in &mut group_list {
        group.sort_by(|(a, _), (b, _)| {
            let a_id = tier::extract_post_id(&a.job.link_to_tweet);
            let b_id = tier::extract_post_id(&b.job.link_to_tweet);
            post_id_order(a_id.as_deref(), b_id.as_deref())
        });
    }
    group_list.sort_by_key(|group| group.first().map(|(p, _)| p.job.enqueued_at));

    group_list.into_iter().flatten().collect()
}

fn post_id_order(a: Option<&str>, b: Option<&str>) -> std::cmp::Ordering {
    match (a.and_then(|s| s.parse::<u64>().ok()), b.and_then(|s| s.parse::<u64>().ok())) {
        (Some(a), Some(b)) => a.cmp(&b),
        _ => a.cmp(&b),
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_one(
    pool: &crate::storage::DbPool,
    http: &reqwest::Client,
    global: &crate::config::GlobalConfig,
    scraper: &TwitterScraperAdapter,
    embed_json: &EmbedJsonClient,
    queue_dir: &Path,
    thread_cache: &mut ThreadCache,
    pending_job: PendingJob,
    source: &SourceConfig,
    summary: &mut ProcessorSummary,
) -> Result<(), ProcessorError> {
    let handle = match &source.source_params {
        SourceParams::Twitter(p) => p.handle.as_str(),
        _ => "",
    };
    let payload = tier::normalize_payload(pending_job.job.as_webhook_payload(), handle);
    let post = tier::resolve(
        payload,
        source.processing.scraper_enabled,
        &source.processing.non_terminating_words,
        scraper,
        embed_json,
    )
    .await;

    let publisher = Publisher::new(http.clone(), global.instance.clone(), source.target_account.token.clone());

    match run_post(pool, &publisher, source, &post, thread_cache).await? {
        PipelineOutcome::Published { .. } => {
            summary.published += 1;
            super::mark_processed(queue_dir, &pending_job.path)?;
        }
        PipelineOutcome::Skipped { .. } => {
            summary.skipped += 1;
            super::mark_processed(queue_dir, &pending_job.path)?;
        }
        PipelineOutcome::Failed { reason } => {
            summary.failed += 1;
            super::fail_job(queue_dir, &pending_job.path, pending_job.job, &reason)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SourceParams, TargetAccount, TwitterParams};
    use chrono::DateTime;

    fn pending_job(username: &str, link: &str, secs_ago: i64) -> (PendingJob, SourceConfig) {
        let job = super::super::QueueJob {
            text: "hello".to_string(),
            embed_code: String::new(),
            link_to_tweet: link.to_string(),
            first_link_url: String::new(),
            username: username.to_string(),
            bot_id: None,
            enqueued_at: Utc::now() - chrono::Duration::seconds(secs_ago),
            _failure: None,
        };
        let source = SourceConfig {
            id: format!("src-{username}"),
            enabled: true,
            priority: Priority::Normal,
            source_params: SourceParams::Twitter(TwitterParams { handle: username.to_string() }),
            target_account: TargetAccount::default(),
            formatting: Default::default(),
            filtering: Default::default(),
            processing: Default::default(),
            mentions: Default::default(),
            profile_sync: None,
            scheduling: Default::default(),
        };
        (PendingJob { path: std::path::PathBuf::from("unused"), job }, source)
    }

    #[test]
    fn select_batch_defers_jobs_younger_than_batch_delay() {
        let jobs = vec![pending_job("a", "https://twitter.com/a/status/1", 10)];
        let selection = select_batch(jobs);
        assert_eq!(selection.ready.len(), 0);
        assert_eq!(selection.deferred, 1);
    }

    #[test]
    fn select_batch_admits_jobs_past_batch_delay() {
        let jobs = vec![pending_job("a", "https://twitter.com/a/status/1", 200)];
        let selection = select_batch(jobs);
        assert_eq!(selection.ready.len(), 1);
    }

    #[test]
    fn select_batch_forces_everything_through_once_max_age_exceeded() {
        let jobs = vec![
            pending_job("a", "https://twitter.com/a/status/1", 10),
            pending_job("b", "https://twitter.com/b/status/2", 1900),
        ];
        let selection = select_batch(jobs);
        assert_eq!(selection.ready.len(), 2);
        assert_eq!(selection.deferred, 0);
    }

    #[test]
    fn group_and_order_sorts_same_author_by_post_id_ascending() {
        let (p3, s3) = pending_job("a", "https://twitter.com/a/status/3", 200);
        let (p1, s1) = pending_job("a", "https://twitter.com/a/status/1", 200);
        let (p2, s2) = pending_job("a", "https://twitter.com/a/status/2", 200);
        let ordered = group_and_order(vec![(p3, s3), (p1, s1), (p2, s2)]);
        let ids: Vec<String> = ordered
            .iter()
            .map(|(p, _)| tier::extract_post_id(&p.job.link_to_tweet).unwrap())
            .collect();
        assert_eq!(ids, vec!["1".to_string(), "2".to_string(), "3".to_string()]);
    }
}
