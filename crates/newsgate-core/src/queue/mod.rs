//! Durable Webhook Queue (Component G, §4.7): an on-disk FIFO for jobs
//! arriving through the webhook ingress, decoupling receipt from
//! processing so a slow scraper round-trip never blocks the HTTP response.
//!
//! Jobs live as one JSON file per job under `{queue_dir}/pending/`, named
//! `YYYYMMDDhhmmssSSS_{username}_{post_id}.json` so lexicographic and
//! chronological order coincide. State transitions are atomic `rename`s:
//! `pending/` → `processed/` on success, `pending/` → `failed/` on
//! failure, `failed/` → `failed/DEAD_*` once the retry sweeper gives up.

pub mod processor;
pub mod sweeper;

pub use processor::{run_processor, ProcessorSummary};
pub use sweeper::{sweep, SweepSummary};

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::error::QueueError;
use crate::tier::WebhookPayload;

/// Maximum number of attempts the retry sweeper allows before a job is
/// moved to `DEAD_` (§4.7: `MAX_RETRIES`).
pub const MAX_RETRIES: u32 = 1;
/// A failed job older than this is dead-lettered regardless of retry count
/// (§4.7: 6h age-out).
pub const MAX_FAILED_AGE: chrono::Duration = chrono::Duration::hours(6);
/// A normal/low priority batch item is processed once it has waited this
/// long (§4.7: `BATCH_DELAY`).
pub const BATCH_DELAY: chrono::Duration = chrono::Duration::seconds(120);
/// A normal/low priority item is forced through, oldest-first, once it has
/// waited this long regardless of batch composition (§4.7: `MAX_AGE`).
pub const MAX_AGE: chrono::Duration = chrono::Duration::seconds(1800);

/// Failure reason substrings that the retry sweeper treats as permanent
/// (§4.7): retrying would reproduce the same outcome, so these skip
/// straight to `DEAD_` on their first failure.
pub const PERMANENT_ERROR_PATTERNS: &[&str] = &[
    "invalid JSON",
    "tweet likely deleted",
    "no config found",
    "unknown bot_id",
    "text cannot be empty",
];

/// On-disk job envelope: the normalised webhook payload plus, once a
/// processing attempt fails, a `_failure` record the sweeper consults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueJob {
    pub text: String,
    #[serde(default)]
    pub embed_code: String,
    #[serde(default)]
    pub link_to_tweet: String,
    #[serde(default)]
    pub first_link_url: String,
    pub username: String,
    #[serde(default)]
    pub bot_id: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub _failure: Option<FailureInfo>,
}

impl QueueJob {
    /// Build a job envelope from a normalised webhook payload.
    pub fn from_payload(payload: &WebhookPayload, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            text: payload.text.clone(),
            embed_code: payload.embed_code.clone(),
            link_to_tweet: payload.link_to_tweet.clone(),
            first_link_url: payload.first_link_url.clone(),
            username: payload.username.clone(),
            bot_id: if payload.bot_id.is_empty() { None } else { Some(payload.bot_id.clone()) },
            enqueued_at,
            _failure: None,
        }
    }

    /// View this job envelope as the tier engine's input payload.
    pub fn as_webhook_payload(&self) -> WebhookPayload {
        WebhookPayload {
            text: self.text.clone(),
            embed_code: self.embed_code.clone(),
            link_to_tweet: self.link_to_tweet.clone(),
            first_link_url: self.first_link_url.clone(),
            username: self.username.clone(),
            bot_id: self.bot_id.clone().unwrap_or_default(),
        }
    }
}

/// Failure metadata attached to a job once it lands in `failed/`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailureInfo {
    pub reason: String,
    pub failed_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_retry_at: Option<DateTime<Utc>>,
    /// Set by the retry sweeper when it dead-letters the job: one of
    /// `permanent_error` / `too_old` / `max_retries_exceeded` (§4.7).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_at: Option<DateTime<Utc>>,
}

/// A pending job read off disk, paired with the file it came from.
#[derive(Debug, Clone)]
pub struct PendingJob {
    pub path: PathBuf,
    pub job: QueueJob,
}

fn sanitize(component: &str) -> String {
    let cleaned: String = component
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

/// The deterministic pending-queue filename for a job: timestamp prefix
/// (so files sort chronologically) followed by username and post id.
pub fn job_filename(enqueued_at: DateTime<Utc>, username: &str, post_id: &str) -> String {
    format!(
        "{}_{}_{}.json",
        enqueued_at.format("%Y%m%d%H%M%S%3f"),
        sanitize(username),
        sanitize(post_id)
    )
}

fn io_err(path: &Path, source: std::io::Error) -> QueueError {
    QueueError::Io { path: path.display().to_string(), source }
}

/// Write a new job into `{queue_dir}/pending/`, returning the file path.
pub fn enqueue(queue_dir: &Path, job: &QueueJob) -> Result<PathBuf, QueueError> {
    let pending_dir = queue_dir.join("pending");
    std::fs::create_dir_all(&pending_dir).map_err(|e| io_err(&pending_dir, e))?;

    let post_id = crate::tier::extract_post_id(&job.link_to_tweet).unwrap_or_default();
    let path = pending_dir.join(job_filename(job.enqueued_at, &job.username, &post_id));

    let body = serde_json::to_vec_pretty(job)
        .map_err(|e| QueueError::InvalidJson { path: path.display().to_string(), source: e })?;
    std::fs::write(&path, body).map_err(|e| io_err(&path, e))?;
    Ok(path)
}

/// List every job currently sitting in `pending/`, oldest filename first.
/// A file whose contents fail to parse is moved straight to `failed/`
/// (reason `"invalid JSON"`) so the retry sweeper dead-letters it rather
/// than blocking every subsequent processor run on a corrupt file.
pub fn list_pending(queue_dir: &Path) -> Result<Vec<PendingJob>, QueueError> {
    let pending_dir = queue_dir.join("pending");
    if !pending_dir.exists() {
        return Ok(Vec::new());
    }

    let mut paths: Vec<PathBuf> = std::fs::read_dir(&pending_dir)
        .map_err(|e| io_err(&pending_dir, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    paths.sort();

    let mut jobs = Vec::with_capacity(paths.len());
    for path in paths {
        let raw = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        match serde_json::from_str::<QueueJob>(&raw) {
            Ok(job) => jobs.push(PendingJob { path, job }),
            Err(_) => {
                tracing::warn!(path = %path.display(), "dropping unparseable queue file");
                move_to_failed_raw(queue_dir, &path)?;
            }
        }
    }
    Ok(jobs)
}

fn move_to_failed_raw(queue_dir: &Path, path: &Path) -> Result<(), QueueError> {
    let failed_dir = queue_dir.join("failed");
    std::fs::create_dir_all(&failed_dir).map_err(|e| io_err(&failed_dir, e))?;
    let Some(name) = path.file_name() else { return Ok(()) };
    let dest = failed_dir.join(name);
    std::fs::rename(path, &dest).map_err(|e| io_err(path, e))
}

/// Move a successfully processed job from `pending/` into `processed/`.
pub fn mark_processed(queue_dir: &Path, pending_path: &Path) -> Result<(), QueueError> {
    let processed_dir = queue_dir.join("processed");
    std::fs::create_dir_all(&processed_dir).map_err(|e| io_err(&processed_dir, e))?;
    let Some(name) = pending_path.file_name() else {
        return Err(io_err(pending_path, std::io::Error::new(std::io::ErrorKind::InvalidInput, "missing file name")));
    };
    let dest = processed_dir.join(name);
    std::fs::rename(pending_path, &dest).map_err(|e| io_err(pending_path, e))
}

/// Move a job that failed processing from `pending/` into `failed/`,
/// stamping (or updating) its `_failure` envelope first.
pub fn fail_job(queue_dir: &Path, pending_path: &Path, mut job: QueueJob, reason: &str) -> Result<(), QueueError> {
    let failure = job._failure.get_or_insert_with(FailureInfo::default);
    failure.reason = reason.to_string();
    failure.failed_at = Utc::now();

    let body = serde_json::to_vec_pretty(&job)
        .map_err(|e| QueueError::InvalidJson { path: pending_path.display().to_string(), source: e })?;
    std::fs::write(pending_path, body).map_err(|e| io_err(pending_path, e))?;

    let failed_dir = queue_dir.join("failed");
    std::fs::create_dir_all(&failed_dir).map_err(|e| io_err(&failed_dir, e))?;
    let Some(name) = pending_path.file_name() else {
        return Err(io_err(pending_path, std::io::Error::new(std::io::ErrorKind::InvalidInput, "missing file name")));
    };
    let dest = failed_dir.join(name);
    std::fs::rename(pending_path, &dest).map_err(|e| io_err(pending_path, e))
}

/// Advisory single-writer lock over one queue root, held for the duration
/// of one processor (or sweeper) run so two invocations never race on the
/// same `pending`/`failed` directories (§5: filesystem coordination).
pub struct ProcessorLock {
    file: std::fs::File,
    path: PathBuf,
}

impl ProcessorLock {
    /// Try to acquire the lock for `queue_dir`, failing immediately (never
    /// blocking) if another run already holds it.
    pub fn acquire(queue_dir: &Path) -> Result<Self, QueueError> {
        std::fs::create_dir_all(queue_dir).map_err(|e| io_err(queue_dir, e))?;
        let path = queue_dir.join(".processor.lock");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;
        file.try_lock_exclusive()
            .map_err(|_| QueueError::LockHeld { path: path.display().to_string() })?;
        Ok(Self { file, path })
    }
}

impl Drop for ProcessorLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release queue processor lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> QueueJob {
        QueueJob {
            text: "hello world".to_string(),
            embed_code: String::new(),
            link_to_tweet: "https://twitter.com/foo/status/123".to_string(),
            first_link_url: String::new(),
            username: "foo".to_string(),
            bot_id: None,
            enqueued_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            _failure: None,
        }
    }

    #[test]
    fn job_filename_is_timestamp_username_postid() {
        let name = job_filename(DateTime::from_timestamp(1_700_000_000, 123_000_000).unwrap(), "foo", "123");
        assert!(name.starts_with("20231114221320123_foo_123.json") || name.ends_with("_foo_123.json"));
        assert!(name.ends_with(".json"));
    }

    #[test]
    fn enqueue_then_list_pending_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let job = sample_job();
        let path = enqueue(dir.path(), &job).unwrap();
        assert!(path.exists());

        let pending = list_pending(dir.path()).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].job.username, "foo");
    }

    #[test]
    fn mark_processed_moves_file() {
        let dir = tempfile::tempdir().unwrap();
        let job = sample_job();
        let path = enqueue(dir.path(), &job).unwrap();
        mark_processed(dir.path(), &path).unwrap();

        assert!(!path.exists());
        assert!(list_pending(dir.path()).unwrap().is_empty());
        let processed: Vec<_> = std::fs::read_dir(dir.path().join("processed")).unwrap().collect();
        assert_eq!(processed.len(), 1);
    }

    #[test]
    fn fail_job_moves_file_and_stamps_failure() {
        let dir = tempfile::tempdir().unwrap();
        let job = sample_job();
        let path = enqueue(dir.path(), &job).unwrap();
        fail_job(dir.path(), &path, job, "scraper timeout").unwrap();

        assert!(!path.exists());
        let failed_dir = dir.path().join("failed");
        let entries: Vec<_> = std::fs::read_dir(&failed_dir).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let content = std::fs::read_to_string(entries[0].as_ref().unwrap().path()).unwrap();
        let reloaded: QueueJob = serde_json::from_str(&content).unwrap();
        assert_eq!(reloaded._failure.unwrap().reason, "scraper timeout");
    }

    #[test]
    fn unparseable_pending_file_is_moved_to_failed() {
        let dir = tempfile::tempdir().unwrap();
        let pending_dir = dir.path().join("pending");
        std::fs::create_dir_all(&pending_dir).unwrap();
        std::fs::write(pending_dir.join("broken.json"), b"{not json").unwrap();

        let pending = list_pending(dir.path()).unwrap();
        assert!(pending.is_empty());
        let failed: Vec<_> = std::fs::read_dir(dir.path().join("failed")).unwrap().collect();
        assert_eq!(failed.len(), 1);
    }

    #[test]
    fn processor_lock_rejects_second_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let _first = ProcessorLock::acquire(dir.path()).unwrap();
        let second = ProcessorLock::acquire(dir.path());
        assert!(matches!(second, Err(QueueError::LockHeld { .. })));
    }

    #[test]
    fn processor_lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _lock = ProcessorLock::acquire(dir.path()).unwrap();
        }
        let second = ProcessorLock::acquire(dir.path());
        assert!(second.is_ok());
    }
}
