//! Retry sweeper (§4.7): a scheduled pass over `failed/*.json` that either
//! requeues a job for another attempt or dead-letters it by renaming it
//! with a `DEAD_` prefix.
//!
//! A job is dead-lettered when any of the following holds:
//! - its failure reason matches a [`super::PERMANENT_ERROR_PATTERNS`] entry
//!   (retrying would reproduce the same failure);
//! - it has been sitting in `failed/` longer than [`super::MAX_FAILED_AGE`];
//! - it has already been retried [`super::MAX_RETRIES`] times.
//!
//! Otherwise it is moved back into `pending/` with `_failure.retry_count`
//! incremented, to be picked up by the next processor run.

use std::path::{Path, PathBuf};

use chrono::Utc;

use super::{FailureInfo, QueueJob, MAX_FAILED_AGE, MAX_RETRIES, PERMANENT_ERROR_PATTERNS};
use crate::error::QueueError;

/// Outcome of sweeping a single failed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepOutcome {
    Requeued,
    DeadLettered { reason: &'static str },
}

/// Tally of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub requeued: usize,
    pub dead_lettered: usize,
}

fn io_err(path: &Path, source: std::io::Error) -> QueueError {
    QueueError::Io { path: path.display().to_string(), source }
}

fn is_dead_filename(name: &str) -> bool {
    name.starts_with("DEAD_")
}

/// Sweep every non-dead-lettered file under `{queue_dir}/failed/`.
pub fn sweep(queue_dir: &Path) -> Result<SweepSummary, QueueError> {
    let failed_dir = queue_dir.join("failed");
    if !failed_dir.exists() {
        return Ok(SweepSummary::default());
    }

    let mut paths: Vec<PathBuf> = std::fs::read_dir(&failed_dir)
        .map_err(|e| io_err(&failed_dir, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
        .filter(|p| !p.file_name().and_then(|n| n.to_str()).map(is_dead_filename).unwrap_or(true))
        .collect();
    paths.sort();

    let mut summary = SweepSummary::default();
    for path in paths {
        match sweep_one(queue_dir, &path)? {
            SweepOutcome::Requeued => summary.requeued += 1,
            SweepOutcome::DeadLettered { .. } => summary.dead_lettered += 1,
        }
    }
    Ok(summary)
}

fn sweep_one(queue_dir: &Path, path: &Path) -> Result<SweepOutcome, QueueError> {
    let raw = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;

    let (job, failure) = match serde_json::from_str::<QueueJob>(&raw) {
        Ok(job) => {
            let failure = job._failure.clone().unwrap_or_default();
            (Some(job), failure)
        }
        Err(_) => (None, FailureInfo { reason: "invalid JSON".to_string(), failed_at: Utc::now(), retry_count: 0, last_retry_at: None }),
    };

    if let Some(pattern) = PERMANENT_ERROR_PATTERNS.iter().find(|p| failure.reason.contains(**p)) {
        dead_letter(path, job.clone(), failure.clone(), "permanent_error")?;
        let _ = pattern;
        return Ok(SweepOutcome::DeadLettered { reason: "permanent_error" });
    }

    if Utc::now() - failure.failed_at > MAX_FAILED_AGE {
        dead_letter(path, job.clone(), failure.clone(), "too_old")?;
        return Ok(SweepOutcome::DeadLettered { reason: "too_old" });
    }

    if failure.retry_count >= MAX_RETRIES {
        dead_letter(path, job.clone(), failure.clone(), "max_retries_exceeded")?;
        return Ok(SweepOutcome::DeadLettered { reason: "max_retries_exceeded" });
    }

    let Some(mut job) = job else {
        // Unparseable content with no retry history recorded above counts
        // as a permanent "invalid JSON" failure, handled by the pattern
        // match above; reaching here would mean that branch changed.
        dead_letter(path, None, failure.clone(), "permanent_error")?;
        return Ok(SweepOutcome::DeadLettered { reason: "permanent_error" });
    };

    let mut failure = job._failure.take().unwrap_or_default();
    failure.retry_count += 1;
    failure.last_retry_at = Some(Utc::now());
    job._failure = Some(failure);

    requeue(queue_dir, path, &job)?;
    Ok(SweepOutcome::Requeued)
}

/// Stamp `dead_reason`/`dead_at` into the job's failure envelope (when the
/// job parsed at all) and rename it to `DEAD_<name>` (§4.7).
fn dead_letter(path: &Path, job: Option<QueueJob>, mut failure: FailureInfo, reason: &'static str) -> Result<(), QueueError> {
    if let Some(mut job) = job {
        failure.dead_reason = Some(reason.to_string());
        failure.dead_at = Some(Utc::now());
        job._failure = Some(failure);
        let body = serde_json::to_vec_pretty(&job)
            .map_err(|e| QueueError::InvalidJson { path: path.display().to_string(), source: e })?;
        std::fs::write(path, body).map_err(|e| io_err(path, e))?;
    }

    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return Err(io_err(path, std::io::Error::new(std::io::ErrorKind::InvalidInput, "missing file name")));
    };
    let dest = path.with_file_name(format!("DEAD_{name}"));
    tracing::info!(path = %path.display(), reason, "dead-lettering queue job");
    std::fs::rename(path, &dest).map_err(|e| io_err(path, e))
}

fn requeue(queue_dir: &Path, failed_path: &Path, job: &QueueJob) -> Result<(), QueueError> {
    let body = serde_json::to_vec_pretty(job)
        .map_err(|e| QueueError::InvalidJson { path: failed_path.display().to_string(), source: e })?;
    std::fs::write(failed_path, body).map_err(|e| io_err(failed_path, e))?;

    let pending_dir = queue_dir.join("pending");
    std::fs::create_dir_all(&pending_dir).map_err(|e| io_err(&pending_dir, e))?;
    let Some(name) = failed_path.file_name() else {
        return Err(io_err(failed_path, std::io::Error::new(std::io::ErrorKind::InvalidInput, "missing file name")));
    };
    let dest = pending_dir.join(name);
    tracing::info!(path = %failed_path.display(), "requeuing failed job for retry");
    std::fs::rename(failed_path, &dest).map_err(|e| io_err(failed_path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{enqueue, fail_job};
    use chrono::DateTime;

    fn sample_job() -> QueueJob {
        QueueJob {
            text: "hi".to_string(),
            embed_code: String::new(),
            link_to_tweet: "https://twitter.com/foo/status/1".to_string(),
            first_link_url: String::new(),
            username: "foo".to_string(),
            bot_id: None,
            enqueued_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            _failure: None,
        }
    }

    #[test]
    fn transient_failure_is_requeued_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = enqueue(dir.path(), &sample_job()).unwrap();
        fail_job(dir.path(), &path, sample_job(), "scraper bridge returned HTTP 503").unwrap();

        let summary = sweep(dir.path()).unwrap();
        assert_eq!(summary, SweepSummary { requeued: 1, dead_lettered: 0 });
        assert_eq!(super::super::list_pending(dir.path()).unwrap().len(), 1);
    }

    #[test]
    fn permanent_error_dead_letters_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = enqueue(dir.path(), &sample_job()).unwrap();
        fail_job(dir.path(), &path, sample_job(), "no config found for username 'foo'").unwrap();

        let summary = sweep(dir.path()).unwrap();
        assert_eq!(summary, SweepSummary { requeued: 0, dead_lettered: 1 });
        let failed_dir = dir.path().join("failed");
        let names: Vec<String> = std::fs::read_dir(&failed_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|n| n.starts_with("DEAD_")));
    }

    #[test]
    fn exhausted_retries_dead_letter_on_second_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = enqueue(dir.path(), &sample_job()).unwrap();
        fail_job(dir.path(), &path, sample_job(), "transient network error").unwrap();
        sweep(dir.path()).unwrap(); // requeues, retry_count -> 1

        let pending = super::super::list_pending(dir.path()).unwrap();
        assert_eq!(pending.len(), 1);
        let job = pending[0].job.clone();
        let pending_path = pending[0].path.clone();
        assert_eq!(job._failure.as_ref().unwrap().retry_count, 1);

        fail_job(dir.path(), &pending_path, job, "transient network error again").unwrap();
        let summary = sweep(dir.path()).unwrap();
        assert_eq!(summary, SweepSummary { requeued: 0, dead_lettered: 1 });
    }

    #[test]
    fn dead_letter_stamps_reason_and_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = enqueue(dir.path(), &sample_job()).unwrap();
        fail_job(dir.path(), &path, sample_job(), "no config found for username 'foo'").unwrap();

        sweep(dir.path()).unwrap();

        let failed_dir = dir.path().join("failed");
        let entry = std::fs::read_dir(&failed_dir).unwrap().next().unwrap().unwrap();
        assert!(entry.file_name().to_string_lossy().starts_with("DEAD_"));
        let job: QueueJob = serde_json::from_str(&std::fs::read_to_string(entry.path()).unwrap()).unwrap();
        let failure = job._failure.unwrap();
        assert_eq!(failure.dead_reason.as_deref(), Some("permanent_error"));
        assert!(failure.dead_at.is_some());
    }

    #[test]
    fn too_old_failure_dead_letters() {
        let dir = tempfile::tempdir().unwrap();
        let path = enqueue(dir.path(), &sample_job()).unwrap();
        fail_job(dir.path(), &path, sample_job(), "transient network error").unwrap();

        // Backdate the failure so it exceeds MAX_FAILED_AGE.
        let failed_dir = dir.path().join("failed");
        let entry = std::fs::read_dir(&failed_dir).unwrap().next().unwrap().unwrap();
        let mut job: QueueJob = serde_json::from_str(&std::fs::read_to_string(entry.path()).unwrap()).unwrap();
        job._failure.as_mut().unwrap().failed_at = Utc::now() - chrono::Duration::hours(7);
        std::fs::write(entry.path(), serde_json::to_vec_pretty(&job).unwrap()).unwrap();

        let summary = sweep(dir.path()).unwrap();
        assert_eq!(summary, SweepSummary { requeued: 0, dead_lettered: 1 });
    }
}
