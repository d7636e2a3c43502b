//! Per-source scheduling state: last check/success timestamps, daily post
//! counters, and the error budget that backs health escalation.

use chrono::{DateTime, Utc};
use sqlx::Row;

use super::DbPool;
use crate::error::StorageError;

/// A row in `source_state`.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceState {
    /// Source id.
    pub source_id: String,
    /// Last time this source was polled, regardless of outcome.
    pub last_check: Option<DateTime<Utc>>,
    /// Last time this source was polled successfully.
    pub last_success: Option<DateTime<Utc>>,
    /// Posts published today (resets at `last_reset`).
    pub posts_today: i64,
    /// When `posts_today` was last reset.
    pub last_reset: Option<DateTime<Utc>>,
    /// Consecutive non-transient error count.
    pub error_count: i64,
    /// Last error message observed.
    pub last_error: Option<String>,
    /// If set, the scheduler skips this source entirely.
    pub disabled_at: Option<DateTime<Utc>>,
}

fn parse_dt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn row_to_state(row: sqlx::sqlite::SqliteRow) -> Result<SourceState, StorageError> {
    let get = |col: &str| -> Result<Option<String>, StorageError> {
        row.try_get(col).map_err(|e| StorageError::Query { source: e })
    };
    Ok(SourceState {
        source_id: row.try_get("source_id").map_err(|e| StorageError::Query { source: e })?,
        last_check: parse_dt(get("last_check")?),
        last_success: parse_dt(get("last_success")?),
        posts_today: row.try_get("posts_today").map_err(|e| StorageError::Query { source: e })?,
        last_reset: parse_dt(get("last_reset")?),
        error_count: row.try_get("error_count").map_err(|e| StorageError::Query { source: e })?,
        last_error: get("last_error")?,
        disabled_at: parse_dt(get("disabled_at")?),
    })
}

/// Fetch a source's scheduling state, creating a default row if absent.
pub async fn get_source_state(
    pool: &DbPool,
    source_id: &str,
) -> Result<SourceState, StorageError> {
    sqlx::query("INSERT OR IGNORE INTO source_state (source_id) VALUES (?)")
        .bind(source_id)
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    let row = sqlx::query(
        "SELECT source_id, last_check, last_success, posts_today, last_reset, error_count, last_error, disabled_at
         FROM source_state WHERE source_id = ?",
    )
    .bind(source_id)
    .fetch_one(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    row_to_state(row)
}

/// Record a successful check: bumps `last_check`/`last_success`, adds
/// `posts_published` to today's counter, and resets the error count.
pub async fn mark_check_success(
    pool: &DbPool,
    source_id: &str,
    posts_published: i64,
) -> Result<(), StorageError> {
    let now = Utc::now().to_rfc3339();
    sqlx::query("INSERT OR IGNORE INTO source_state (source_id) VALUES (?)")
        .bind(source_id)
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    sqlx::query(
        "UPDATE source_state SET last_check = ?, last_success = ?, posts_today = posts_today + ?, error_count = 0, last_error = NULL
         WHERE source_id = ?",
    )
    .bind(&now)
    .bind(&now)
    .bind(posts_published)
    .bind(source_id)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Record a failed check: bumps `last_check` and `error_count`, stores the
/// message. Does *not* apply to `TransientError` (§7) — callers must not
/// call this for transient failures.
pub async fn mark_check_error(
    pool: &DbPool,
    source_id: &str,
    message: &str,
) -> Result<(), StorageError> {
    let now = Utc::now().to_rfc3339();
    sqlx::query("INSERT OR IGNORE INTO source_state (source_id) VALUES (?)")
        .bind(source_id)
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    sqlx::query(
        "UPDATE source_state SET last_check = ?, error_count = error_count + 1, last_error = ?
         WHERE source_id = ?",
    )
    .bind(&now)
    .bind(message)
    .bind(source_id)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Sources whose `last_check` is older than `interval` (or never checked)
/// and not disabled, ordered by staleness (oldest first), capped at
/// `limit`.
pub async fn sources_due_for_check(
    pool: &DbPool,
    candidate_ids: &[String],
    interval: std::time::Duration,
    limit: i64,
) -> Result<Vec<String>, StorageError> {
    let cutoff = (Utc::now() - chrono::Duration::from_std(interval).unwrap_or_default()).to_rfc3339();

    let mut due = Vec::new();
    for source_id in candidate_ids {
        let state = get_source_state(pool, source_id).await?;
        if state.disabled_at.is_some() {
            continue;
        }
        let is_due = match &state.last_check {
            None => true,
            Some(last) => last.to_rfc3339() < cutoff,
        };
        if is_due {
            due.push((source_id.clone(), state.last_check));
        }
    }

    due.sort_by_key(|(_, last_check)| *last_check);
    Ok(due.into_iter().take(limit as usize).map(|(id, _)| id).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::init_test_db;

    #[tokio::test]
    async fn get_source_state_creates_default_row() {
        let pool = init_test_db().await.unwrap();
        let state = get_source_state(&pool, "src1").await.unwrap();
        assert_eq!(state.source_id, "src1");
        assert_eq!(state.posts_today, 0);
        assert_eq!(state.error_count, 0);
        assert!(state.disabled_at.is_none());
    }

    #[tokio::test]
    async fn mark_check_success_resets_error_count() {
        let pool = init_test_db().await.unwrap();
        mark_check_error(&pool, "src1", "boom").await.unwrap();
        mark_check_error(&pool, "src1", "boom again").await.unwrap();
        let state = get_source_state(&pool, "src1").await.unwrap();
        assert_eq!(state.error_count, 2);

        mark_check_success(&pool, "src1", 3).await.unwrap();
        let state = get_source_state(&pool, "src1").await.unwrap();
        assert_eq!(state.error_count, 0);
        assert_eq!(state.posts_today, 3);
        assert!(state.last_error.is_none());
    }

    #[tokio::test]
    async fn sources_due_for_check_skips_disabled() {
        let pool = init_test_db().await.unwrap();
        get_source_state(&pool, "src1").await.unwrap();
        get_source_state(&pool, "src2").await.unwrap();
        sqlx::query("UPDATE source_state SET disabled_at = ? WHERE source_id = 'src2'")
            .bind(Utc::now().to_rfc3339())
            .execute(&pool)
            .await
            .unwrap();

        let due = sources_due_for_check(
            &pool,
            &["src1".to_string(), "src2".to_string()],
            std::time::Duration::from_secs(300),
            10,
        )
        .await
        .unwrap();
        assert_eq!(due, vec!["src1".to_string()]);
    }
}
