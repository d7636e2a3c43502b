//! Append-only activity log: the durable, queryable counterpart to the
//! structured log lines emitted at the same transitions (§7).

use chrono::Utc;
use serde_json::Value;

use super::DbPool;
use crate::error::StorageError;

/// The kind of activity being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityAction {
    /// A source was fetched.
    Fetch,
    /// A post was published.
    Publish,
    /// A post was skipped.
    Skip,
    /// A fatal error occurred.
    Error,
    /// A transient (non-error-budget) error occurred.
    TransientError,
    /// Media was uploaded.
    MediaUpload,
    /// A profile sync ran (external collaborator; logged here for
    /// completeness of the activity trail only).
    ProfileSync,
}

impl ActivityAction {
    fn as_str(self) -> &'static str {
        match self {
            ActivityAction::Fetch => "fetch",
            ActivityAction::Publish => "publish",
            ActivityAction::Skip => "skip",
            ActivityAction::Error => "error",
            ActivityAction::TransientError => "transient_error",
            ActivityAction::MediaUpload => "media_upload",
            ActivityAction::ProfileSync => "profile_sync",
        }
    }
}

/// Append one row to the activity log.
pub async fn log(
    pool: &DbPool,
    source_id: Option<&str>,
    action: ActivityAction,
    details: Value,
) -> Result<(), StorageError> {
    sqlx::query("INSERT INTO activity_log (source_id, action, details, created_at) VALUES (?, ?, ?, ?)")
        .bind(source_id)
        .bind(action.as_str())
        .bind(details.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Count rows matching `source_id` and `action`, for tests and diagnostics.
pub async fn count_by_action(
    pool: &DbPool,
    source_id: &str,
    action: ActivityAction,
) -> Result<i64, StorageError> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM activity_log WHERE source_id = ? AND action = ?",
    )
    .bind(source_id)
    .bind(action.as_str())
    .fetch_one(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(row.0)
}

/// Count rows matching `action` across every source, for the `stats`
/// command.
pub async fn count_by_action_total(pool: &DbPool, action: ActivityAction) -> Result<i64, StorageError> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM activity_log WHERE action = ?")
        .bind(action.as_str())
        .fetch_one(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(row.0)
}
