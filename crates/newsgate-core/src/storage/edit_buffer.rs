//! Transient edit-detection buffer: `(source_id, post_id) -> (username,
//! text_hash, target_status_id)`, retained for the 2-hour window named in
//! §3 (the pipeline's own edit window, §4.5, is a shorter 1h sub-window of
//! this retention).

use chrono::{DateTime, Utc};
use sqlx::Row;

use super::DbPool;
use crate::error::StorageError;

/// A row in the transient edit buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct EditBufferRow {
    /// Source id.
    pub source_id: String,
    /// Platform-native post id.
    pub post_id: String,
    /// Author username, used for the text-hash lookup key.
    pub username: String,
    /// Normalised text (lower-case, mentions/urls/hashtags stripped).
    pub text_normalized: String,
    /// Hash of `text_normalized`.
    pub text_hash: String,
    /// The status id this post was published as.
    pub target_status_id: String,
    /// When this row was inserted.
    pub created_at: DateTime<Utc>,
}

/// Insert or replace an edit-buffer entry for `(source_id, post_id)`.
pub async fn add_to_edit_buffer(
    pool: &DbPool,
    source_id: &str,
    post_id: &str,
    username: &str,
    text_normalized: &str,
    text_hash: &str,
    target_status_id: &str,
) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO edit_buffer (source_id, post_id, username, text_normalized, text_hash, target_status_id, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT (source_id, post_id) DO UPDATE SET
            username = excluded.username,
            text_normalized = excluded.text_normalized,
            text_hash = excluded.text_hash,
            target_status_id = excluded.target_status_id,
            created_at = excluded.created_at",
    )
    .bind(source_id)
    .bind(post_id)
    .bind(username)
    .bind(text_normalized)
    .bind(text_hash)
    .bind(target_status_id)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Find the most recent buffered entry for `username` with a matching
/// `text_hash`, within `retention` of now.
pub async fn find_by_text_hash(
    pool: &DbPool,
    username: &str,
    text_hash: &str,
    retention: std::time::Duration,
) -> Result<Option<EditBufferRow>, StorageError> {
    let cutoff = (Utc::now() - chrono::Duration::from_std(retention).unwrap_or_default()).to_rfc3339();

    let row = sqlx::query(
        "SELECT source_id, post_id, username, text_normalized, text_hash, target_status_id, created_at
         FROM edit_buffer WHERE username = ? AND text_hash = ? AND created_at >= ?
         ORDER BY created_at DESC LIMIT 1",
    )
    .bind(username)
    .bind(text_hash)
    .bind(&cutoff)
    .fetch_optional(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    row.map(|row| {
        let created_at: String = row.try_get("created_at").map_err(|e| StorageError::Query { source: e })?;
        Ok(EditBufferRow {
            source_id: row.try_get("source_id").map_err(|e| StorageError::Query { source: e })?,
            post_id: row.try_get("post_id").map_err(|e| StorageError::Query { source: e })?,
            username: row.try_get("username").map_err(|e| StorageError::Query { source: e })?,
            text_normalized: row
                .try_get("text_normalized")
                .map_err(|e| StorageError::Query { source: e })?,
            text_hash: row.try_get("text_hash").map_err(|e| StorageError::Query { source: e })?,
            target_status_id: row
                .try_get("target_status_id")
                .map_err(|e| StorageError::Query { source: e })?,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    })
    .transpose()
}

/// Delete edit-buffer rows older than `retention`.
pub async fn cleanup_edit_buffer(
    pool: &DbPool,
    retention: std::time::Duration,
) -> Result<u64, StorageError> {
    let cutoff = (Utc::now() - chrono::Duration::from_std(retention).unwrap_or_default()).to_rfc3339();
    let result = sqlx::query("DELETE FROM edit_buffer WHERE created_at < ?")
        .bind(&cutoff)
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::init_test_db;

    #[tokio::test]
    async fn add_then_find_by_text_hash() {
        let pool = init_test_db().await.unwrap();
        add_to_edit_buffer(&pool, "src", "1", "foo", "hello world", "hash1", "status1")
            .await
            .unwrap();
        let found = find_by_text_hash(&pool, "foo", "hash1", std::time::Duration::from_secs(7200))
            .await
            .unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().target_status_id, "status1");
    }

    #[tokio::test]
    async fn find_by_text_hash_respects_retention() {
        let pool = init_test_db().await.unwrap();
        add_to_edit_buffer(&pool, "src", "1", "foo", "hello world", "hash1", "status1")
            .await
            .unwrap();
        // Retention window of zero should exclude even a just-inserted row.
        let found = find_by_text_hash(&pool, "foo", "hash1", std::time::Duration::from_secs(0))
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn cleanup_removes_expired_rows() {
        let pool = init_test_db().await.unwrap();
        add_to_edit_buffer(&pool, "src", "1", "foo", "hello world", "hash1", "status1")
            .await
            .unwrap();
        let removed = cleanup_edit_buffer(&pool, std::time::Duration::from_secs(0))
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }
}
