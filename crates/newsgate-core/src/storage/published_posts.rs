//! Dedupe index: one row per republished post, keyed by `(source_id,
//! post_id)`.

use chrono::{DateTime, Utc};
use sqlx::Row;

use super::DbPool;
use crate::error::StorageError;

/// A row in the `published_posts` dedupe index.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedPost {
    /// Source the post came from.
    pub source_id: String,
    /// Platform-native post id.
    pub post_id: String,
    /// Canonical origin URL.
    pub post_url: String,
    /// The status id created on the target instance.
    pub target_status_id: String,
    /// AT-URI (or equivalent) used for thread-parent lookups.
    pub platform_uri: Option<String>,
    /// When the republish happened.
    pub published_at: DateTime<Utc>,
}

/// Point lookup: has `(source_id, post_id)` already been published?
///
/// Connection errors are mapped to `StorageError` and must be handled by
/// the caller as a transient failure for the current source (§4.1) rather
/// than propagated to the orchestrator loop.
pub async fn is_published(
    pool: &DbPool,
    source_id: &str,
    post_id: &str,
) -> Result<bool, StorageError> {
    let row = sqlx::query("SELECT 1 FROM published_posts WHERE source_id = ? AND post_id = ?")
        .bind(source_id)
        .bind(post_id)
        .fetch_optional(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(row.is_some())
}

/// Idempotent upsert: a second call with the same `(source_id, post_id)`
/// updates the row in place and never raises a constraint violation.
pub async fn mark_published(
    pool: &DbPool,
    source_id: &str,
    post_id: &str,
    post_url: &str,
    target_status_id: &str,
    platform_uri: Option<&str>,
) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO published_posts (source_id, post_id, post_url, target_status_id, platform_uri, published_at)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT (source_id, post_id) DO UPDATE SET
            post_url = excluded.post_url,
            target_status_id = excluded.target_status_id,
            platform_uri = excluded.platform_uri,
            published_at = excluded.published_at",
    )
    .bind(source_id)
    .bind(post_id)
    .bind(post_url)
    .bind(target_status_id)
    .bind(platform_uri)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

fn row_to_published_post(row: sqlx::sqlite::SqliteRow) -> Result<PublishedPost, StorageError> {
    let published_at: String = row
        .try_get("published_at")
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(PublishedPost {
        source_id: row.try_get("source_id").map_err(|e| StorageError::Query { source: e })?,
        post_id: row.try_get("post_id").map_err(|e| StorageError::Query { source: e })?,
        post_url: row.try_get("post_url").map_err(|e| StorageError::Query { source: e })?,
        target_status_id: row
            .try_get("target_status_id")
            .map_err(|e| StorageError::Query { source: e })?,
        platform_uri: row
            .try_get("platform_uri")
            .map_err(|e| StorageError::Query { source: e })?,
        published_at: DateTime::parse_from_rfc3339(&published_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

/// Look up a published row by its platform URI (AT-URI or equivalent),
/// used for thread-parent resolution.
pub async fn find_by_platform_uri(
    pool: &DbPool,
    source_id: &str,
    uri: &str,
) -> Result<Option<PublishedPost>, StorageError> {
    let row = sqlx::query(
        "SELECT source_id, post_id, post_url, target_status_id, platform_uri, published_at
         FROM published_posts WHERE source_id = ? AND platform_uri = ?",
    )
    .bind(source_id)
    .bind(uri)
    .fetch_optional(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    row.map(row_to_published_post).transpose()
}

/// Look up a published row by its platform-native post id.
pub async fn find_by_post_id(
    pool: &DbPool,
    source_id: &str,
    post_id: &str,
) -> Result<Option<PublishedPost>, StorageError> {
    let row = sqlx::query(
        "SELECT source_id, post_id, post_url, target_status_id, platform_uri, published_at
         FROM published_posts WHERE source_id = ? AND post_id = ?",
    )
    .bind(source_id)
    .bind(post_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    row.map(row_to_published_post).transpose()
}

/// Total republished posts, optionally narrowed to one source. Used by the
/// `stats` command.
pub async fn count_total(pool: &DbPool, source_id: Option<&str>) -> Result<i64, StorageError> {
    let row: (i64,) = match source_id {
        Some(id) => sqlx::query_as("SELECT COUNT(*) FROM published_posts WHERE source_id = ?")
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(|e| StorageError::Query { source: e })?,
        None => sqlx::query_as("SELECT COUNT(*) FROM published_posts")
            .fetch_one(pool)
            .await
            .map_err(|e| StorageError::Query { source: e })?,
    };
    Ok(row.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::init_test_db;

    #[tokio::test]
    async fn mark_published_then_is_published() {
        let pool = init_test_db().await.unwrap();
        assert!(!is_published(&pool, "src", "42").await.unwrap());
        mark_published(&pool, "src", "42", "https://x/42", "status1", None)
            .await
            .unwrap();
        assert!(is_published(&pool, "src", "42").await.unwrap());
    }

    #[tokio::test]
    async fn mark_published_is_idempotent_no_panic_on_conflict() {
        let pool = init_test_db().await.unwrap();
        mark_published(&pool, "src", "42", "https://x/42", "status1", Some("at://a/b"))
            .await
            .unwrap();
        // Second call with same key must not raise.
        mark_published(&pool, "src", "42", "https://x/42", "status1", Some("at://a/b"))
            .await
            .unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM published_posts")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }

    #[tokio::test]
    async fn find_by_platform_uri_returns_row() {
        let pool = init_test_db().await.unwrap();
        mark_published(&pool, "src", "42", "https://x/42", "status1", Some("at://a/b"))
            .await
            .unwrap();
        let found = find_by_platform_uri(&pool, "src", "at://a/b").await.unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().target_status_id, "status1");
    }

    #[tokio::test]
    async fn find_by_post_id_missing_returns_none() {
        let pool = init_test_db().await.unwrap();
        assert!(find_by_post_id(&pool, "src", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn count_total_narrows_by_source() {
        let pool = init_test_db().await.unwrap();
        mark_published(&pool, "a", "1", "https://x/1", "s1", None).await.unwrap();
        mark_published(&pool, "a", "2", "https://x/2", "s2", None).await.unwrap();
        mark_published(&pool, "b", "1", "https://y/1", "s3", None).await.unwrap();

        assert_eq!(count_total(&pool, None).await.unwrap(), 3);
        assert_eq!(count_total(&pool, Some("a")).await.unwrap(), 2);
        assert_eq!(count_total(&pool, Some("missing")).await.unwrap(), 0);
    }
}
