//! Shared application state for the newsgate webhook ingress server.

use std::path::PathBuf;

use newsgate_core::config::{GlobalConfig, SourceConfig};
use newsgate_core::storage::DbPool;

/// Shared application state accessible by all route handlers.
pub struct AppState {
    /// SQLite connection pool.
    pub db: DbPool,
    /// Global configuration (instance URL, queue directories, secrets).
    pub global: GlobalConfig,
    /// Loaded source configurations, used only to normalise the Twitter
    /// handle on enqueue; the queue processor re-resolves the source
    /// authoritatively.
    pub sources: Vec<SourceConfig>,
    /// Production queue root (`{queue_dir}/pending`, `/processed`, `/failed`).
    pub queue_dir: PathBuf,
    /// Queue root used for `?env=test` requests.
    pub queue_dir_test: PathBuf,
    /// Broadcast queue root (`/api/mastodon/broadcast`).
    pub broadcast_queue_dir: PathBuf,
}
