//! Error types for the newsgate core library.
//!
//! Each module has its own error enum to provide clear error boundaries, per
//! the error taxonomy in the spec: `thiserror`-derived enums, one per concern,
//! with `#[error("...")]` messages checked by exact `.to_string()` assertions.

/// Errors related to configuration loading, parsing, and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required configuration field is absent.
    #[error("missing required config field: {field}")]
    MissingField {
        /// The name of the missing field.
        field: String,
    },

    /// A configuration field has an unacceptable value.
    #[error("invalid value for config field '{field}': {message}")]
    InvalidValue {
        /// The name of the invalid field.
        field: String,
        /// A description of why the value is invalid.
        message: String,
    },

    /// The configuration file does not exist at the specified path.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// The path that was searched.
        path: String,
    },

    /// A `${ENV_VAR}` placeholder referenced a variable that isn't set.
    #[error("environment variable '{var}' referenced in config is not set")]
    MissingEnvVar {
        /// The name of the missing environment variable.
        var: String,
    },

    /// TOML deserialization failed.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// The path of the file that failed to parse.
        path: String,
        /// The underlying TOML parse error.
        #[source]
        source: toml::de::Error,
    },

    /// Filesystem I/O failed while loading config.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// The path that could not be read.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors surfaced by adapters (Component B) while fetching or parsing.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// The upstream is in a known maintenance/degraded window; does not count
    /// against the source's error budget.
    #[error("transient upstream failure for source {source_id}: {message}")]
    Transient {
        /// The source that failed.
        source_id: String,
        /// Details of the failure.
        message: String,
    },

    /// An HTTP request to the upstream failed.
    #[error("network error fetching source {source_id}: {source}")]
    Network {
        /// The source that failed.
        source_id: String,
        /// The underlying HTTP client error.
        #[source]
        source: reqwest::Error,
    },

    /// Too many redirects, or a redirect loop, while following a feed URL.
    #[error("redirect loop or excess redirects fetching {url}")]
    TooManyRedirects {
        /// The URL being fetched.
        url: String,
    },

    /// The upstream response could not be parsed into posts.
    #[error("failed to parse response from source {source_id}: {message}")]
    ParseFailure {
        /// The source that failed to parse.
        source_id: String,
        /// Details of the parse failure.
        message: String,
    },

    /// The source configuration relies on a deprecated/broken resolution
    /// path (e.g. YouTube handle-to-channel-id resolution) that adapters
    /// must reject rather than attempt to scrape around.
    #[error("source {source_id} relies on unsupported resolution: {message}")]
    UnsupportedConfig {
        /// The source that is misconfigured.
        source_id: String,
        /// Details of the unsupported configuration.
        message: String,
    },
}

/// Errors surfaced by the Publisher (Component D).
#[derive(Debug, thiserror::Error)]
pub enum PublisherError {
    /// Target API returned 404 on an update/delete.
    #[error("status not found: {status_id}")]
    StatusNotFound {
        /// The status id that was not found.
        status_id: String,
    },

    /// Target API returned 403 on an edit attempt.
    #[error("edit not allowed for status {status_id}")]
    EditNotAllowed {
        /// The status id that could not be edited.
        status_id: String,
    },

    /// Target API returned 422 (e.g. empty text, media count exceeded).
    #[error("validation error: {message}")]
    ValidationError {
        /// Details of the validation failure.
        message: String,
    },

    /// Target API returned 429; retry budget exhausted.
    #[error("rate limited by target API, retry budget exhausted")]
    RateLimitExhausted,

    /// Target API returned 5xx; retry budget exhausted.
    #[error("target API server error, retry budget exhausted: {message}")]
    ServerErrorExhausted {
        /// The last error message observed.
        message: String,
    },

    /// Network-level failure communicating with the target API.
    #[error("network error talking to target API: {source}")]
    Network {
        /// The underlying HTTP client error.
        #[source]
        source: reqwest::Error,
    },

    /// Media item exceeded the 10 MiB cap or the 4-item attachment limit.
    #[error("media rejected at upload: {message}")]
    MediaRejected {
        /// Details of why the media was rejected.
        message: String,
    },

    /// Async media processing did not reach `200` within the polling budget.
    #[error("media {media_id} did not finish processing after {attempts} attempts")]
    MediaProcessingTimeout {
        /// The media id being polled.
        media_id: String,
        /// Number of poll attempts made.
        attempts: u32,
    },
}

/// Errors surfaced by the state store (Component A).
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Failed to connect to SQLite database.
    #[error("database connection error: {source}")]
    Connection {
        /// The underlying SQLx error.
        #[source]
        source: sqlx::Error,
    },

    /// Database migration failed.
    #[error("database migration error: {source}")]
    Migration {
        /// The underlying migration error.
        #[source]
        source: sqlx::migrate::MigrateError,
    },

    /// A database query failed.
    #[error("database query error: {source}")]
    Query {
        /// The underlying SQLx error.
        #[source]
        source: sqlx::Error,
    },
}

/// Errors surfaced by the durable webhook queue (Component G).
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The queue root directory could not be created or written to.
    #[error("queue I/O error at {path}: {source}")]
    Io {
        /// The path involved.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A queue job file contained malformed JSON.
    #[error("invalid JSON in queue file {path}: {source}")]
    InvalidJson {
        /// The path of the malformed file.
        path: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// No source configuration matched the job's `username`/`bot_id`.
    #[error("no config found for username '{username}'")]
    NoConfigFound {
        /// The username the job was addressed to.
        username: String,
    },

    /// An explicit `bot_id` was given but does not match any configured source.
    #[error("unknown bot_id '{bot_id}'")]
    UnknownBotId {
        /// The unrecognised bot id.
        bot_id: String,
    },

    /// The advisory single-writer lock is already held by another processor run.
    #[error("queue processor lock already held at {path}")]
    LockHeld {
        /// The sentinel lock file path.
        path: String,
    },
}
