//! Configuration types and the global/platform/source merge loader.
//!
//! Layered TOML configuration: `config/global.toml`, `config/platforms/
//! {platform}.toml`, `config/sources/*.toml`, merged in that order (global
//! loses to platform, platform loses to source). `${ENV_VAR}` placeholders
//! in any string value are resolved from the process environment at load
//! time, via [`env::resolve_placeholders`].

mod env;
mod validation;

pub use env::resolve_placeholders;
pub use validation::{validate_source, validate_source_all};

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Scheduling priority. Determines the polling interval (§3): high=5 min,
/// normal=20 min, low=55 min. This is a *scheduling* concern, distinct from
/// the webhook queue's batching priority even though both share the name
/// "priority" in the source document (§9 open question — kept as two
/// independent concerns here, never merged).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Poll every 5 minutes.
    High,
    /// Poll every 20 minutes.
    Normal,
    /// Poll every 55 minutes.
    Low,
}

impl Priority {
    /// The scheduling interval for this priority tier.
    pub fn interval(self) -> std::time::Duration {
        match self {
            Priority::High => std::time::Duration::from_secs(5 * 60),
            Priority::Normal => std::time::Duration::from_secs(20 * 60),
            Priority::Low => std::time::Duration::from_secs(55 * 60),
        }
    }
}

/// How a title-bearing source's text and title are combined by the formatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TitleMode {
    /// Content body only.
    #[default]
    Text,
    /// Title only.
    Title,
    /// `{title}{separator}{content}`.
    Combined,
}

/// Mentions rewriting mode (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MentionsMode {
    /// Leave `@user` verbatim.
    #[default]
    None,
    /// Prepend a URL before the mention.
    Prefix,
    /// Append `(url)` after the mention.
    Suffix,
    /// Rewrite `@user` to `@user@domain`.
    DomainSuffix,
}

/// Length-budget trimming strategy (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrimStrategy {
    /// Prefer the last sentence boundary within a tolerance percentage.
    #[default]
    Smart,
    /// Cut at the last whitespace boundary.
    Word,
    /// Exact cut plus ellipsis.
    Hard,
}

/// Formatting configuration (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormattingConfig {
    /// Source display name used in repost/prefix templates.
    #[serde(default)]
    pub source_name: String,
    /// Localized "reposted" prefix, e.g. "🔁".
    #[serde(default = "default_prefix_repost")]
    pub prefix_repost: String,
    /// Thread-post indicator prefix, e.g. "🧵".
    #[serde(default = "default_thread_indicator")]
    pub thread_indicator: String,
    /// Move the trailing URL to the end of the formatted text.
    #[serde(default = "default_true")]
    pub move_url_to_end: bool,
    /// Title-bearing mode.
    #[serde(default)]
    pub title_mode: TitleMode,
    /// Separator between title and content in `combined` mode.
    #[serde(default = "default_title_separator")]
    pub title_separator: String,
    /// Mentions transformation mode.
    #[serde(default)]
    pub mentions_mode: MentionsMode,
    /// Domain to append in `domain_suffix` mentions mode.
    #[serde(default)]
    pub mentions_domain: String,
    /// Source domains to rewrite to `target_url_domain`.
    #[serde(default)]
    pub rewrite_domains: Vec<String>,
    /// Target host that `rewrite_domains` are rewritten to.
    #[serde(default)]
    pub target_url_domain: String,
    /// Maximum length of the formatted, trimmed text.
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    /// Trimming strategy.
    #[serde(default)]
    pub trim_strategy: TrimStrategy,
    /// Tolerance percentage for the `smart` strategy's sentence-boundary search.
    #[serde(default = "default_smart_tolerance")]
    pub smart_tolerance_pct: u8,
}

impl Default for FormattingConfig {
    fn default() -> Self {
        Self {
            source_name: String::new(),
            prefix_repost: default_prefix_repost(),
            thread_indicator: default_thread_indicator(),
            move_url_to_end: default_true(),
            title_mode: TitleMode::default(),
            title_separator: default_title_separator(),
            mentions_mode: MentionsMode::default(),
            mentions_domain: String::new(),
            rewrite_domains: Vec::new(),
            target_url_domain: String::new(),
            max_length: default_max_length(),
            trim_strategy: TrimStrategy::default(),
            smart_tolerance_pct: default_smart_tolerance(),
        }
    }
}

fn default_prefix_repost() -> String {
    "🔁".to_string()
}
fn default_thread_indicator() -> String {
    "🧵".to_string()
}
fn default_title_separator() -> String {
    ": ".to_string()
}
fn default_true() -> bool {
    true
}
fn default_max_length() -> usize {
    500
}
fn default_smart_tolerance() -> u8 {
    10
}

/// A single filter rule-tree node (§4.5 step 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterRule {
    /// Case-insensitive substring match against a bare literal.
    Literal(String),
    /// Explicit literal/regex/boolean-combinator node.
    Node(FilterNode),
}

/// Explicit filter node variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterNode {
    /// Case-insensitive substring match.
    Literal {
        /// The substring to match.
        pattern: String,
    },
    /// Regex match.
    Regex {
        /// The regex pattern.
        pattern: String,
        /// Regex flags, e.g. `"i"`.
        #[serde(default)]
        flags: String,
    },
    /// All sub-rules must match.
    And {
        /// Sub-rules.
        content: Vec<FilterRule>,
    },
    /// Any sub-rule must match.
    Or {
        /// Sub-rules.
        content: Vec<FilterRule>,
    },
    /// No sub-rule may match.
    Not {
        /// Sub-rules.
        content: Vec<FilterRule>,
    },
}

/// Content filtering configuration (§4.5 step 3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilteringConfig {
    /// Skip posts classified as replies.
    #[serde(default)]
    pub skip_replies: bool,
    /// Skip posts classified as retweets/reposts.
    #[serde(default)]
    pub skip_retweets: bool,
    /// Skip posts classified as quotes.
    #[serde(default)]
    pub skip_quotes: bool,
    /// Rules that, if matched, cause the post to be skipped.
    #[serde(default)]
    pub banned: Vec<FilterRule>,
    /// Rules of which at least one must match (empty ⇒ allow all).
    #[serde(default)]
    pub required: Vec<FilterRule>,
}

/// Ordered text-replacement rule (§4.5 step 5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplacementRule {
    /// Pattern to search for.
    pub pattern: String,
    /// Replacement text.
    pub replacement: String,
    /// Regex flags, e.g. `"i"`.
    #[serde(default)]
    pub flags: String,
    /// Treat `pattern` as a literal substring rather than a regex.
    #[serde(default)]
    pub literal: bool,
}

/// Processing configuration: ordered content replacements plus Twitter
/// tier-engine toggles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Ordered content replacements (§4.5 step 5).
    #[serde(default)]
    pub replacements: Vec<ReplacementRule>,
    /// Enable scraper-backed tier escalation (tiers 2/3.5) for Twitter
    /// sources. When `false`, Twitter sources stay on tier 1.5.
    #[serde(default)]
    pub scraper_enabled: bool,
    /// Non-terminating prepositions/conjunctions for `likely_truncated?`.
    #[serde(default = "default_non_terminators")]
    pub non_terminating_words: Vec<String>,
}

fn default_non_terminators() -> Vec<String> {
    ["a", "an", "the", "and", "or", "but", "of", "to", "with"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Mentions-list entry used for `@mention`-style target notifications
/// (distinct from the formatter's `MentionsMode`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MentionsConfig {
    /// Accounts to mention in the republished post, if any.
    #[serde(default)]
    pub accounts: Vec<String>,
}

/// Optional profile-sync stub — profile sync itself is a non-goal; this
/// records the field so config files that set it validate cleanly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileSyncConfig {
    /// Whether profile sync would be enabled (enforced by an external tool).
    #[serde(default)]
    pub enabled: bool,
}

/// YouTube maintenance-window skip hours, and future scheduling extensions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// Hours-of-day (0-23, UTC) during which this source is skipped entirely.
    #[serde(default)]
    pub skip_hours: Vec<u8>,
}

/// RSS-specific source parameter shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RssParams {
    /// Feed URL.
    #[serde(default)]
    pub feed_url: String,
}

/// YouTube-specific source parameter shape. `channel_id` is mandatory;
/// handle-to-id resolution is explicitly unsupported (§9).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct YoutubeParams {
    /// Explicit `UC…` channel id. Required.
    #[serde(default)]
    pub channel_id: String,
    /// Exclude YouTube Shorts by using the `UULF…`-prefixed uploads playlist.
    #[serde(default)]
    pub exclude_shorts: bool,
}

/// Bluesky-specific source parameter shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlueskyParams {
    /// Author handle/DID for profile-mode fetch.
    #[serde(default)]
    pub actor: String,
    /// Custom feed URL (AT-URI or https), for feed-generator mode.
    #[serde(default)]
    pub feed_url: Option<String>,
    /// `(creator, rkey)` pair identifying a custom feed generator.
    #[serde(default)]
    pub creator: Option<String>,
    /// Feed record key, paired with `creator`.
    #[serde(default)]
    pub rkey: Option<String>,
    /// Include self-replies (threading mode).
    #[serde(default)]
    pub include_self_replies: bool,
}

/// Twitter-specific source parameter shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TwitterParams {
    /// The source account's handle, injected into tier-engine payloads as
    /// `source_handle` so self-reply/RT detection works even for
    /// brand-named webhook triggers.
    #[serde(default)]
    pub handle: String,
}

/// Per-platform adapter parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "platform", rename_all = "lowercase")]
pub enum SourceParams {
    /// RSS/Atom params.
    Rss(RssParams),
    /// YouTube params.
    Youtube(YoutubeParams),
    /// Bluesky params.
    Bluesky(BlueskyParams),
    /// Twitter params.
    Twitter(TwitterParams),
}

/// Target microblog account a source republishes into.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetAccount {
    /// Bearer token, or `${ENV_VAR}` placeholder resolved at load time.
    #[serde(default)]
    pub token: String,
    /// Visibility for published statuses, e.g. `"public"`, `"unlisted"`.
    #[serde(default = "default_visibility")]
    pub visibility: String,
}

fn default_visibility() -> String {
    "public".to_string()
}

/// A fully-merged source configuration (global → platform → source).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Unique source id.
    pub id: String,
    /// Whether this source is active.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Scheduling priority / interval tier.
    #[serde(default = "default_priority")]
    pub priority: Priority,
    /// Per-platform fetch parameters.
    pub source_params: SourceParams,
    /// Target microblog account.
    #[serde(default)]
    pub target_account: TargetAccount,
    /// Formatter configuration.
    #[serde(default)]
    pub formatting: FormattingConfig,
    /// Content filtering configuration.
    #[serde(default)]
    pub filtering: FilteringConfig,
    /// Processing configuration (replacements, tier toggles).
    #[serde(default)]
    pub processing: ProcessingConfig,
    /// Mentions/notification configuration.
    #[serde(default)]
    pub mentions: MentionsConfig,
    /// Profile sync stub.
    #[serde(default)]
    pub profile_sync: Option<ProfileSyncConfig>,
    /// Scheduling window/skip configuration.
    #[serde(default)]
    pub scheduling: SchedulingConfig,
}

fn default_priority() -> Priority {
    Priority::Normal
}

impl SourceConfig {
    /// The source's platform.
    pub fn platform(&self) -> crate::model::Platform {
        match self.source_params {
            SourceParams::Rss(_) => crate::model::Platform::Rss,
            SourceParams::Youtube(_) => crate::model::Platform::Youtube,
            SourceParams::Bluesky(_) => crate::model::Platform::Bluesky,
            SourceParams::Twitter(_) => crate::model::Platform::Twitter,
        }
    }
}

/// Global configuration (`config/global.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Target microblog instance base URL.
    #[serde(default)]
    pub instance: String,
    /// SQLite database path (`~` is expanded at open time).
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Webhook ingress bind port (default 8089).
    #[serde(default = "default_webhook_port")]
    pub webhook_port: u16,
    /// Webhook queue root directory.
    #[serde(default = "default_queue_dir")]
    pub queue_dir: String,
    /// Webhook queue root directory used for `?env=test` requests.
    #[serde(default = "default_queue_dir_test")]
    pub queue_dir_test: String,
    /// Broadcast queue root directory.
    #[serde(default = "default_broadcast_queue_dir")]
    pub broadcast_queue_dir: String,
    /// Base URL of the Twitter scraper bridge used by tiers 2/3.5.
    #[serde(default)]
    pub scraper_bridge_url: String,
    /// Base URL of the embed-JSON syndication endpoint. Empty keeps the
    /// `EmbedJsonClient` default (`cdn.syndication.twimg.com`).
    #[serde(default)]
    pub embed_json_url: String,
    /// Shared secret verifying `X-Hub-Signature` on `/api/mastodon/broadcast`.
    #[serde(default)]
    pub broadcast_secret: String,
    /// Bearer token required on `/api/ifttt/twitter` requests.
    #[serde(default)]
    pub webhook_token: String,
    /// Overridden default formatting, merged under per-source formatting.
    #[serde(default)]
    pub default_formatting: FormattingConfig,
}

fn default_db_path() -> String {
    "~/.newsgate/newsgate.db".to_string()
}
fn default_webhook_port() -> u16 {
    8089
}
fn default_queue_dir() -> String {
    "queue/ifttt/prod".to_string()
}
fn default_queue_dir_test() -> String {
    "queue/ifttt/test".to_string()
}
fn default_broadcast_queue_dir() -> String {
    "queue/broadcast".to_string()
}

/// Load, parse, and env-resolve a single TOML file into `T`.
fn load_toml<T: for<'de> Deserialize<'de> + Default>(
    path: &Path,
    required: bool,
) -> Result<T, ConfigError> {
    if !path.exists() {
        if required {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        return Ok(T::default());
    }
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let resolved = resolve_placeholders(&raw)?;
    toml::from_str(&resolved).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })
}

/// Merge two TOML values, with `override_val` winning on key conflicts and
/// recursing into nested tables.
fn merge_toml(base: toml::Value, over: toml::Value) -> toml::Value {
    match (base, over) {
        (toml::Value::Table(mut base_tbl), toml::Value::Table(over_tbl)) => {
            for (k, v) in over_tbl {
                let merged = match base_tbl.remove(&k) {
                    Some(base_v) => merge_toml(base_v, v),
                    None => v,
                };
                base_tbl.insert(k, merged);
            }
            toml::Value::Table(base_tbl)
        }
        (_, over) => over,
    }
}

/// Load global config, then every per-platform default, then every
/// `config/sources/*.toml` file, merging global → platform → source for
/// each source in turn (§6).
pub fn load_sources(config_root: &Path) -> Result<Vec<SourceConfig>, ConfigError> {
    let global_path = config_root.join("global.toml");
    let global_raw: toml::Value = if global_path.exists() {
        let raw = std::fs::read_to_string(&global_path).map_err(|e| ConfigError::Io {
            path: global_path.display().to_string(),
            source: e,
        })?;
        let resolved = resolve_placeholders(&raw)?;
        toml::from_str(&resolved).map_err(|e| ConfigError::ParseError {
            path: global_path.display().to_string(),
            source: e,
        })?
    } else {
        toml::Value::Table(Default::default())
    };

    let sources_dir = config_root.join("sources");
    let mut sources = Vec::new();
    if !sources_dir.exists() {
        return Ok(sources);
    }

    let mut entries: Vec<_> = std::fs::read_dir(&sources_dir)
        .map_err(|e| ConfigError::Io {
            path: sources_dir.display().to_string(),
            source: e,
        })?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("toml"))
        .collect();
    entries.sort_by_key(|e| e.path());

    for entry in entries {
        let path = entry.path();
        let raw = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let resolved = resolve_placeholders(&raw)?;
        let source_raw: toml::Value = toml::from_str(&resolved).map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            source: e,
        })?;

        let platform_name = source_raw
            .get("source_params")
            .and_then(|p| p.get("platform"))
            .and_then(|p| p.as_str())
            .unwrap_or_default()
            .to_string();

        let platform_path = config_root
            .join("platforms")
            .join(format!("{platform_name}.toml"));
        let platform_raw: toml::Value = if platform_path.exists() {
            let raw = std::fs::read_to_string(&platform_path).map_err(|e| ConfigError::Io {
                path: platform_path.display().to_string(),
                source: e,
            })?;
            let resolved = resolve_placeholders(&raw)?;
            toml::from_str(&resolved).map_err(|e| ConfigError::ParseError {
                path: platform_path.display().to_string(),
                source: e,
            })?
        } else {
            toml::Value::Table(Default::default())
        };

        let merged = merge_toml(merge_toml(global_raw.clone(), platform_raw), source_raw);
        let source: SourceConfig =
            merged
                .try_into()
                .map_err(|e: toml::de::Error| ConfigError::ParseError {
                    path: path.display().to_string(),
                    source: e,
                })?;
        validate_source(&source)?;
        sources.push(source);
    }

    Ok(sources)
}

/// Load the global configuration alone (used by the webhook server/CLI).
pub fn load_global(config_root: &Path) -> Result<GlobalConfig, ConfigError> {
    load_toml(&config_root.join("global.toml"), false)
}

/// Look up a loaded source by the webhook payload's `username` (matched
/// against its Twitter `handle`) or, if given, an explicit `bot_id` matched
/// against the source `id`.
pub fn find_source_for_webhook<'a>(
    sources: &'a [SourceConfig],
    username: &str,
    bot_id: Option<&str>,
) -> Result<&'a SourceConfig, ConfigError> {
    if let Some(bot_id) = bot_id {
        return sources
            .iter()
            .find(|s| s.id == bot_id)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "bot_id".to_string(),
                message: format!("unknown bot_id '{bot_id}'"),
            });
    }
    sources
        .iter()
        .find(|s| match &s.source_params {
            SourceParams::Twitter(p) => p.handle.eq_ignore_ascii_case(username),
            _ => false,
        })
        .ok_or_else(|| ConfigError::InvalidValue {
            field: "username".to_string(),
            message: format!("no config found for username '{username}'"),
        })
}

/// Map of `source_id -> SourceConfig` built once per orchestrator run.
pub type SourceMap = HashMap<String, SourceConfig>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_interval_mapping() {
        assert_eq!(Priority::High.interval().as_secs(), 300);
        assert_eq!(Priority::Normal.interval().as_secs(), 1200);
        assert_eq!(Priority::Low.interval().as_secs(), 3300);
    }

    #[test]
    fn merge_toml_overrides_nested_keys() {
        let base: toml::Value = toml::from_str("a = 1\n[b]\nx = 1\ny = 2").unwrap();
        let over: toml::Value = toml::from_str("[b]\nx = 9").unwrap();
        let merged = merge_toml(base, over);
        assert_eq!(merged.get("a").unwrap().as_integer(), Some(1));
        assert_eq!(merged.get("b").unwrap().get("x").unwrap().as_integer(), Some(9));
        assert_eq!(merged.get("b").unwrap().get("y").unwrap().as_integer(), Some(2));
    }

    #[test]
    fn find_source_for_webhook_matches_by_handle() {
        let source = SourceConfig {
            id: "src1".into(),
            enabled: true,
            priority: Priority::Normal,
            source_params: SourceParams::Twitter(TwitterParams {
                handle: "foo".into(),
            }),
            target_account: TargetAccount::default(),
            formatting: FormattingConfig::default(),
            filtering: FilteringConfig::default(),
            processing: ProcessingConfig::default(),
            mentions: MentionsConfig::default(),
            profile_sync: None,
            scheduling: SchedulingConfig::default(),
        };
        let found = find_source_for_webhook(&[source], "FOO", None).unwrap();
        assert_eq!(found.id, "src1");
    }

    #[test]
    fn find_source_for_webhook_unknown_username_errors() {
        let err = find_source_for_webhook(&[], "nobody", None).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
