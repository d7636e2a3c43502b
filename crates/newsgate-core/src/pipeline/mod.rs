//! The Post Pipeline (Component E, §4.5): the single ordered stage machine
//! both the orchestrator (pull path) and the webhook queue (push path)
//! drive a [`Post`] through. Each stage is a free function so it can be
//! exercised in isolation; [`run_post`] wires them into the sequence and
//! owns the state-store side effects.

mod filter;
mod urls;

pub use filter::evaluate_rule;
pub use urls::process_urls;

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::config::{ReplacementRule, SourceConfig};
use crate::error::{PublisherError, StorageError};
use crate::formatter::{format_post, trim_to_length};
use crate::model::{Platform, Post};
use crate::publisher::{media_sources_for, MediaSource, Publisher};
use crate::storage::{self, activity_log::ActivityAction, DbPool};

/// The edit-detection sub-window (§4.5 step 2): a 1h slice of the edit
/// buffer's 2h retention.
const EDIT_WINDOW: std::time::Duration = std::time::Duration::from_secs(3600);

/// A named stage in the pipeline, used only for tracing/observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Dedup,
    EditDetection,
    ContentFiltering,
    Format,
    Replacements,
    Trim,
    UrlProcessing,
    MediaUpload,
    Publish,
    MarkPublished,
    EditBufferInsert,
}

impl PipelineStage {
    fn as_str(self) -> &'static str {
        match self {
            PipelineStage::Dedup => "dedup",
            PipelineStage::EditDetection => "edit_detection",
            PipelineStage::ContentFiltering => "content_filtering",
            PipelineStage::Format => "format",
            PipelineStage::Replacements => "replacements",
            PipelineStage::Trim => "trim",
            PipelineStage::UrlProcessing => "url_processing",
            PipelineStage::MediaUpload => "media_upload",
            PipelineStage::Publish => "publish",
            PipelineStage::MarkPublished => "mark_published",
            PipelineStage::EditBufferInsert => "edit_buffer_insert",
        }
    }
}

/// The terminal result of running one post through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// Published (or updated) as this target status id.
    Published { status_id: String },
    /// Dropped before publish, for the given reason.
    Skipped { reason: String },
    /// A stage failed fatally; the post was not published.
    Failed { reason: String },
}

/// Local, run-scoped cache of the last status id published for each
/// `(source_id, username)` pair, used to resolve `in_reply_to` for
/// same-author thread continuations that don't carry an explicit
/// `reply_to` (§5, §9: no cross-process in-memory state).
#[derive(Debug, Default)]
pub struct ThreadCache(HashMap<(String, String), String>);

impl ThreadCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the last known status id for `(source_id, username)`.
    pub fn get(&self, source_id: &str, username: &str) -> Option<&str> {
        self.0
            .get(&(source_id.to_string(), username.to_string()))
            .map(String::as_str)
    }

    /// Record the status id just published for `(source_id, username)`.
    pub fn insert(&mut self, source_id: &str, username: &str, status_id: String) {
        self.0.insert((source_id.to_string(), username.to_string()), status_id);
    }
}

fn edit_flag_eligible(platform: Platform) -> bool {
    matches!(platform, Platform::Twitter | Platform::Bluesky)
}

/// Lower-case the text and strip `@mentions`, URLs, and `#hashtags` before
/// hashing, so a post whose only differences are those tokens still hashes
/// identically for edit detection (§4.5 step 2).
fn normalize_for_edit_hash(text: &str) -> String {
    fn strip_token_re() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| {
            Regex::new(r"@\w+|#\w+|https?://\S+").expect("edit-hash strip regex")
        })
    }
    let stripped = strip_token_re().replace_all(text, "");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Is `candidate_id` strictly earlier than `buffered_id` on this platform's
/// native ordering — numeric for Twitter's incrementing snowflake ids,
/// lexicographic for Bluesky's base32-sortable TIDs (§4.5 step 2)?
fn is_older_id(platform: Platform, candidate_id: &str, buffered_id: &str) -> bool {
    if platform == Platform::Twitter {
        if let (Ok(a), Ok(b)) = (candidate_id.parse::<u128>(), buffered_id.parse::<u128>()) {
            return a < b;
        }
    }
    candidate_id < buffered_id
}

enum EditAction {
    None,
    SkipOlderVersion,
    UpdateExisting { target_status_id: String },
}

async fn detect_edit(
    pool: &DbPool,
    source_id: &str,
    post: &Post,
    text_normalized: &str,
    text_hash: &str,
) -> Result<EditAction, StorageError> {
    if !edit_flag_eligible(post.platform) {
        return Ok(EditAction::None);
    }

    let found = storage::edit_buffer::find_by_text_hash(pool, &post.author.username, text_hash, EDIT_WINDOW).await?;
    let Some(found) = found else {
        return Ok(EditAction::None);
    };
    // A row for the very same post (e.g. a re-delivered webhook) is not an
    // edit at all; let dedup upstream have already handled the identical
    // post_id case, so only a *different* id here signals a real edit.
    if found.post_id == post.id {
        return Ok(EditAction::None);
    }

    if is_older_id(post.platform, &post.id, &found.post_id) {
        Ok(EditAction::SkipOlderVersion)
    } else {
        Ok(EditAction::UpdateExisting { target_status_id: found.target_status_id })
    }
}

fn apply_replacements(text: &str, rules: &[ReplacementRule]) -> String {
    let mut out = text.to_string();
    for rule in rules {
        if rule.literal {
            out = if rule.flags.contains('i') {
                match Regex::new(&format!("(?i){}", regex::escape(&rule.pattern))) {
                    Ok(re) => re.replace_all(&out, rule.replacement.as_str()).into_owned(),
                    Err(_) => out,
                }
            } else {
                out.replace(&rule.pattern, &rule.replacement)
            };
        } else {
            let flags = if rule.flags.is_empty() {
                String::new()
            } else {
                format!("(?{})", rule.flags)
            };
            if let Ok(re) = Regex::new(&format!("{flags}{}", rule.pattern)) {
                out = re.replace_all(&out, rule.replacement.as_str()).into_owned();
            }
        }
    }
    out
}

fn media_mime_and_filename(media: &crate::model::Media) -> (&'static str, String) {
    use crate::model::MediaKind;
    let (mime, ext) = match media.kind {
        MediaKind::Image => ("image/jpeg", "jpg"),
        MediaKind::Video => ("video/mp4", "mp4"),
        MediaKind::Gif => ("image/gif", "gif"),
        MediaKind::Audio => ("audio/mpeg", "mp3"),
        MediaKind::LinkCard | MediaKind::VideoThumbnail => ("image/jpeg", "jpg"),
    };
    (mime, format!("media.{ext}"))
}

async fn resolve_in_reply_to(
    pool: &DbPool,
    source_id: &str,
    post: &Post,
    thread_cache: &ThreadCache,
) -> Result<Option<String>, StorageError> {
    if let Some(parent_id) = &post.reply_to {
        // Bluesky's `reply_to` is a full AT-URI, keyed on `platform_uri`;
        // other platforms carry a bare native post id, keyed on `post_id`.
        let found = if parent_id.starts_with("at://") {
            storage::published_posts::find_by_platform_uri(pool, source_id, parent_id).await?
        } else {
            storage::published_posts::find_by_post_id(pool, source_id, parent_id).await?
        };
        if let Some(found) = found {
            return Ok(Some(found.target_status_id));
        }
    }
    if post.is_thread_post {
        if let Some(status_id) = thread_cache.get(source_id, &post.author.username) {
            return Ok(Some(status_id.to_string()));
        }
    }
    Ok(None)
}

async fn mark_failed(pool: &DbPool, source_id: &str, reason: &str) -> Result<PipelineOutcome, StorageError> {
    storage::source_state::mark_check_error(pool, source_id, reason).await?;
    storage::activity_log::log(
        pool,
        Some(source_id),
        ActivityAction::Error,
        serde_json::json!({ "reason": reason }),
    )
    .await?;
    Ok(PipelineOutcome::Failed { reason: reason.to_string() })
}

async fn mark_skipped(pool: &DbPool, source_id: &str, reason: &str) -> Result<PipelineOutcome, StorageError> {
    storage::activity_log::log(
        pool,
        Some(source_id),
        ActivityAction::Skip,
        serde_json::json!({ "reason": reason }),
    )
    .await?;
    Ok(PipelineOutcome::Skipped { reason: reason.to_string() })
}

/// Run one post through every stage of the pipeline (§4.5). Returns
/// `Ok(outcome)` for any business-level result; only a state-store failure
/// that the caller must escalate (§7: `StateError` aborts the run) comes
/// back as `Err`.
pub async fn run_post(
    pool: &DbPool,
    publisher: &Publisher,
    source: &SourceConfig,
    post: &Post,
    thread_cache: &mut ThreadCache,
) -> Result<PipelineOutcome, StorageError> {
    let source_id = source.id.as_str();
    tracing::debug!(stage = PipelineStage::Dedup.as_str(), source_id, post_id = %post.id, "pipeline stage");

    // 1. Dedup
    if storage::published_posts::is_published(pool, source_id, &post.id).await? {
        return mark_skipped(pool, source_id, "duplicate").await;
    }

    // 2. Edit detection (twitter/bluesky only)
    tracing::debug!(stage = PipelineStage::EditDetection.as_str(), source_id, "pipeline stage");
    let text_normalized = normalize_for_edit_hash(&post.text);
    let text_hash = sha256_hex(&text_normalized);
    let edit_action = detect_edit(pool, source_id, post, &text_normalized, &text_hash).await?;
    if matches!(edit_action, EditAction::SkipOlderVersion) {
        return mark_skipped(pool, source_id, "skip_older_version").await;
    }

    // 3. Content filtering
    tracing::debug!(stage = PipelineStage::ContentFiltering.as_str(), source_id, "pipeline stage");
    if let Some(reason) = filter::should_skip(post, &source.filtering) {
        return mark_skipped(pool, source_id, &reason).await;
    }

    // 4. Format
    let formatted = format_post(post, &source.formatting);

    // 5. Content replacements
    let replaced = apply_replacements(&formatted, &source.processing.replacements);

    // 6. Trim
    let trimmed = trim_to_length(
        &replaced,
        source.formatting.max_length,
        source.formatting.trim_strategy,
        source.formatting.smart_tolerance_pct,
    );

    // 7. URL processing
    let final_text = process_urls(&trimmed, &source.formatting.rewrite_domains, &source.formatting.target_url_domain);

    if final_text.trim().is_empty() && post.publishable_media().is_empty() {
        // Tier 2's "tweet likely deleted" case (§4.6): empty text, no
        // media. Publisher would reject it; the pipeline refuses first so
        // no network round-trip is wasted and the post is not retried.
        return mark_skipped(pool, source_id, "text cannot be empty").await;
    }

    // 8. Media upload
    tracing::debug!(stage = PipelineStage::MediaUpload.as_str(), source_id, "pipeline stage");
    let publishable = post.publishable_media();
    let mut media_ids = Vec::with_capacity(publishable.len());
    for media in media_sources_for(&publishable) {
        let (mime, filename) = media_mime_and_filename(media);
        let source_item = MediaSource::Url {
            url: media.url.clone(),
            filename,
            mime: mime.to_string(),
        };
        match publisher.upload_media(source_item, media.alt_text.as_deref()).await {
            Ok(media_id) => media_ids.push(media_id),
            Err(e) => return mark_failed(pool, source_id, &format!("media upload failed: {e}")).await,
        }
    }

    // 9. Publish
    tracing::debug!(stage = PipelineStage::Publish.as_str(), source_id, "pipeline stage");
    let result = match edit_action {
        EditAction::UpdateExisting { target_status_id } if publishable.is_empty() => {
            match publisher.update_status(&target_status_id, &final_text).await {
                Ok(()) => Ok(target_status_id),
                Err(e) => Err(e),
            }
        }
        EditAction::UpdateExisting { target_status_id } => {
            if let Err(e) = publisher.delete_status(&target_status_id).await {
                Err(e)
            } else {
                publish_fresh(pool, publisher, source, post, &final_text, &media_ids, thread_cache).await
            }
        }
        EditAction::None | EditAction::SkipOlderVersion => {
            publish_fresh(pool, publisher, source, post, &final_text, &media_ids, thread_cache).await
        }
    };

    let status_id = match result {
        Ok(id) => id,
        Err(e) => return mark_failed(pool, source_id, &publisher_failure_reason(&e)).await,
    };

    // 10. Mark published
    tracing::debug!(stage = PipelineStage::MarkPublished.as_str(), source_id, "pipeline stage");
    let platform_uri = post.raw.get("platform_uri").and_then(|v| v.as_str());
    storage::published_posts::mark_published(pool, source_id, &post.id, &post.url, &status_id, platform_uri).await?;

    // 11. Edit-buffer insert (twitter/bluesky only)
    if edit_flag_eligible(post.platform) {
        tracing::debug!(stage = PipelineStage::EditBufferInsert.as_str(), source_id, "pipeline stage");
        storage::edit_buffer::add_to_edit_buffer(
            pool,
            source_id,
            &post.id,
            &post.author.username,
            &text_normalized,
            &text_hash,
            &status_id,
        )
        .await?;
    }

    thread_cache.insert(source_id, &post.author.username, status_id.clone());

    storage::source_state::mark_check_success(pool, source_id, 1).await?;
    storage::activity_log::log(
        pool,
        Some(source_id),
        ActivityAction::Publish,
        serde_json::json!({ "post_id": post.id, "status_id": status_id }),
    )
    .await?;

    Ok(PipelineOutcome::Published { status_id })
}

async fn publish_fresh(
    pool: &DbPool,
    publisher: &Publisher,
    source: &SourceConfig,
    post: &Post,
    final_text: &str,
    media_ids: &[String],
    thread_cache: &ThreadCache,
) -> Result<String, PublisherError> {
    let in_reply_to = resolve_in_reply_to(pool, &source.id, post, thread_cache)
        .await
        .ok()
        .flatten();
    publisher
        .publish(final_text, media_ids, &source.target_account.visibility, in_reply_to.as_deref())
        .await
}

fn publisher_failure_reason(err: &PublisherError) -> String {
    err.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        FilteringConfig, FormattingConfig, MentionsConfig, Priority, ProcessingConfig, RssParams,
        SchedulingConfig, SourceParams, TargetAccount,
    };
    use crate::model::{Author, Media, MediaKind, Platform as ModelPlatform};
    use crate::storage::init_test_db;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source(id: &str) -> SourceConfig {
        SourceConfig {
            id: id.to_string(),
            enabled: true,
            priority: Priority::Normal,
            source_params: SourceParams::Rss(RssParams::default()),
            target_account: TargetAccount { token: "tok".into(), visibility: "public".into() },
            formatting: FormattingConfig { move_url_to_end: false, ..Default::default() },
            filtering: FilteringConfig::default(),
            processing: ProcessingConfig::default(),
            mentions: MentionsConfig::default(),
            profile_sync: None,
            scheduling: SchedulingConfig::default(),
        }
    }

    fn post(id: &str) -> Post {
        Post {
            platform: ModelPlatform::Rss,
            id: id.to_string(),
            url: format!("https://example.com/{id}"),
            title: None,
            text: "hello world".to_string(),
            published_at: chrono::Utc::now(),
            author: Author { username: "foo".into(), display_name: "Foo".into(), profile_url: String::new() },
            media: vec![],
            is_repost: false,
            is_quote: false,
            is_reply: false,
            is_thread_post: false,
            has_video: false,
            reposted_by: None,
            quoted_post: None,
            reply_to: None,
            reply_to_handle: None,
            raw: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn publishes_then_dedupes_second_run() {
        let pool = init_test_db().await.unwrap();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/statuses"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "77"})))
            .mount(&server)
            .await;

        let publisher = Publisher::new(reqwest::Client::new(), server.uri(), "tok".to_string());
        let src = source("rss1");
        let p = post("1");
        let mut cache = ThreadCache::new();

        let outcome = run_post(&pool, &publisher, &src, &p, &mut cache).await.unwrap();
        assert!(matches!(outcome, PipelineOutcome::Published { status_id } if status_id == "77"));

        let outcome2 = run_post(&pool, &publisher, &src, &p, &mut cache).await.unwrap();
        assert_eq!(outcome2, PipelineOutcome::Skipped { reason: "duplicate".to_string() });
    }

    #[tokio::test]
    async fn banned_rule_skips_before_publish() {
        let pool = init_test_db().await.unwrap();
        let publisher = Publisher::new(reqwest::Client::new(), "https://example.invalid".to_string(), "tok".to_string());
        let mut src = source("rss2");
        src.filtering.banned = vec![crate::config::FilterRule::Literal("hello".to_string())];
        let p = post("1");
        let mut cache = ThreadCache::new();

        let outcome = run_post(&pool, &publisher, &src, &p, &mut cache).await.unwrap();
        assert_eq!(outcome, PipelineOutcome::Skipped { reason: "banned_rule_matched".to_string() });
    }

    #[tokio::test]
    async fn skip_replies_short_circuits() {
        let pool = init_test_db().await.unwrap();
        let publisher = Publisher::new(reqwest::Client::new(), "https://example.invalid".to_string(), "tok".to_string());
        let mut src = source("rss3");
        src.filtering.skip_replies = true;
        let mut p = post("1");
        p.is_reply = true;
        let mut cache = ThreadCache::new();

        let outcome = run_post(&pool, &publisher, &src, &p, &mut cache).await.unwrap();
        assert_eq!(outcome, PipelineOutcome::Skipped { reason: "skip_replies".to_string() });
    }

    #[tokio::test]
    async fn text_only_edit_updates_existing_status() {
        let pool = init_test_db().await.unwrap();
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/v1/statuses/100"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let publisher = Publisher::new(reqwest::Client::new(), server.uri(), "tok".to_string());
        let mut src = source("tw1");
        src.source_params = SourceParams::Twitter(crate::config::TwitterParams { handle: "foo".into() });

        let mut original = post("100");
        original.platform = ModelPlatform::Twitter;
        let original_normalized = normalize_for_edit_hash(&original.text);
        let original_hash = sha256_hex(&original_normalized);
        storage::edit_buffer::add_to_edit_buffer(
            &pool,
            "tw1",
            "100",
            "foo",
            &original_normalized,
            &original_hash,
            "100",
        )
        .await
        .unwrap();

        let mut edited = post("101");
        edited.platform = ModelPlatform::Twitter;
        edited.text = "hello world".to_string();

        let mut cache = ThreadCache::new();
        let outcome = run_post(&pool, &publisher, &src, &edited, &mut cache).await.unwrap();
        assert_eq!(outcome, PipelineOutcome::Published { status_id: "100".to_string() });
    }

    #[tokio::test]
    async fn edit_with_media_deletes_and_republishes() {
        let pool = init_test_db().await.unwrap();
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/v1/statuses/200"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v2/media"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "m1", "url": "https://x/m1"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/img.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 10]))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/statuses"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "201"})))
            .mount(&server)
            .await;

        let publisher = Publisher::new(reqwest::Client::new(), server.uri(), "tok".to_string());
        let mut src = source("tw2");
        src.source_params = SourceParams::Twitter(crate::config::TwitterParams { handle: "foo".into() });

        let original = post("200");
        let original_normalized = normalize_for_edit_hash(&original.text);
        let original_hash = sha256_hex(&original_normalized);
        storage::edit_buffer::add_to_edit_buffer(&pool, "tw2", "200", "foo", &original_normalized, &original_hash, "200")
            .await
            .unwrap();

        let mut edited = post("201");
        edited.platform = ModelPlatform::Twitter;
        edited.text = "hello world".to_string();
        edited.media = vec![Media {
            kind: MediaKind::Image,
            url: format!("{}/img.jpg", server.uri()),
            alt_text: None,
            width: None,
            height: None,
            thumbnail_url: None,
            title: None,
            description: None,
        }];

        let mut cache = ThreadCache::new();
        let outcome = run_post(&pool, &publisher, &src, &edited, &mut cache).await.unwrap();
        assert_eq!(outcome, PipelineOutcome::Published { status_id: "201".to_string() });
    }

    #[test]
    fn normalize_for_edit_hash_strips_tokens() {
        let out = normalize_for_edit_hash("Hello @bar check https://x.co/1 #cool");
        assert_eq!(out, "hello check");
    }

    #[test]
    fn is_older_id_numeric_compare_for_twitter() {
        assert!(is_older_id(ModelPlatform::Twitter, "5", "10"));
        assert!(!is_older_id(ModelPlatform::Twitter, "10", "5"));
    }

    #[test]
    fn is_older_id_lexicographic_for_bluesky() {
        assert!(is_older_id(ModelPlatform::Bluesky, "3jui7kixs4z2o", "3jui7kixs4z2p"));
    }

    #[tokio::test]
    async fn resolve_in_reply_to_finds_bluesky_parent_by_platform_uri() {
        let pool = init_test_db().await.unwrap();
        storage::published_posts::mark_published(
            &pool,
            "bsky1",
            "parent",
            "https://bsky.app/profile/foo/post/parent",
            "300",
            Some("at://did:plc:abc/app.bsky.feed.post/parent"),
        )
        .await
        .unwrap();

        let mut reply = post("child");
        reply.platform = ModelPlatform::Bluesky;
        reply.reply_to = Some("at://did:plc:abc/app.bsky.feed.post/parent".to_string());

        let cache = ThreadCache::new();
        let result = resolve_in_reply_to(&pool, "bsky1", &reply, &cache).await.unwrap();
        assert_eq!(result, Some("300".to_string()));
    }

    #[tokio::test]
    async fn bluesky_publish_persists_platform_uri_for_later_parent_lookup() {
        let pool = init_test_db().await.unwrap();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/statuses"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "300"})))
            .mount(&server)
            .await;

        let publisher = Publisher::new(reqwest::Client::new(), server.uri(), "tok".to_string());
        let mut src = source("bsky2");
        src.source_params = SourceParams::Bluesky(crate::config::BlueskyParams::default());

        let mut p = post("parent");
        p.platform = ModelPlatform::Bluesky;
        p.raw.insert(
            "platform_uri".to_string(),
            serde_json::Value::from("at://did:plc:abc/app.bsky.feed.post/parent"),
        );

        let mut cache = ThreadCache::new();
        run_post(&pool, &publisher, &src, &p, &mut cache).await.unwrap();

        let found = storage::published_posts::find_by_platform_uri(
            &pool,
            "bsky2",
            "at://did:plc:abc/app.bsky.feed.post/parent",
        )
        .await
        .unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().target_status_id, "300");
    }
}
