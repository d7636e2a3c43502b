//! Twitter hybrid tier engine (Component F, §4.6).
//!
//! Takes a normalised webhook payload plus the source's config and resolves
//! a complete [`Post`], cascading through tiers 1 → 1.5 → 2 → 3.5 → 3.
//! `classify_tier` is a pure function over the normalised payload;
//! `resolve` is the async cascade that calls out to the scraper bridge and
//! the embed-JSON service as each tier demands.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::adapters::TwitterScraperAdapter;
use crate::model::{Author, Media, MediaKind, Platform, Post, QuotedPost};

/// Raw webhook payload, as delivered by the `/api/ifttt/twitter` ingress
/// and normalised by [`normalize_payload`].
#[derive(Debug, Clone)]
pub struct WebhookPayload {
    pub text: String,
    pub embed_code: String,
    pub link_to_tweet: String,
    pub first_link_url: String,
    pub username: String,
    pub bot_id: String,
}

/// Decision the tier engine reached before attempting resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Build directly from the webhook payload; no scraper call.
    One,
    /// Scraper processing disabled for this source; webhook payload only,
    /// routed through the embed-JSON service.
    OneHalf,
    /// Fetch the full post from the scraper bridge.
    Two,
    /// Embed-JSON fallback after a scraper failure.
    ThreeHalf,
    /// Last-resort fallback using only the webhook payload.
    Three,
}

fn shortened_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://t\.co/\w+").expect("shortened url regex"))
}

fn status_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(?:twitter|x)\.com/\w+/status/\d+").expect("status url regex"))
}

fn photo_video_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)/photo/\d+$|/video/\d+$").expect("photo/video url regex"))
}

fn trailing_digit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d\z").expect("trailing digit regex"))
}

fn sentence_terminator_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?…]\z|#\w+\z").expect("terminator regex"))
}

fn trailing_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)https?://\S+\z").expect("trailing url regex"))
}

/// True when `text` ends on an emoji codepoint — the `regex` crate has no
/// `\p{Emoji}` class, so this checks the common emoji codepoint blocks
/// directly against the last scalar value.
fn ends_with_emoji(text: &str) -> bool {
    match text.chars().last() {
        Some(c) => {
            let cp = c as u32;
            matches!(cp,
                0x1F300..=0x1FAFF | 0x2600..=0x27BF | 0x1F000..=0x1F0FF | 0x2190..=0x21FF | 0xFE0F
            )
        }
        None => false,
    }
}

/// URL-decode and HTML-entity-decode `text`/`embed_code`, and inject
/// `source_handle` so brand-named webhook triggers still resolve the real
/// handle used for reply/self-detection (§4.6).
pub fn normalize_payload(mut payload: WebhookPayload, source_handle: &str) -> WebhookPayload {
    payload.text = decode_entities(&url_decode(&payload.text));
    payload.embed_code = decode_entities(&url_decode(&payload.embed_code));
    if payload.username.is_empty() {
        payload.username = source_handle.to_string();
    }
    payload
}

fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or(""), 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        if bytes[i] == b'+' {
            out.push(b' ');
            i += 1;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn decode_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

/// Extract the numeric post ID from a tweet status URL.
pub fn extract_post_id(tweet_url: &str) -> Option<String> {
    status_url_re().find(tweet_url)?;
    tweet_url.rsplit('/').next().map(|s| s.trim_end_matches(char::is_alphabetic).to_string())
}

/// Decide the tier for a normalised payload. `scraper_enabled` reflects the
/// source's `processing.scraper_enabled` config.
pub fn classify_tier(payload: &WebhookPayload, scraper_enabled: bool, non_terminating_words: &[String]) -> Tier {
    if !scraper_enabled {
        return Tier::OneHalf;
    }

    let text = payload.text.trim();

    if text.starts_with("RT @") {
        return Tier::Two;
    }
    if text.starts_with(&format!("@{}", payload.username)) {
        return Tier::Two;
    }
    if photo_video_url_re().is_match(&payload.first_link_url) {
        return Tier::Two;
    }
    if status_url_re().is_match(&payload.first_link_url) {
        return Tier::Two;
    }
    if payload.embed_code.contains("pbs.twimg.com/media")
        || payload.embed_code.contains("pic.twitter.com")
        || payload.embed_code.contains("ext_tw_video_thumb")
        || payload.embed_code.contains("video.twimg.com")
    {
        return Tier::Two;
    }
    let has_non_media_first_link = !payload.first_link_url.is_empty() && !photo_video_url_re().is_match(&payload.first_link_url);
    if has_non_media_first_link && shortened_url_re().find_iter(text).count() >= 2 {
        return Tier::Two;
    }
    if likely_truncated(text, non_terminating_words) {
        return Tier::Two;
    }

    Tier::One
}

/// Returns true when `text` shows signs of being truncated by the upstream
/// platform. The end-of-string anchor is `\z` (not `$`) throughout, so
/// embedded newlines never produce a false negative (§4.6).
///
/// Only the "lacks every natural terminator" branch is gated on the 257
/// character threshold — a bare trailing digit or a configured
/// non-terminating word is evidence of truncation at any length.
pub fn likely_truncated(text: &str, non_terminating_words: &[String]) -> bool {
    // Covers both a bare ellipsis and a shortened URL ending in one
    // (e.g. Twitter truncating even its own `t.co` link).
    if text.contains('…') || text.contains("...") {
        return true;
    }

    let body = strip_trailing_shortened_url(text);
    let body = body.trim_end();

    if sentence_terminator_re().is_match(body) || ends_with_emoji(body) || trailing_url_re().is_match(body) {
        return false;
    }
    if trailing_digit_re().is_match(body) {
        return true;
    }
    if let Some(last_word) = body.split_whitespace().last() {
        let normalized = last_word.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();
        if non_terminating_words.iter().any(|w| w.to_lowercase() == normalized) {
            return true;
        }
    }

    text.chars().count() >= 257
}

fn strip_trailing_shortened_url(text: &str) -> &str {
    if let Some(m) = shortened_url_re().find_iter(text).last() {
        if m.end() >= text.trim_end().len() {
            return text[..m.start()].trim_end();
        }
    }
    text
}

/// Build a [`Post`] directly from a tier-1 webhook payload.
fn build_tier1_post(payload: &WebhookPayload, tier: Tier) -> Post {
    let id = extract_post_id(&payload.link_to_tweet).unwrap_or_default();
    let mut text = payload.text.clone();

    let has_media_signal = payload.embed_code.contains("pbs.twimg.com/media")
        || payload.embed_code.contains("video.twimg.com")
        || payload.embed_code.contains("ext_tw_video_thumb");
    if has_media_signal {
        text = photo_video_url_re().replace_all(&text, "").trim().to_string();
    }

    Post {
        platform: Platform::Twitter,
        id,
        url: payload.link_to_tweet.clone(),
        title: None,
        text,
        published_at: chrono::Utc::now(),
        author: Author {
            username: payload.username.clone(),
            display_name: payload.username.clone(),
            profile_url: format!("https://twitter.com/{}", payload.username),
        },
        media: vec![],
        is_repost: false,
        is_quote: false,
        is_reply: false,
        is_thread_post: false,
        has_video: payload.embed_code.contains("video.twimg.com") || payload.embed_code.contains("ext_tw_video_thumb"),
        reposted_by: None,
        quoted_post: None,
        reply_to: None,
        reply_to_handle: None,
        raw: [("tier".to_string(), serde_json::Value::from(tier_label(tier)))].into_iter().collect(),
    }
}

fn tier_label(tier: Tier) -> &'static str {
    match tier {
        Tier::One => "1",
        Tier::OneHalf => "1.5",
        Tier::Two => "2",
        Tier::ThreeHalf => "3.5",
        Tier::Three => "3",
    }
}

/// Deterministic token for the embed-JSON service: the first 10 hex
/// characters of the post ID's MD5 digest (§6).
pub fn embed_json_token(post_id: &str) -> String {
    let digest = md5::compute(post_id.as_bytes());
    format!("{digest:x}")[..10].to_string()
}

/// Client for the Twitter embed-JSON syndication fallback (tiers 1.5/3.5).
pub struct EmbedJsonClient {
    client: reqwest::Client,
    base_url: String,
}

impl EmbedJsonClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client, base_url: "https://cdn.syndication.twimg.com".to_string() }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn fetch(&self, post_id: &str) -> Result<EmbedJsonResponse, ()> {
        let token = embed_json_token(post_id);
        let url = format!("{}/tweet-result?id={post_id}&token={token}", self.base_url);
        let response = self
            .client
            .get(&url)
            .header(reqwest::header::USER_AGENT, "Googlebot/2.1")
            .send()
            .await
            .map_err(|_| ())?;
        if !response.status().is_success() {
            return Err(());
        }
        response.json().await.map_err(|_| ())
    }
}

#[derive(Debug, Deserialize)]
struct EmbedJsonResponse {
    text: Option<String>,
    #[serde(default)]
    photos: Vec<EmbedJsonPhoto>,
    video: Option<EmbedJsonVideo>,
}

#[derive(Debug, Deserialize)]
struct EmbedJsonPhoto {
    url: String,
}

#[derive(Debug, Deserialize)]
struct EmbedJsonVideo {
    #[serde(rename = "poster")]
    thumbnail_url: Option<String>,
}

fn build_embed_json_post(payload: &WebhookPayload, body: EmbedJsonResponse, tier: Tier) -> Post {
    let id = extract_post_id(&payload.link_to_tweet).unwrap_or_default();
    let mut text = body.text.unwrap_or_else(|| payload.text.clone());
    let mut truncated = false;

    let looks_truncated = text.chars().count() >= 270
        && (strip_trailing_shortened_url(&text) != text.trim_end()
            || !(sentence_terminator_re().is_match(text.trim_end()) || ends_with_emoji(text.trim_end())))
        && !text.contains('…');
    if looks_truncated {
        text.push('…');
        truncated = true;
    }

    let mut media: Vec<Media> = body
        .photos
        .into_iter()
        .take(4)
        .map(|p| Media {
            kind: MediaKind::Image,
            url: p.url,
            alt_text: None,
            width: None,
            height: None,
            thumbnail_url: None,
            title: None,
            description: None,
        })
        .collect();
    if let Some(video) = body.video {
        if let Some(thumb) = video.thumbnail_url {
            media.push(Media {
                kind: MediaKind::VideoThumbnail,
                url: thumb,
                alt_text: None,
                width: None,
                height: None,
                thumbnail_url: None,
                title: None,
                description: None,
            });
        }
    }

    let mut raw = std::collections::HashMap::new();
    raw.insert("tier".to_string(), serde_json::Value::from(tier_label(tier)));
    if truncated {
        raw.insert("truncated".to_string(), serde_json::Value::from(true));
        raw.insert("force_read_more".to_string(), serde_json::Value::from(true));
    }

    Post {
        platform: Platform::Twitter,
        id,
        url: payload.link_to_tweet.clone(),
        title: None,
        text,
        published_at: chrono::Utc::now(),
        author: Author {
            username: payload.username.clone(),
            display_name: payload.username.clone(),
            profile_url: format!("https://twitter.com/{}", payload.username),
        },
        media,
        is_repost: false,
        is_quote: false,
        is_reply: false,
        is_thread_post: false,
        has_video: false,
        reposted_by: None,
        quoted_post: None,
        reply_to: None,
        reply_to_handle: None,
        raw,
    }
}

/// Build a last-resort tier-3 post using only the webhook payload.
fn build_tier3_post(payload: &WebhookPayload, non_terminating_words: &[String]) -> Post {
    let mut post = build_tier1_post(payload, Tier::Three);
    post.text = photo_video_url_re().replace_all(&post.text, "").trim().to_string();

    if likely_truncated(&post.text, non_terminating_words) && !post.text.contains('…') {
        post.text.push('…');
    }

    let media = scrape_media_from_embed_code(&payload.embed_code);
    post.media = media;
    post.raw.insert("force_read_more".to_string(), serde_json::Value::from(true));
    post
}

fn scrape_media_from_embed_code(embed_code: &str) -> Vec<Media> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r#"https?://pbs\.twimg\.com/[^\s"'<>]+"#).expect("pbs.twimg.com regex"));
    re.find_iter(embed_code)
        .map(|m| Media {
            kind: MediaKind::Image,
            url: m.as_str().to_string(),
            alt_text: None,
            width: None,
            height: None,
            thumbnail_url: None,
            title: None,
            description: None,
        })
        .collect()
}

/// Resolve a normalised webhook payload into a complete [`Post`], cascading
/// through tiers 1 → 1.5 → 2 → 3.5 → 3 as each tier's upstream call
/// succeeds or fails.
pub async fn resolve(
    payload: WebhookPayload,
    scraper_enabled: bool,
    non_terminating_words: &[String],
    scraper: &TwitterScraperAdapter,
    embed_json: &EmbedJsonClient,
) -> Post {
    let tier = classify_tier(&payload, scraper_enabled, non_terminating_words);

    match tier {
        Tier::One => build_tier1_post(&payload, Tier::One),
        Tier::OneHalf => resolve_via_embed_json_or_tier1(&payload, Tier::OneHalf, embed_json).await,
        Tier::Two => resolve_tier2(&payload, non_terminating_words, scraper, embed_json).await,
        Tier::ThreeHalf | Tier::Three => unreachable!("classify_tier never returns 3.5/3 directly"),
    }
}

async fn resolve_via_embed_json_or_tier1(payload: &WebhookPayload, tier: Tier, embed_json: &EmbedJsonClient) -> Post {
    let id = extract_post_id(&payload.link_to_tweet).unwrap_or_default();
    match embed_json.fetch(&id).await {
        Ok(body) => build_embed_json_post(payload, body, tier),
        Err(()) => build_tier1_post(payload, Tier::One),
    }
}

async fn resolve_tier2(
    payload: &WebhookPayload,
    non_terminating_words: &[String],
    scraper: &TwitterScraperAdapter,
    embed_json: &EmbedJsonClient,
) -> Post {
    let id = extract_post_id(&payload.link_to_tweet).unwrap_or_default();
    const BACKOFFS: [Duration; 3] = [Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)];

    let mut last_err = None;
    for (attempt, backoff) in BACKOFFS.iter().enumerate() {
        match scraper.fetch_single_post(&id, Some(&payload.username)).await {
            Ok(mut post) => {
                // The scraper sometimes returns a different author from the
                // RT chain; the webhook's `RT @...` header is authoritative.
                if let Some(rt_user) = extract_rt_header(&payload.text) {
                    post.reposted_by = Some(payload.username.clone());
                    post.author.username = rt_user.clone();
                    post.author.display_name = rt_user;
                    post.is_repost = true;
                }
                post.raw.insert("tier".to_string(), serde_json::Value::from(tier_label(Tier::Two)));
                return post;
            }
            Err(e) => {
                last_err = Some(e);
                if attempt + 1 < BACKOFFS.len() {
                    tokio::time::sleep(*backoff).await;
                }
            }
        }
    }

    tracing::warn!(post_id = %id, error = ?last_err, "tier 2 scraper exhausted, cascading to tier 3.5");
    match embed_json.fetch(&id).await {
        Ok(body) => build_embed_json_post(payload, body, Tier::ThreeHalf),
        Err(()) => build_tier3_post(payload, non_terminating_words),
    }
}

fn extract_rt_header(text: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^RT @(\w+):").expect("rt header regex"));
    re.captures(text.trim())?.get(1).map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(text: &str, first_link_url: &str, embed_code: &str) -> WebhookPayload {
        WebhookPayload {
            text: text.to_string(),
            embed_code: embed_code.to_string(),
            link_to_tweet: "https://twitter.com/foo/status/42".to_string(),
            first_link_url: first_link_url.to_string(),
            username: "foo".to_string(),
            bot_id: "bot1".to_string(),
        }
    }

    fn non_terms() -> Vec<String> {
        ["a", "an", "the", "and", "or", "but", "of", "to", "with"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn classify_retweet_routes_tier2() {
        let p = payload("RT @someone: hello there", "", "");
        assert_eq!(classify_tier(&p, true, &non_terms()), Tier::Two);
    }

    #[test]
    fn classify_plain_short_text_routes_tier1() {
        let p = payload("Hi", "", "");
        assert_eq!(classify_tier(&p, true, &non_terms()), Tier::One);
    }

    #[test]
    fn classify_scraper_disabled_routes_tier1_5() {
        let p = payload("Hi", "", "");
        assert_eq!(classify_tier(&p, false, &non_terms()), Tier::OneHalf);
    }

    #[test]
    fn classify_self_reply_routes_tier2() {
        let p = payload("@foo replying to myself", "", "");
        assert_eq!(classify_tier(&p, true, &non_terms()), Tier::Two);
    }

    #[test]
    fn classify_media_embed_code_routes_tier2() {
        let p = payload("look at this", "", "<img src=pbs.twimg.com/media/xyz>");
        assert_eq!(classify_tier(&p, true, &non_terms()), Tier::Two);
    }

    #[test]
    fn likely_truncated_long_text_without_terminator() {
        assert!(likely_truncated(&"a".repeat(257), &non_terms()));
    }

    #[test]
    fn likely_truncated_short_sentence_is_false() {
        assert!(!likely_truncated("Short sentence.", &non_terms()));
    }

    #[test]
    fn likely_truncated_ellipsis_is_true() {
        assert!(likely_truncated("Wait for it…", &non_terms()));
        assert!(likely_truncated("Wait for it...", &non_terms()));
    }

    #[test]
    fn likely_truncated_trailing_digit_over_threshold() {
        let text = format!("{}28", "x ".repeat(130));
        assert!(likely_truncated(&text, &non_terms()));
    }

    #[test]
    fn likely_truncated_trailing_digit_is_unconditional_on_length() {
        assert!(likely_truncated("Máme 28", &non_terms()));
    }

    #[test]
    fn likely_truncated_non_terminating_word_is_unconditional_on_length() {
        assert!(likely_truncated("Něco končí a", &non_terms()));
    }

    #[test]
    fn likely_truncated_trailing_url_is_a_terminator() {
        assert!(!likely_truncated("Check this out https://example.com/foo", &non_terms()));
    }

    #[test]
    fn normalize_payload_url_and_entity_decodes() {
        let raw = payload("Tom%20%26%20Jerry", "", "");
        let normalized = normalize_payload(raw, "handle");
        assert_eq!(normalized.text, "Tom & Jerry");
    }

    #[test]
    fn normalize_payload_injects_source_handle_when_username_missing() {
        let mut raw = payload("hi", "", "");
        raw.username = String::new();
        let normalized = normalize_payload(raw, "realhandle");
        assert_eq!(normalized.username, "realhandle");
    }

    #[test]
    fn extract_post_id_from_status_url() {
        assert_eq!(extract_post_id("https://twitter.com/foo/status/12345").as_deref(), Some("12345"));
    }

    #[test]
    fn embed_json_token_is_first_ten_hex_chars_of_md5() {
        let token = embed_json_token("42");
        assert_eq!(token.len(), 10);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn extract_rt_header_captures_username() {
        assert_eq!(extract_rt_header("RT @bar: Hello world").as_deref(), Some("bar"));
        assert_eq!(extract_rt_header("Just a normal tweet"), None);
    }

    #[test]
    fn build_tier3_sets_force_read_more() {
        let p = payload("text with /photo/1 suffix https://t.co/xyz/photo/1", "", "");
        let post = build_tier3_post(&p, &non_terms());
        assert!(post.raw_flag("force_read_more"));
    }
}
