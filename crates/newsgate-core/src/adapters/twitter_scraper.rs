//! Twitter scraper-bridge adapter (§4.2, scraper half).
//!
//! Twitter posts arrive through the webhook ingress (§4.6), never through a
//! polling [`Adapter::fetch`] — this adapter's `fetch` is a stub satisfying
//! the trait. Its real surface is [`fetch_single_post`](Self::fetch_single_post),
//! a one-shot lookup the tier engine calls for tier 2 resolution, retrying
//! the call itself (§4.6: 3 attempts, 1s/2s/4s back-off). Error mapping
//! follows the teacher's `XApiHttpClient::map_error_response` shape: status
//! codes sort into retryable vs. fatal up front, at the HTTP boundary.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::Adapter;
use crate::error::AdapterError;
use crate::model::{Author, Media, MediaKind, Platform, Post, QuotedPost};

/// Scraper-bridge adapter: fetches a single post by ID on demand.
pub struct TwitterScraperAdapter {
    source_id: String,
    bridge_base_url: String,
    client: reqwest::Client,
}

impl TwitterScraperAdapter {
    /// Create a new adapter against the given bridge base URL (e.g.
    /// `https://bridge.example.internal`).
    pub fn new(source_id: impl Into<String>, bridge_base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            source_id: source_id.into(),
            bridge_base_url: bridge_base_url.into(),
            client,
        }
    }

    /// Fetch a single post by platform ID. `username` disambiguates
    /// bridges that key by `(username, id)` rather than `id` alone.
    pub async fn fetch_single_post(&self, id: &str, username: Option<&str>) -> Result<Post, AdapterError> {
        let mut url = format!("{}/status/{id}", self.bridge_base_url);
        if let Some(username) = username {
            url = format!("{url}?username={username}");
        }

        let response = self.client.get(&url).send().await.map_err(|e| AdapterError::Network {
            source_id: self.source_id.clone(),
            source: e,
        })?;

        let status = response.status().as_u16();
        if matches!(status, 429 | 500 | 502 | 503 | 504) {
            return Err(AdapterError::Transient {
                source_id: self.source_id.clone(),
                message: format!("scraper bridge returned HTTP {status}"),
            });
        }
        if status == 404 {
            return Err(AdapterError::ParseFailure {
                source_id: self.source_id.clone(),
                message: "scraper bridge returned 404 for status id".to_string(),
            });
        }

        let body: BridgePost = response.json().await.map_err(|e| AdapterError::Network {
            source_id: self.source_id.clone(),
            source: e,
        })?;

        Ok(self.bridge_post_to_post(body))
    }

    fn bridge_post_to_post(&self, body: BridgePost) -> Post {
        let media = body
            .media
            .into_iter()
            .map(|m| Media {
                kind: match m.kind.as_str() {
                    "video" => MediaKind::Video,
                    "gif" => MediaKind::Gif,
                    _ => MediaKind::Image,
                },
                url: self.rewrite_media_url(&m.url),
                alt_text: m.alt_text,
                width: None,
                height: None,
                thumbnail_url: m.thumbnail_url.map(|u| self.rewrite_media_url(&u)),
                title: None,
                description: None,
            })
            .collect();

        Post {
            platform: Platform::Twitter,
            id: body.id.clone(),
            url: body.url.clone(),
            title: None,
            text: body.text,
            published_at: body.created_at,
            author: Author {
                username: body.author.username.clone(),
                display_name: body.author.name.unwrap_or(body.author.username),
                profile_url: format!("https://twitter.com/{}", body.author.username_raw()),
            },
            media,
            is_repost: body.is_retweet,
            is_quote: body.is_quote,
            is_reply: body.is_reply,
            is_thread_post: false,
            has_video: body.has_video,
            reposted_by: body.retweeted_by,
            quoted_post: body.quoted_url.map(|url| QuotedPost { url, author: body.quoted_author.unwrap_or_default() }),
            reply_to: body.reply_to_id,
            reply_to_handle: body.reply_to_handle,
            raw: Default::default(),
        }
    }

    /// Rewrite a media URL to the bridge's own host, upgrading to original
    /// resolution when the path is a `/pic/media` asset (never `video`).
    fn rewrite_media_url(&self, media_url: &str) -> String {
        let Ok(bridge) = url::Url::parse(&self.bridge_base_url) else {
            return media_url.to_string();
        };
        let Ok(mut parsed) = url::Url::parse(media_url) else {
            return media_url.to_string();
        };

        let _ = parsed.set_scheme(bridge.scheme());
        if let Some(host) = bridge.host_str() {
            let _ = parsed.set_host(Some(host));
        }

        let path = parsed.path().to_string();
        if path.contains("/pic/media") && !path.contains("video") {
            parsed.query_pairs_mut().clear().append_pair("name", "orig");
        }

        parsed.to_string()
    }
}

#[async_trait::async_trait]
impl Adapter for TwitterScraperAdapter {
    fn platform(&self) -> Platform {
        Platform::Twitter
    }

    async fn fetch(&self, _since: Option<DateTime<Utc>>, _limit: usize) -> Result<Vec<Post>, AdapterError> {
        Ok(vec![])
    }
}

#[derive(Debug, Deserialize)]
struct BridgePost {
    id: String,
    url: String,
    text: String,
    #[serde(rename = "createdAt")]
    created_at: DateTime<Utc>,
    author: BridgeAuthor,
    #[serde(default)]
    media: Vec<BridgeMedia>,
    #[serde(rename = "isRetweet", default)]
    is_retweet: bool,
    #[serde(rename = "isQuote", default)]
    is_quote: bool,
    #[serde(rename = "isReply", default)]
    is_reply: bool,
    #[serde(rename = "hasVideo", default)]
    has_video: bool,
    #[serde(rename = "retweetedBy", default)]
    retweeted_by: Option<String>,
    #[serde(rename = "quotedUrl", default)]
    quoted_url: Option<String>,
    #[serde(rename = "quotedAuthor", default)]
    quoted_author: Option<String>,
    #[serde(rename = "replyToId", default)]
    reply_to_id: Option<String>,
    #[serde(rename = "replyToHandle", default)]
    reply_to_handle: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BridgeAuthor {
    username: String,
    name: Option<String>,
}

impl BridgeAuthor {
    fn username_raw(&self) -> &str {
        self.username.trim_start_matches('@')
    }
}

#[derive(Debug, Deserialize)]
struct BridgeMedia {
    #[serde(rename = "type")]
    kind: String,
    url: String,
    #[serde(rename = "altText", default)]
    alt_text: Option<String>,
    #[serde(rename = "thumbnailUrl", default)]
    thumbnail_url: Option<String>,
}
