//! The normalised `Post`/`Media` record produced by adapters and the tier
//! engine, and consumed by the formatter, pipeline, and publisher.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upstream platform a post originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Twitter, reached via IFTTT webhook + scraper bridge.
    Twitter,
    /// The decentralised social graph (Bluesky-style AT Protocol API).
    Bluesky,
    /// Generic RSS 2.0 / Atom feeds.
    Rss,
    /// Video-platform channel feeds.
    Youtube,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Platform::Twitter => "twitter",
            Platform::Bluesky => "bluesky",
            Platform::Rss => "rss",
            Platform::Youtube => "youtube",
        };
        write!(f, "{s}")
    }
}

/// A single attachable media item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Media {
    /// Media kind.
    pub kind: MediaKind,
    /// Direct (or proxy) URL to the media resource.
    pub url: String,
    /// Accessibility alt text, if the upstream provided one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
    /// Pixel width, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Pixel height, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Thumbnail URL, for video/video_thumbnail items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    /// Title, for link cards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Description, for link cards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The kind of media attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// A still image.
    Image,
    /// A playable video.
    Video,
    /// An audio clip.
    Audio,
    /// An animated GIF.
    Gif,
    /// An unfurled link preview card.
    LinkCard,
    /// A video's static thumbnail, shown before playback.
    VideoThumbnail,
}

/// Maximum number of media items attachable to one outbound status.
pub const MAX_MEDIA_COUNT: usize = 4;

/// The author of a post.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Author {
    /// Platform-native handle, without the leading `@`.
    pub username: String,
    /// Human-readable display name.
    #[serde(default)]
    pub display_name: String,
    /// Link to the author's profile.
    #[serde(default)]
    pub profile_url: String,
}

/// A quoted post's minimal reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotedPost {
    /// Canonical URL of the quoted post.
    pub url: String,
    /// The quoted post's author handle.
    pub author: String,
}

/// The normalised record produced by an adapter or the Twitter tier engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    /// Upstream platform.
    pub platform: Platform,
    /// Platform-native identifier, unique within `(platform, source_id)`.
    pub id: String,
    /// Canonical link to the origin post.
    pub url: String,
    /// Feed title, for title-bearing sources only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Post body, already HTML-decoded. May be empty.
    #[serde(default)]
    pub text: String,
    /// Publication instant, used for ordering and `since` filtering.
    pub published_at: DateTime<Utc>,
    /// The post's author.
    pub author: Author,
    /// Ordered list of attachable media, at most [`MAX_MEDIA_COUNT`] survive
    /// to publish time.
    #[serde(default)]
    pub media: Vec<Media>,

    /// True when this post is a pure repost/retweet of another author's post.
    #[serde(default)]
    pub is_repost: bool,
    /// True when this post quotes another post with added commentary.
    #[serde(default)]
    pub is_quote: bool,
    /// True when this post is a reply to another post.
    #[serde(default)]
    pub is_reply: bool,
    /// True when this post is a non-root post within the author's own thread.
    #[serde(default)]
    pub is_thread_post: bool,
    /// True when this post carries a playable video.
    #[serde(default)]
    pub has_video: bool,

    /// Username of the account that performed the repost, when `is_repost`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reposted_by: Option<String>,
    /// Reference to the quoted post, when `is_quote`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quoted_post: Option<QuotedPost>,
    /// Parent post identifier/platform-URI, when `is_reply`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Parent post author handle, when `is_reply`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_handle: Option<String>,

    /// Opaque tier-specific/adapter-specific metadata carried downstream
    /// (e.g. `force_read_more`, `tier`, `truncated`).
    #[serde(default)]
    pub raw: HashMap<String, serde_json::Value>,
}

impl Post {
    /// Set a `raw` flag/value, returning `self` for chaining.
    pub fn with_raw(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.raw.insert(key.to_string(), value.into());
        self
    }

    /// Read a boolean `raw` flag, defaulting to `false` when absent.
    pub fn raw_flag(&self, key: &str) -> bool {
        self.raw.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
    }

    /// Drop media entries that should not reach publish time: when a
    /// playable video is present, `link_card` and `video_thumbnail` items
    /// are discarded, then the list is capped at [`MAX_MEDIA_COUNT`].
    pub fn publishable_media(&self) -> Vec<Media> {
        let has_video = self.media.iter().any(|m| m.kind == MediaKind::Video);
        let mut filtered: Vec<Media> = self
            .media
            .iter()
            .filter(|m| {
                if has_video {
                    !matches!(m.kind, MediaKind::LinkCard | MediaKind::VideoThumbnail)
                } else {
                    true
                }
            })
            .cloned()
            .collect();
        filtered.truncate(MAX_MEDIA_COUNT);
        filtered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_post() -> Post {
        Post {
            platform: Platform::Twitter,
            id: "1".into(),
            url: "https://twitter.com/foo/status/1".into(),
            title: None,
            text: "hello".into(),
            published_at: Utc::now(),
            author: Author {
                username: "foo".into(),
                display_name: "Foo".into(),
                profile_url: "https://twitter.com/foo".into(),
            },
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

    #[test]
    fn publishable_media_drops_link_card_when_video_present() {
        let mut post = base_post();
        post.media = vec![
            Media {
                kind: MediaKind::Video,
                url: "v.mp4".into(),
                alt_text: None,
                width: None,
                height: None,
                thumbnail_url: None,
                title: None,
                description: None,
            },
            Media {
                kind: MediaKind::LinkCard,
                url: "c.html".into(),
                alt_text: None,
                width: None,
                height: None,
                thumbnail_url: None,
                title: None,
                description: None,
            },
        ];
        let publishable = post.publishable_media();
        assert_eq!(publishable.len(), 1);
        assert_eq!(publishable[0].kind, MediaKind::Video);
    }

    #[test]
    fn publishable_media_caps_at_max_count() {
        let mut post = base_post();
        post.media = (0..6)
            .map(|i| Media {
                kind: MediaKind::Image,
                url: format!("img{i}.jpg"),
                alt_text: None,
                width: None,
                height: None,
                thumbnail_url: None,
                title: None,
                description: None,
            })
            .collect();
        assert_eq!(post.publishable_media().len(), MAX_MEDIA_COUNT);
    }

    #[test]
    fn raw_flag_defaults_false() {
        let post = base_post();
        assert!(!post.raw_flag("force_read_more"));
        let post = post.with_raw("force_read_more", true);
        assert!(post.raw_flag("force_read_more"));
    }
}
