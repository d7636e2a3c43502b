//! Video-platform channel feed adapter (§4.2).
//!
//! Requires an explicit `UC…` channel id — handle-to-id resolution is
//! deprecated upstream and rejected at config-validation time, never
//! silently retried with a scraping fallback (§9). Parses the MRSS
//! `media:group` extension for description, thumbnail, view count, and
//! ratings.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{filter_since, Adapter};
use crate::error::AdapterError;
use crate::model::{Author, Media, MediaKind, Platform, Post};

/// Fallback thumbnail template when the feed advertises none.
const FALLBACK_THUMBNAIL: &str = "https://i.ytimg.com/vi/{video_id}/hqdefault.jpg";

/// Video-platform channel adapter.
pub struct YoutubeAdapter {
    source_id: String,
    channel_id: String,
    exclude_shorts: bool,
    client: reqwest::Client,
}

impl YoutubeAdapter {
    /// Create a new adapter for an explicit `UC…` channel id.
    pub fn new(
        source_id: impl Into<String>,
        channel_id: impl Into<String>,
        exclude_shorts: bool,
        client: reqwest::Client,
    ) -> Result<Self, AdapterError> {
        let source_id = source_id.into();
        let channel_id = channel_id.into();
        if !channel_id.starts_with("UC") {
            return Err(AdapterError::UnsupportedConfig {
                source_id,
                message: "channel_id must be an explicit UC… id; handle-to-id resolution is unsupported".to_string(),
            });
        }
        Ok(Self {
            source_id,
            channel_id,
            exclude_shorts,
            client,
        })
    }

    fn feed_url(&self) -> String {
        if self.exclude_shorts {
            // Substitute the UC… prefix with UULF… to target the uploads
            // playlist with Shorts excluded.
            let playlist_id = format!("UULF{}", &self.channel_id[2..]);
            format!("https://www.youtube.com/feeds/videos.xml?playlist_id={playlist_id}")
        } else {
            format!("https://www.youtube.com/feeds/videos.xml?channel_id={}", self.channel_id)
        }
    }
}

#[async_trait::async_trait]
impl Adapter for YoutubeAdapter {
    fn platform(&self) -> Platform {
        Platform::Youtube
    }

    async fn fetch(&self, since: Option<DateTime<Utc>>, limit: usize) -> Result<Vec<Post>, AdapterError> {
        let url = self.feed_url();
        let response = self.client.get(&url).send().await.map_err(|e| AdapterError::Network {
            source_id: self.source_id.clone(),
            source: e,
        })?;

        let status = response.status().as_u16();
        if matches!(status, 404 | 500 | 502 | 503) {
            return Err(AdapterError::Transient {
                source_id: self.source_id.clone(),
                message: format!("upstream returned HTTP {status}"),
            });
        }

        let body = response.text().await.map_err(|e| AdapterError::Network {
            source_id: self.source_id.clone(),
            source: e,
        })?;

        let feed: YtFeed = quick_xml::de::from_str(&body).map_err(|e| AdapterError::ParseFailure {
            source_id: self.source_id.clone(),
            message: format!("YouTube feed parse error: {e}"),
        })?;

        let posts = feed.entries.into_iter().map(|e| self.entry_to_post(e)).collect();
        let mut posts = filter_since(posts, since);
        posts.truncate(limit);
        Ok(posts)
    }
}

impl YoutubeAdapter {
    fn entry_to_post(&self, entry: YtEntry) -> Post {
        let video_id = entry.video_id.clone().unwrap_or_default();
        let link = entry
            .links
            .first()
            .and_then(|l| l.href.clone())
            .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={video_id}"));

        let group = entry.group.unwrap_or_default();
        let description = group.description.unwrap_or_default();

        let best_thumbnail = group
            .thumbnails
            .iter()
            .max_by_key(|t| t.width.unwrap_or(0) * t.height.unwrap_or(0))
            .cloned();

        let thumbnail_url = best_thumbnail
            .as_ref()
            .map(|t| t.url.clone())
            .unwrap_or_else(|| FALLBACK_THUMBNAIL.replace("{video_id}", &video_id));

        let media = vec![Media {
            kind: MediaKind::VideoThumbnail,
            url: thumbnail_url,
            alt_text: None,
            width: best_thumbnail.as_ref().and_then(|t| t.width),
            height: best_thumbnail.as_ref().and_then(|t| t.height),
            thumbnail_url: None,
            title: None,
            description: None,
        }];

        let published_at = entry
            .published
            .as_deref()
            .or(entry.updated.as_deref())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let mut raw = std::collections::HashMap::new();
        if let Some(stats) = &group.community.as_ref().and_then(|c| c.statistics.as_ref()) {
            if let Some(views) = &stats.views {
                raw.insert("view_count".to_string(), serde_json::Value::from(views.clone()));
            }
        }
        if let Some(rating) = group.community.as_ref().and_then(|c| c.star_rating.as_ref()) {
            if let Some(average) = rating.average {
                raw.insert(
                    "rating_average".to_string(),
                    serde_json::Value::from(average),
                );
            }
        }

        Post {
            platform: Platform::Youtube,
            id: video_id,
            url: link.clone(),
            title: entry.title.clone(),
            text: description,
            published_at,
            author: Author {
                username: entry.author.as_ref().and_then(|a| a.name.clone()).unwrap_or_default(),
                display_name: entry.author.as_ref().and_then(|a| a.name.clone()).unwrap_or_default(),
                profile_url: entry.author.as_ref().and_then(|a| a.uri.clone()).unwrap_or_default(),
            },
            media,
            is_repost: false,
            is_quote: false,
            is_reply: false,
            is_thread_post: false,
            has_video: true,
            reposted_by: None,
            quoted_post: None,
            reply_to: None,
            reply_to_handle: None,
            raw,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct YtFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<YtEntry>,
}

#[derive(Debug, Deserialize)]
struct YtEntry {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
    title: Option<String>,
    published: Option<String>,
    updated: Option<String>,
    #[serde(rename = "link", default)]
    links: Vec<YtLink>,
    author: Option<YtAuthor>,
    #[serde(rename = "group")]
    group: Option<YtGroup>,
}

#[derive(Debug, Deserialize)]
struct YtLink {
    #[serde(rename = "@href")]
    href: Option<String>,
}

#[derive(Debug, Deserialize)]
struct YtAuthor {
    name: Option<String>,
    uri: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct YtGroup {
    description: Option<String>,
    #[serde(rename = "thumbnail", default)]
    thumbnails: Vec<YtThumbnail>,
    community: Option<YtCommunity>,
}

#[derive(Debug, Clone, Deserialize)]
struct YtThumbnail {
    #[serde(rename = "@url")]
    url: String,
    #[serde(rename = "@width")]
    width: Option<u32>,
    #[serde(rename = "@height")]
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct YtCommunity {
    #[serde(rename = "starRating")]
    star_rating: Option<YtStarRating>,
    statistics: Option<YtStatistics>,
}

#[derive(Debug, Deserialize)]
struct YtStarRating {
    #[serde(rename = "@average")]
    average: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct YtStatistics {
    #[serde(rename = "@views")]
    views: Option<String>,
}
