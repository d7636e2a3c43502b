//! Generic RSS 2.0 / Atom feed adapter (§4.2).
//!
//! Fetches with GET, follows up to [`super::MAX_REDIRECTS`] redirects,
//! strips anything injected after the feed's root closing tag, pre-
//! truncates oversized item bodies before HTML-cleaning them, and parses
//! either `channel/item` (RSS 2.0) or `entry` (Atom) shapes.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::html_clean::{clean_html, pre_truncate, strip_after_root_close};
use super::{filter_since, get_following_redirects, Adapter};
use crate::error::AdapterError;
use crate::model::{Author, Platform, Post};

/// Default per-item HTML byte budget before cleaning, bounding memory on
/// pathological feed payloads (§4.2).
pub const DEFAULT_HTML_BYTE_BUDGET: usize = 256 * 1024;

/// RSS/Atom feed adapter.
pub struct RssAdapter {
    source_id: String,
    feed_url: String,
    client: reqwest::Client,
    html_byte_budget: usize,
}

impl RssAdapter {
    /// Create a new RSS/Atom adapter for `feed_url`.
    pub fn new(source_id: impl Into<String>, feed_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            source_id: source_id.into(),
            feed_url: feed_url.into(),
            client,
            html_byte_budget: DEFAULT_HTML_BYTE_BUDGET,
        }
    }

    /// Override the default HTML byte budget.
    pub fn with_html_byte_budget(mut self, budget: usize) -> Self {
        self.html_byte_budget = budget;
        self
    }

    fn clean(&self, html: &str) -> String {
        clean_html(pre_truncate(html, self.html_byte_budget))
    }
}

#[async_trait::async_trait]
impl Adapter for RssAdapter {
    fn platform(&self) -> Platform {
        Platform::Rss
    }

    async fn fetch(&self, since: Option<DateTime<Utc>>, limit: usize) -> Result<Vec<Post>, AdapterError> {
        let response = get_following_redirects(&self.client, &self.feed_url).await?;
        let body = response.text().await.map_err(|e| AdapterError::Network {
            source_id: self.source_id.clone(),
            source: e,
        })?;
        let body = strip_after_root_close(&body);

        let posts = match detect_format(body) {
            FeedFormat::Atom => self.parse_atom(body)?,
            FeedFormat::Rss => self.parse_rss(body)?,
        };

        let mut posts = filter_since(posts, since);
        posts.truncate(limit);
        Ok(posts)
    }
}

impl RssAdapter {
    fn parse_rss(&self, xml: &str) -> Result<Vec<Post>, AdapterError> {
        let doc: RssDoc = quick_xml::de::from_str(xml).map_err(|e| AdapterError::ParseFailure {
            source_id: self.source_id.clone(),
            message: format!("RSS parse error: {e}"),
        })?;

        Ok(doc
            .channel
            .items
            .into_iter()
            .map(|item| {
                let id = item
                    .guid
                    .as_ref()
                    .and_then(|g| g.value.clone())
                    .or_else(|| item.link.clone())
                    .unwrap_or_default();
                let published_at = item
                    .pub_date
                    .as_deref()
                    .and_then(parse_rfc2822_or_3339)
                    .unwrap_or_else(Utc::now);
                Post {
                    platform: Platform::Rss,
                    id,
                    url: item.link.clone().unwrap_or_default(),
                    title: item.title.clone(),
                    text: item.description.as_deref().map(|d| self.clean(d)).unwrap_or_default(),
                    published_at,
                    author: Author {
                        username: item.author.clone().unwrap_or_default(),
                        display_name: item.author.unwrap_or_default(),
                        profile_url: String::new(),
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
                    raw: Default::default(),
                }
            })
            .collect())
    }

    fn parse_atom(&self, xml: &str) -> Result<Vec<Post>, AdapterError> {
        let doc: AtomDoc = quick_xml::de::from_str(xml).map_err(|e| AdapterError::ParseFailure {
            source_id: self.source_id.clone(),
            message: format!("Atom parse error: {e}"),
        })?;

        Ok(doc
            .entries
            .into_iter()
            .map(|entry| {
                let link = entry
                    .links
                    .iter()
                    .find(|l| l.rel.as_deref().unwrap_or("alternate") == "alternate")
                    .or_else(|| entry.links.first())
                    .and_then(|l| l.href.clone())
                    .unwrap_or_default();
                let raw_body = entry
                    .content
                    .as_ref()
                    .and_then(|c| c.value.clone())
                    .or_else(|| entry.summary.clone())
                    .unwrap_or_default();
                let published_at = entry
                    .published
                    .as_deref()
                    .or(entry.updated.as_deref())
                    .and_then(parse_rfc2822_or_3339)
                    .unwrap_or_else(Utc::now);
                Post {
                    platform: Platform::Rss,
                    id: entry.id.clone().unwrap_or_else(|| link.clone()),
                    url: link,
                    title: entry.title.clone(),
                    text: self.clean(&raw_body),
                    published_at,
                    author: Author {
                        username: entry
                            .author
                            .as_ref()
                            .and_then(|a| a.name.clone())
                            .unwrap_or_default(),
                        display_name: entry
                            .author
                            .as_ref()
                            .and_then(|a| a.name.clone())
                            .unwrap_or_default(),
                        profile_url: String::new(),
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
                    raw: Default::default(),
                }
            })
            .collect())
    }
}

enum FeedFormat {
    Rss,
    Atom,
}

fn detect_format(xml: &str) -> FeedFormat {
    let rss_pos = xml.find("<rss").or_else(|| xml.find("<rdf:RDF"));
    let atom_pos = xml.find("<feed");
    match (rss_pos, atom_pos) {
        (Some(r), Some(a)) if a < r => FeedFormat::Atom,
        (Some(_), _) => FeedFormat::Rss,
        (None, Some(_)) => FeedFormat::Atom,
        (None, None) => FeedFormat::Rss,
    }
}

fn parse_rfc2822_or_3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(s)
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[derive(Debug, Deserialize)]
struct RssDoc {
    channel: RssChannel,
}

#[derive(Debug, Deserialize)]
struct RssChannel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    guid: Option<RssGuid>,
    description: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    author: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RssGuid {
    #[serde(rename = "$text")]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomDoc {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<String>,
    id: Option<String>,
    updated: Option<String>,
    published: Option<String>,
    summary: Option<String>,
    content: Option<AtomContent>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    author: Option<AtomAuthor>,
}

#[derive(Debug, Deserialize)]
struct AtomContent {
    #[serde(rename = "$text")]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomAuthor {
    name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> RssAdapter {
        RssAdapter::new("src", "https://example.com/feed.xml", super::super::build_http_client("newsgate-test"))
    }

    #[test]
    fn detects_rss_format() {
        assert!(matches!(detect_format("<?xml version=\"1.0\"?><rss></rss>"), FeedFormat::Rss));
    }

    #[test]
    fn detects_atom_format() {
        assert!(matches!(detect_format("<?xml version=\"1.0\"?><feed></feed>"), FeedFormat::Atom));
    }

    #[test]
    fn parses_rss_items() {
        let xml = r#"<rss><channel>
            <item>
                <title>Hello</title>
                <link>https://example.com/1</link>
                <guid isPermaLink="false">abc-1</guid>
                <description>&lt;p&gt;Body &amp; more&lt;/p&gt;</description>
                <pubDate>Mon, 01 Jan 2024 10:00:00 GMT</pubDate>
                <author>jane@example.com (Jane)</author>
            </item>
        </channel></rss>"#;
        let posts = adapter().parse_rss(xml).unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, "abc-1");
        assert_eq!(posts[0].text, "Body & more");
        assert_eq!(posts[0].title.as_deref(), Some("Hello"));
    }

    #[test]
    fn parses_atom_entries() {
        let xml = r#"<feed>
            <entry>
                <title>Atom Post</title>
                <id>tag:example.com,2024:1</id>
                <published>2024-01-01T10:00:00Z</published>
                <link rel="alternate" href="https://example.com/atom/1"/>
                <summary>Plain summary</summary>
                <author><name>Jane</name></author>
            </entry>
        </feed>"#;
        let posts = adapter().parse_atom(xml).unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].url, "https://example.com/atom/1");
        assert_eq!(posts[0].text, "Plain summary");
        assert_eq!(posts[0].author.username, "Jane");
    }

    #[test]
    fn malformed_xml_is_parse_failure() {
        let err = adapter().parse_rss("<rss><channel><item><title>unterminated").unwrap_err();
        assert!(matches!(err, AdapterError::ParseFailure { .. }));
    }
}
