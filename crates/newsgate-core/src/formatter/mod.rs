//! The Formatter (Component C): a single universal implementation
//! parameterised by platform, producing the final microblog text from a
//! `Post` plus per-source `FormattingConfig`. Pure functions; no I/O.

mod mentions;
mod trim;
mod urls;

pub use mentions::transform_mentions;
pub use trim::trim_to_length;
pub use urls::rewrite_domains;

use std::sync::OnceLock;

use regex::Regex;

use crate::config::{FormattingConfig, TitleMode};
use crate::model::Post;

fn ellipsis_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\.{3,}|…{2,}").expect("ellipsis regex"))
}

fn photo_video_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:/photo/\d+|/video/\d+|#m)(?:\s|$)").expect("marker regex")
    })
}

/// Normalise runs of `.` or `…` down to a single `…` (§4.3 post-processing).
pub fn normalize_ellipsis(text: &str) -> String {
    ellipsis_re().replace_all(text, "…").into_owned()
}

/// Strip platform-internal `/photo/N`, `/video/N`, and `#m` quote-marker
/// URL suffixes — they are materialised as media or reinserted cleanly by
/// the pipeline's URL-processing step.
pub fn strip_internal_markers(text: &str) -> String {
    photo_video_marker_re().replace_all(text, " ").trim().to_string()
}

/// Build the body text for a post, before trimming/URL-processing (those
/// are separate pipeline stages, §4.5 steps 6-7). This stage only decides
/// *which* template applies and glues title/content/context together.
pub fn format_post(post: &Post, cfg: &FormattingConfig) -> String {
    let body = match cfg.title_mode {
        TitleMode::Text => post.text.clone(),
        TitleMode::Title => post.title.clone().unwrap_or_default(),
        TitleMode::Combined => match &post.title {
            Some(title) if !title.is_empty() => {
                format!("{title}{}{}", cfg.title_separator, post.text)
            }
            _ => post.text.clone(),
        },
    };

    let with_mentions = transform_mentions(&body, cfg.mentions_mode, &cfg.mentions_domain);

    let text = if post.is_repost {
        let author = post
            .reposted_by
            .as_deref()
            .unwrap_or(post.author.username.as_str());
        format!(
            "{} {} @{}:\n{}\n{}",
            cfg.source_name, cfg.prefix_repost, author, with_mentions, post.url
        )
    } else if post.is_quote {
        let quoted_url = post
            .quoted_post
            .as_ref()
            .map(|q| q.url.as_str())
            .unwrap_or(post.url.as_str());
        format!("{with_mentions}\n{quoted_url}")
    } else if post.is_thread_post {
        format!("{} {with_mentions}\n{}", cfg.thread_indicator, post.url)
    } else if cfg.move_url_to_end && !post.url.is_empty() {
        format!("{with_mentions}\n{}", post.url)
    } else {
        with_mentions
    };

    let text = normalize_ellipsis(&text);
    strip_internal_markers(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Author, Platform};
    use std::collections::HashMap;

    fn base_post() -> Post {
        Post {
            platform: Platform::Rss,
            id: "1".into(),
            url: "https://example.com/post/1".into(),
            title: None,
            text: "Hello world".into(),
            published_at: chrono::Utc::now(),
            author: Author {
                username: "foo".into(),
                display_name: "Foo".into(),
                profile_url: "https://example.com/foo".into(),
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
    fn regular_post_moves_url_to_end() {
        let post = base_post();
        let cfg = FormattingConfig {
            move_url_to_end: true,
            ..Default::default()
        };
        let out = format_post(&post, &cfg);
        assert_eq!(out, "Hello world\nhttps://example.com/post/1");
    }

    #[test]
    fn repost_uses_template() {
        let mut post = base_post();
        post.is_repost = true;
        post.reposted_by = Some("bar".into());
        let cfg = FormattingConfig {
            source_name: "MySource".into(),
            prefix_repost: "RT".into(),
            ..Default::default()
        };
        let out = format_post(&post, &cfg);
        assert_eq!(
            out,
            "MySource RT @bar:\nHello world\nhttps://example.com/post/1"
        );
    }

    #[test]
    fn ellipsis_normalized() {
        assert_eq!(normalize_ellipsis("wait......"), "wait…");
        assert_eq!(normalize_ellipsis("done……"), "done…");
        assert_eq!(normalize_ellipsis("fine."), "fine.");
    }

    #[test]
    fn strips_photo_marker() {
        assert_eq!(strip_internal_markers("look /photo/1 here"), "look  here");
    }

    #[test]
    fn title_bearing_modes() {
        let mut post = base_post();
        post.title = Some("Breaking News".into());
        post.url = String::new();

        let text_only = format_post(
            &post,
            &FormattingConfig {
                title_mode: TitleMode::Text,
                move_url_to_end: false,
                ..Default::default()
            },
        );
        assert_eq!(text_only, "Hello world");

        let title_only = format_post(
            &post,
            &FormattingConfig {
                title_mode: TitleMode::Title,
                move_url_to_end: false,
                ..Default::default()
            },
        );
        assert_eq!(title_only, "Breaking News");

        let combined = format_post(
            &post,
            &FormattingConfig {
                title_mode: TitleMode::Combined,
                title_separator: ": ".into(),
                move_url_to_end: false,
                ..Default::default()
            },
        );
        assert_eq!(combined, "Breaking News: Hello world");
    }
}
