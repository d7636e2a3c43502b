//! Pipeline stage 3: content filtering (§4.5 step 3).
//!
//! A post is skipped when it is a reply/retweet/quote the source has opted
//! out of, when it matches any `banned` rule, or when it fails to match at
//! least one `required` rule (an empty `required` list allows everything).

use regex::Regex;

use crate::config::{FilterNode, FilterRule, FilteringConfig};
use crate::model::Post;

/// Decide whether `post` should be skipped, returning the skip reason if so.
pub fn should_skip(post: &Post, filtering: &FilteringConfig) -> Option<String> {
    if filtering.skip_replies && post.is_reply {
        return Some("skip_replies".to_string());
    }
    if filtering.skip_retweets && post.is_repost {
        return Some("skip_retweets".to_string());
    }
    if filtering.skip_quotes && post.is_quote {
        return Some("skip_quotes".to_string());
    }

    let haystack = format!("{} {}", post.title.as_deref().unwrap_or_default(), post.text);

    if filtering.banned.iter().any(|rule| evaluate_rule(rule, &haystack)) {
        return Some("banned_rule_matched".to_string());
    }

    if !filtering.required.is_empty() && !filtering.required.iter().any(|rule| evaluate_rule(rule, &haystack)) {
        return Some("required_rule_not_matched".to_string());
    }

    None
}

/// Evaluate one rule-tree node against `text`.
pub fn evaluate_rule(rule: &FilterRule, text: &str) -> bool {
    match rule {
        FilterRule::Literal(pattern) => contains_ci(text, pattern),
        FilterRule::Node(node) => evaluate_node(node, text),
    }
}

fn evaluate_node(node: &FilterNode, text: &str) -> bool {
    match node {
        FilterNode::Literal { pattern } => contains_ci(text, pattern),
        FilterNode::Regex { pattern, flags } => regex_matches(pattern, flags, text),
        FilterNode::And { content } => content.iter().all(|rule| evaluate_rule(rule, text)),
        FilterNode::Or { content } => content.iter().any(|rule| evaluate_rule(rule, text)),
        FilterNode::Not { content } => !content.iter().any(|rule| evaluate_rule(rule, text)),
    }
}

fn contains_ci(text: &str, pattern: &str) -> bool {
    text.to_lowercase().contains(&pattern.to_lowercase())
}

fn regex_matches(pattern: &str, flags: &str, text: &str) -> bool {
    let prefix = if flags.is_empty() { String::new() } else { format!("(?{flags})") };
    match Regex::new(&format!("{prefix}{pattern}")) {
        Ok(re) => re.is_match(text),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Author, Platform};
    use std::collections::HashMap;

    fn post_with_text(text: &str) -> Post {
        Post {
            platform: Platform::Rss,
            id: "1".to_string(),
            url: "https://example.com/1".to_string(),
            title: None,
            text: text.to_string(),
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

    #[test]
    fn bare_literal_matches_case_insensitively() {
        let rule = FilterRule::Literal("Hello".to_string());
        assert!(evaluate_rule(&rule, "say hello world"));
        assert!(!evaluate_rule(&rule, "say goodbye"));
    }

    #[test]
    fn regex_node_matches_pattern() {
        let rule = FilterRule::Node(FilterNode::Regex { pattern: r"\bgiveaway\b".to_string(), flags: "i".to_string() });
        assert!(evaluate_rule(&rule, "enter our GIVEAWAY today"));
        assert!(!evaluate_rule(&rule, "no prizes here"));
    }

    #[test]
    fn and_requires_every_sub_rule() {
        let rule = FilterRule::Node(FilterNode::And {
            content: vec![FilterRule::Literal("foo".to_string()), FilterRule::Literal("bar".to_string())],
        });
        assert!(evaluate_rule(&rule, "foo and bar together"));
        assert!(!evaluate_rule(&rule, "only foo here"));
    }

    #[test]
    fn or_requires_any_sub_rule() {
        let rule = FilterRule::Node(FilterNode::Or {
            content: vec![FilterRule::Literal("foo".to_string()), FilterRule::Literal("bar".to_string())],
        });
        assert!(evaluate_rule(&rule, "only bar here"));
        assert!(!evaluate_rule(&rule, "neither one"));
    }

    #[test]
    fn not_inverts_its_content() {
        let rule = FilterRule::Node(FilterNode::Not { content: vec![FilterRule::Literal("spam".to_string())] });
        assert!(evaluate_rule(&rule, "a clean post"));
        assert!(!evaluate_rule(&rule, "this is spam"));
    }

    #[test]
    fn should_skip_skip_replies_short_circuits_before_rules() {
        let filtering = FilteringConfig { skip_replies: true, ..Default::default() };
        let mut post = post_with_text("hello");
        post.is_reply = true;
        assert_eq!(should_skip(&post, &filtering), Some("skip_replies".to_string()));
    }

    #[test]
    fn should_skip_banned_rule_matched() {
        let filtering = FilteringConfig { banned: vec![FilterRule::Literal("hello".to_string())], ..Default::default() };
        assert_eq!(should_skip(&post_with_text("say hello"), &filtering), Some("banned_rule_matched".to_string()));
    }

    #[test]
    fn should_skip_required_rule_not_matched() {
        let filtering = FilteringConfig { required: vec![FilterRule::Literal("rust".to_string())], ..Default::default() };
        assert_eq!(
            should_skip(&post_with_text("talking about python"), &filtering),
            Some("required_rule_not_matched".to_string())
        );
        assert_eq!(should_skip(&post_with_text("talking about rust"), &filtering), None);
    }

    #[test]
    fn should_skip_allows_when_no_rules_configured() {
        assert_eq!(should_skip(&post_with_text("anything goes"), &FilteringConfig::default()), None);
    }
}
