//! Pipeline stage 7: URL processing (§4.5 step 7).
//!
//! Strips tracking parameters from URLs (except on an allow-list of
//! shortened-URL/social hosts, where query strings are part of the
//! identity), rewrites per-source domains to a target domain, drops URLs
//! visibly truncated with a trailing ellipsis, and dedupes repeated URLs
//! at the tail of the text.

use std::sync::OnceLock;

use regex::Regex;
use url::Url;

/// Hosts whose query string is part of the URL's identity (shortener slugs,
/// social-share links) and must survive tracking-parameter stripping.
const TRACKING_STRIP_ALLOWLIST: &[&str] = &["t.co", "bit.ly", "buff.ly", "ift.tt", "youtu.be"];

/// Query parameter name prefixes/exact names stripped as tracking noise.
const TRACKING_PARAM_PREFIXES: &[&str] = &["utm_"];
const TRACKING_PARAM_NAMES: &[&str] = &["fbclid", "gclid"];

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://[^\s]+").expect("url regex"))
}

/// Run every URL in `text` through tracking-parameter stripping and domain
/// rewriting, drop visibly truncated URLs, and dedupe repeated trailing
/// URLs.
pub fn process_urls(text: &str, rewrite_domains: &[String], target_domain: &str) -> String {
    let stripped = url_re()
        .replace_all(text, |caps: &regex::Captures| process_one_url(&caps[0], rewrite_domains, target_domain))
        .into_owned();
    let without_truncated = drop_truncated_urls(&stripped);
    let deduped = dedupe_trailing_urls(&without_truncated);
    collapse_whitespace(&deduped)
}

fn process_one_url(raw: &str, rewrite_domains: &[String], target_domain: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else { return raw.to_string() };

    let host = url.host_str().unwrap_or_default().to_string();
    if !is_allowlisted(&host) {
        strip_tracking_params(&mut url);
    }

    if rewrite_domains.iter().any(|d| host.eq_ignore_ascii_case(d)) {
        let _ = url.set_host(Some(target_domain));
    }

    url.to_string()
}

fn is_allowlisted(host: &str) -> bool {
    TRACKING_STRIP_ALLOWLIST.iter().any(|h| host.eq_ignore_ascii_case(h))
}

fn strip_tracking_params(url: &mut Url) {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in &kept {
            serializer.append_pair(k, v);
        }
        url.set_query(Some(&serializer.finish()));
    }
}

fn is_tracking_param(name: &str) -> bool {
    let lower = name.to_lowercase();
    TRACKING_PARAM_PREFIXES.iter().any(|p| lower.starts_with(p)) || TRACKING_PARAM_NAMES.contains(&lower.as_str())
}

/// Remove any URL token that is itself visibly truncated with a trailing
/// ellipsis (e.g. a link a upstream platform cut off mid-path).
fn drop_truncated_urls(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_end = 0;
    for m in url_re().find_iter(text) {
        let token = m.as_str();
        out.push_str(&text[last_end..m.start()]);
        if token.ends_with('…') || token.ends_with("...") {
            // Drop the token entirely; trim the space that preceded it too.
            while out.ends_with(' ') {
                out.pop();
            }
        } else {
            out.push_str(token);
        }
        last_end = m.end();
    }
    out.push_str(&text[last_end..]);
    out
}

/// Collapse a run of identical URLs at the very end of the text (e.g. a
/// repost that duplicated the canonical link) down to a single occurrence.
fn dedupe_trailing_urls(text: &str) -> String {
    let urls: Vec<&str> = url_re().find_iter(text).map(|m| m.as_str()).collect();
    if urls.len() < 2 {
        return text.to_string();
    }
    let last = urls[urls.len() - 1];
    let mut trailing_run = 1;
    for u in urls[..urls.len() - 1].iter().rev() {
        if *u == last {
            trailing_run += 1;
        } else {
            break;
        }
    }
    if trailing_run < 2 {
        return text.to_string();
    }

    // Drop all but the last occurrence of the trailing run.
    let mut out = text.to_string();
    for _ in 0..trailing_run - 1 {
        if let Some(pos) = out.find(last) {
            out.replace_range(pos..pos + last.len(), "");
        }
    }
    collapse_whitespace(&out)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_utm_and_click_id_params() {
        let out = process_one_url(
            "https://example.com/post?utm_source=twitter&utm_medium=social&id=5&fbclid=abc&gclid=xyz",
            &[],
            "",
        );
        assert_eq!(out, "https://example.com/post?id=5");
    }

    #[test]
    fn allowlisted_host_keeps_its_query_string() {
        let out = process_one_url("https://t.co/abc123?utm_source=twitter", &[], "");
        assert_eq!(out, "https://t.co/abc123?utm_source=twitter");
    }

    #[test]
    fn rewrite_domains_substitutes_host() {
        let out = process_one_url("https://old.example.com/a/b", &["old.example.com".to_string()], "new.example.com");
        assert_eq!(out, "https://new.example.com/a/b");
    }

    #[test]
    fn drop_truncated_urls_removes_ellipsis_terminated_link() {
        let out = drop_truncated_urls("check this out https://example.com/a/very/long/path…");
        assert_eq!(out, "check this out");
    }

    #[test]
    fn dedupe_trailing_urls_collapses_repeated_tail_link() {
        let out = dedupe_trailing_urls("see https://example.com/x https://example.com/x https://example.com/x");
        assert_eq!(out, "see https://example.com/x");
    }

    #[test]
    fn process_urls_runs_full_pipeline() {
        let out = process_urls(
            "new post https://old.example.com/p?utm_source=rss https://old.example.com/p?utm_source=rss",
            &["old.example.com".to_string()],
            "new.example.com",
        );
        assert_eq!(out, "new post https://new.example.com/p");
    }
}
