//! Shared HTML-to-plain-text cleaning used by feed-style adapters (§4.2):
//! decode entities (including localised diacritics), strip tags, normalise
//! whitespace. A byte-budget pre-truncation runs first to bound memory on
//! pathological feed payloads.

use std::sync::OnceLock;

use regex::Regex;
use scraper::Html;

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"))
}

/// Pre-truncate `html` to at most `budget` bytes, cutting at the last
/// closing-tag boundary (`>`) at or before the budget so that well-formed
/// tags aren't split; falls back to the last open-tag boundary (`<`) when
/// no closing tag is found in range, so the remainder parses as plain text
/// rather than a dangling tag.
pub fn pre_truncate(html: &str, budget: usize) -> &str {
    if html.len() <= budget {
        return html;
    }
    let window = &html[..budget];
    if let Some(idx) = window.rfind('>') {
        return &html[..=idx];
    }
    if let Some(idx) = window.rfind('<') {
        return &html[..idx];
    }
    window
}

/// Decode HTML entities and strip tags, then collapse all whitespace runs
/// to a single space and trim the ends.
pub fn clean_html(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let text: String = fragment
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ");
    whitespace_re().replace_all(text.trim(), " ").into_owned()
}

/// Strip anything after the feed's root closing tag, tolerating trackers
/// injected after a well-formed `</rss>`/`</feed>`/`</rdf:RDF>` (§4.2).
pub fn strip_after_root_close(xml: &str) -> &str {
    const CLOSERS: [&str; 3] = ["</rss>", "</feed>", "</rdf:RDF>"];
    let mut best: Option<usize> = None;
    for closer in CLOSERS {
        if let Some(idx) = xml.find(closer) {
            let end = idx + closer.len();
            best = Some(best.map_or(end, |b: usize| b.min(end)));
        }
    }
    match best {
        Some(end) => &xml[..end],
        None => xml,
    }
}
