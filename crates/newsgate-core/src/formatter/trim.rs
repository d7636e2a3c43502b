//! Length-budget trimming (§4.3, property 3 in §8): after formatting, the
//! post must fit `max_length`, and a trailing canonical URL must survive
//! trimming — the budget applies only to the body segment, never the URL.

use crate::config::TrimStrategy;

const SENTENCE_TERMINATORS: [char; 3] = ['.', '!', '?'];

/// Trim `text` to fit `max_length` characters using `strategy`. If the text
/// ends with a `\n<url>` segment, that segment is carved off first and
/// reattached untouched after the body is trimmed to the remaining budget.
pub fn trim_to_length(
    text: &str,
    max_length: usize,
    strategy: TrimStrategy,
    smart_tolerance_pct: u8,
) -> String {
    if text.chars().count() <= max_length {
        return text.to_string();
    }

    let (body, trailing_url) = split_trailing_url(text);

    let url_cost = trailing_url.map(|u| u.chars().count() + 1).unwrap_or(0);
    let budget = max_length.saturating_sub(url_cost);

    let trimmed_body = trim_body(body, budget, strategy, smart_tolerance_pct);

    match trailing_url {
        Some(url) => format!("{trimmed_body}\n{url}"),
        None => trimmed_body,
    }
}

/// Split off a trailing `\n<url>` line, if present.
fn split_trailing_url(text: &str) -> (&str, Option<&str>) {
    if let Some(idx) = text.rfind('\n') {
        let candidate = &text[idx + 1..];
        if candidate.starts_with("http://") || candidate.starts_with("https://") {
            return (&text[..idx], Some(candidate));
        }
    }
    (text, None)
}

fn trim_body(body: &str, budget: usize, strategy: TrimStrategy, tolerance_pct: u8) -> String {
    if body.chars().count() <= budget {
        return body.to_string();
    }
    if budget == 0 {
        return String::new();
    }

    match strategy {
        TrimStrategy::Hard => hard_trim(body, budget),
        TrimStrategy::Word => word_trim(body, budget),
        TrimStrategy::Smart => smart_trim(body, budget, tolerance_pct),
    }
}

/// Exact cut to `budget - 1` characters plus an ellipsis.
fn hard_trim(body: &str, budget: usize) -> String {
    if budget <= 1 {
        return "…".chars().take(budget).collect();
    }
    let cut: String = body.chars().take(budget - 1).collect();
    format!("{cut}…")
}

/// Cut at the last whitespace boundary at or before `budget - 1` chars,
/// then append an ellipsis.
fn word_trim(body: &str, budget: usize) -> String {
    let chars: Vec<char> = body.chars().collect();
    let limit = budget.saturating_sub(1).min(chars.len());
    let mut cut_at = limit;
    while cut_at > 0 && !chars[cut_at - 1].is_whitespace() {
        cut_at -= 1;
    }
    if cut_at == 0 {
        // No whitespace boundary at all: fall back to a hard cut.
        return hard_trim(body, budget);
    }
    let trimmed: String = chars[..cut_at].iter().collect();
    format!("{}…", trimmed.trim_end())
}

/// Prefer the last sentence boundary within `tolerance_pct` of `budget`;
/// fall back to a word trim when no boundary is found in range.
fn smart_trim(body: &str, budget: usize, tolerance_pct: u8) -> String {
    let chars: Vec<char> = body.chars().collect();
    if budget >= chars.len() {
        return body.to_string();
    }

    let tolerance = budget * tolerance_pct as usize / 100;
    let window_start = budget.saturating_sub(tolerance);

    let mut best: Option<usize> = None;
    for idx in (window_start..budget.min(chars.len())).rev() {
        if SENTENCE_TERMINATORS.contains(&chars[idx]) {
            best = Some(idx + 1);
            break;
        }
    }

    match best {
        Some(cut_at) => chars[..cut_at].iter().collect(),
        None => word_trim(body, budget),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_untouched() {
        let text = "short";
        assert_eq!(trim_to_length(text, 100, TrimStrategy::Smart, 10), text);
    }

    #[test]
    fn trailing_url_preserved_through_trim() {
        let body = "a".repeat(50);
        let text = format!("{body}\nhttps://example.com/status/42");
        let out = trim_to_length(&text, 30, TrimStrategy::Hard, 10);
        assert!(out.ends_with("https://example.com/status/42"));
        assert!(out.len() < text.len());
    }

    #[test]
    fn hard_trim_exact_cut_plus_ellipsis() {
        let out = hard_trim("abcdefghij", 5);
        assert_eq!(out, "abcd…");
    }

    #[test]
    fn word_trim_cuts_at_whitespace() {
        let out = word_trim("hello brave new world", 12);
        assert_eq!(out, "hello brave…");
    }

    #[test]
    fn smart_trim_prefers_sentence_boundary() {
        let body = "First sentence here. Second sentence continues on and on and on.";
        let out = smart_trim(body, 25, 40);
        assert_eq!(out, "First sentence here.");
    }

    #[test]
    fn smart_trim_falls_back_to_word_when_no_boundary_in_window() {
        let body = "nopunctuationatallinthisverylongrunonsentencekeepsgoingandgoing andgoing";
        let out = trim_to_length(body, 30, TrimStrategy::Smart, 10);
        assert!(out.chars().count() <= 30);
        assert!(out.ends_with('…'));
    }

    #[test]
    fn property_length_budget_respected_with_url() {
        let body = "x".repeat(300);
        let text = format!("{body}\nhttps://example.com/p/1");
        let out = trim_to_length(&text, 280, TrimStrategy::Smart, 10);
        assert!(out.chars().count() <= 280);
        assert!(out.ends_with("https://example.com/p/1"));
    }
}
