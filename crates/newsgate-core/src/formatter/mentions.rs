//! Mentions transformation (§4.3): rewrites `@user` tokens per the
//! source's `MentionsMode`, while leaving email-like addresses
//! (`name@example.com`) untouched.
//!
//! The spec describes the email guard as a regex negative look-behind,
//! `(?<![a-zA-Z0-9.])`. The `regex` crate has no look-around support, so
//! the guard is implemented by inspecting the byte immediately before each
//! match instead — same semantics, no backtracking engine required.

use std::sync::OnceLock;

use regex::Regex;

use crate::config::MentionsMode;

fn mention_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@([A-Za-z0-9_]+)").expect("mention regex"))
}

/// Is the character immediately preceding a match position part of an
/// email-like local part (alnum or `.`)? If so, the match is not a
/// mention — it's the `@` in `name@example.com`.
fn preceded_by_email_local_part(haystack: &str, match_start: usize) -> bool {
    haystack[..match_start]
        .chars()
        .next_back()
        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '.')
}

/// Rewrite `@user` mentions per `mode`. `domain` is used only by
/// `DomainSuffix` mode.
pub fn transform_mentions(text: &str, mode: MentionsMode, domain: &str) -> String {
    if mode == MentionsMode::None {
        return text.to_string();
    }

    let re = mention_re();
    let mut out = String::with_capacity(text.len());
    let mut last_end = 0;

    for caps in re.captures_iter(text) {
        let whole = caps.get(0).expect("group 0 always matches");
        let username = &caps[1];

        out.push_str(&text[last_end..whole.start()]);

        if preceded_by_email_local_part(text, whole.start()) {
            out.push_str(whole.as_str());
        } else {
            match mode {
                MentionsMode::None => unreachable!(),
                MentionsMode::Prefix => {
                    out.push_str(domain);
                    out.push(' ');
                    out.push_str(whole.as_str());
                }
                MentionsMode::Suffix => {
                    out.push_str(whole.as_str());
                    out.push_str(" (");
                    out.push_str(domain);
                    out.push(')');
                }
                MentionsMode::DomainSuffix => {
                    out.push('@');
                    out.push_str(username);
                    out.push('@');
                    out.push_str(domain);
                }
            }
        }

        last_end = whole.end();
    }
    out.push_str(&text[last_end..]);
    out
}
