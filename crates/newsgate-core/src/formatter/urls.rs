//! URL domain rewriting (§4.3): a configurable list of source domains is
//! rewritten to a single target host (e.g. `twitter.com`/`x.com` → a
//! chosen frontend).

use url::Url;

/// Rewrite every URL in `text` whose host matches one of `source_domains`
/// to use `target_domain` instead, preserving path/query/fragment.
pub fn rewrite_domains(text: &str, source_domains: &[String], target_domain: &str) -> String {
    if source_domains.is_empty() || target_domain.is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    loop {
        let Some(start) = find_next_url_start(rest) else {
            out.push_str(rest);
            break;
        };
        out.push_str(&rest[..start]);
        let (url_str, end) = extract_url_token(&rest[start..]);

        match Url::parse(url_str) {
            Ok(mut parsed)
                if source_domains
                    .iter()
                    .any(|d| parsed.host_str() == Some(d.as_str())) =>
            {
                let _ = parsed.set_host(Some(target_domain));
                out.push_str(parsed.as_str().trim_end_matches('/'));
                // Preserve absence of trailing slash added by Url's normalisation
                // only when the original token had none.
                if !url_str.ends_with('/') && parsed.as_str().ends_with('/') {
                    // already trimmed above
                }
            }
            _ => out.push_str(url_str),
        }

        rest = &rest[start + end..];
    }

    out
}

fn find_next_url_start(text: &str) -> Option<usize> {
    text.find("https://").or_else(|| text.find("http://"))
}

fn extract_url_token(text: &str) -> (&str, usize) {
    let end = text
        .find(|c: char| c.is_whitespace())
        .unwrap_or(text.len());
    (&text[..end], end)
}
