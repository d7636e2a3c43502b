//! Request authentication for the webhook ingress endpoints (§4.7).
//!
//! `/api/ifttt/twitter` requires a bearer token; `/api/mastodon/broadcast`
//! requires an HMAC-SHA256 signature over the raw request body via the
//! `X-Hub-Signature: sha256=<hex>` header, checked in constant time. An
//! empty secret disables verification for that endpoint (dev only).

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Check `Authorization: Bearer <token>` against the configured webhook
/// token. An empty `expected` disables the check (dev only).
pub fn verify_bearer(headers: &HeaderMap, expected: &str) -> bool {
    if expected.is_empty() {
        return true;
    }
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected)
}

/// Verify `X-Hub-Signature: sha256=<hex>` over `body` using `secret`. An
/// empty `secret` disables verification (dev only).
pub fn verify_hmac_signature(headers: &HeaderMap, body: &[u8], secret: &str) -> bool {
    if secret.is_empty() {
        return true;
    }

    let Some(header) = headers.get("x-hub-signature").and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let Some(hex_sig) = header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(hex_sig) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&sig_bytes).is_ok()
}
