//! `POST /api/mastodon/broadcast` — enqueue a pre-formatted broadcast
//! status (§4.7). The raw body is preserved verbatim on disk; the server
//! only needs enough of it to name the file.

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde_json::Value;

use crate::auth::verify_hmac_signature;
use crate::error::ApiError;
use crate::state::AppState;

fn sanitize(component: &str) -> String {
    let cleaned: String = component
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

pub async fn broadcast(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    if !verify_hmac_signature(&headers, &body, &state.global.broadcast_secret) {
        return Err(ApiError::Unauthorized);
    }

    let parsed: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))?;

    let status_id = parsed
        .get("status_id")
        .or_else(|| parsed.get("id"))
        .and_then(Value::as_str)
        .map(sanitize)
        .unwrap_or_else(|| "unknown".to_string());

    let pending_dir = state.broadcast_queue_dir.join("pending");
    std::fs::create_dir_all(&pending_dir)
        .map_err(|e| newsgate_core::error::QueueError::Io { path: pending_dir.display().to_string(), source: e })?;

    let filename = format!("{}_tlambot_{}.json", Utc::now().format("%Y%m%d%H%M%S%3f"), status_id);
    let path: PathBuf = pending_dir.join(filename);
    std::fs::write(&path, &body)
        .map_err(|e| newsgate_core::error::QueueError::Io { path: path.display().to_string(), source: e })?;

    Ok(Json(serde_json::json!({ "status": "queued" })))
}
