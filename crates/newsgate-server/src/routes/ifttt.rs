//! `POST /api/ifttt/twitter[?env=test]` — enqueue a tweet webhook (§4.7).

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use newsgate_core::queue::{self, QueueJob};
use newsgate_core::tier::{self, WebhookPayload};
use serde::{Deserialize, Serialize};

use crate::auth::verify_bearer;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct IftttRequest {
    pub text: String,
    #[serde(default)]
    pub embed_code: String,
    #[serde(default)]
    pub link_to_tweet: String,
    #[serde(default)]
    pub first_link_url: String,
    pub username: String,
    #[serde(default)]
    pub bot_id: Option<String>,
}

#[derive(Deserialize)]
pub struct EnvQuery {
    #[serde(default)]
    pub env: Option<String>,
}

#[derive(Serialize)]
pub struct IftttResponse {
    pub status: &'static str,
    pub queue_file: String,
    pub post_id: Option<String>,
}

pub async fn enqueue_twitter(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EnvQuery>,
    headers: HeaderMap,
    Json(body): Json<IftttRequest>,
) -> Result<Json<IftttResponse>, ApiError> {
    if !verify_bearer(&headers, &state.global.webhook_token) {
        return Err(ApiError::Unauthorized);
    }
    if body.text.trim().is_empty() {
        return Err(ApiError::BadRequest("text cannot be empty".to_string()));
    }
    if body.username.trim().is_empty() {
        return Err(ApiError::BadRequest("username cannot be empty".to_string()));
    }

    let payload = WebhookPayload {
        text: body.text,
        embed_code: body.embed_code,
        link_to_tweet: body.link_to_tweet,
        first_link_url: body.first_link_url,
        username: body.username,
        bot_id: body.bot_id.unwrap_or_default(),
    };
    let post_id = tier::extract_post_id(&payload.link_to_tweet);

    let queue_dir = match query.env.as_deref() {
        Some("test") => &state.queue_dir_test,
        _ => &state.queue_dir,
    };

    let job = QueueJob::from_payload(&payload, Utc::now());
    let path = queue::enqueue(queue_dir, &job)?;

    Ok(Json(IftttResponse {
        status: "queued",
        queue_file: path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
        post_id,
    }))
}
