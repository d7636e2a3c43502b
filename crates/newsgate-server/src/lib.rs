//! Newsgate webhook ingress server.
//!
//! Exposes the durable webhook queue (Component G) as an HTTP surface:
//! `/api/ifttt/twitter` enqueues tweet webhooks, `/api/mastodon/broadcast`
//! enqueues pre-formatted broadcast statuses, and `/health`/`/stats` report
//! liveness and queue depth.

pub mod auth;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the complete axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/ifttt/twitter", post(routes::ifttt::enqueue_twitter))
        .route("/mastodon/broadcast", post(routes::broadcast::broadcast));

    Router::new()
        .route("/health", get(routes::health::health))
        .route("/stats", get(routes::stats::stats))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
