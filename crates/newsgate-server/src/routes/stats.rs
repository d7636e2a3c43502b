//! `GET /stats` — file counts per queue subdirectory (§4.7).

use std::path::Path;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use crate::state::AppState;

#[derive(Serialize)]
pub struct QueueStats {
    pending: usize,
    processed: usize,
    failed: usize,
}

fn count_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(Result::ok).filter(|e| e.path().extension().is_some_and(|ext| ext == "json")).count())
        .unwrap_or(0)
}

fn queue_stats(queue_dir: &Path) -> QueueStats {
    QueueStats {
        pending: count_entries(&queue_dir.join("pending")),
        processed: count_entries(&queue_dir.join("processed")),
        failed: count_entries(&queue_dir.join("failed")),
    }
}

pub async fn stats(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(serde_json::json!({
        "ifttt_prod": queue_stats(&state.queue_dir),
        "ifttt_test": queue_stats(&state.queue_dir_test),
        "broadcast": queue_stats(&state.broadcast_queue_dir),
    }))
}
