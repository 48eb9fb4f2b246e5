//! Health and queue-depth endpoints

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::error::ApiResult;
use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status ("ok")
    pub status: String,
    /// Module name ("watchme-pipeline")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
}

/// Depth of one queue
#[derive(Debug, Serialize)]
pub struct QueueDepth {
    pub queue: String,
    pub depth: usize,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);

    Json(HealthResponse {
        status: "ok".to_string(),
        module: "watchme-pipeline".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime.num_seconds().max(0) as u64,
    })
}

/// GET /queues
///
/// Messages not yet acked, per pipeline queue.
pub async fn queue_depths(State(state): State<AppState>) -> ApiResult<Json<Vec<QueueDepth>>> {
    let mut depths = Vec::new();
    for queue in state.queues.all() {
        depths.push(QueueDepth {
            queue: queue.name().to_string(),
            depth: queue.depth().await?,
        });
    }
    Ok(Json(depths))
}

pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/queues", get(queue_depths))
}
