//! Event ingestion endpoints
//!
//! - `POST /events/upload`: object-storage upload event → Dispatcher
//! - `POST /events/completion`: CompletionNotification from an extraction
//!   service running in accepted mode → completion queue

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::Serialize;
use tracing::info;
use watchme_common::messages::{CompletionNotification, UploadEvent};
use watchme_common::queue::{send_json, MessageId};

use crate::dispatcher::DispatchReport;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// POST /events/upload response
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub dispatched: Vec<DispatchReport>,
}

/// POST /events/completion response
#[derive(Debug, Serialize)]
pub struct CompletionAccepted {
    pub message_id: MessageId,
}

/// POST /events/upload
pub async fn upload_event(
    State(state): State<AppState>,
    Json(event): Json<UploadEvent>,
) -> ApiResult<Json<UploadResponse>> {
    let dispatched = state.dispatcher.dispatch_event(&event).await?;
    Ok(Json(UploadResponse { dispatched }))
}

/// POST /events/completion
pub async fn completion_event(
    State(state): State<AppState>,
    Json(notification): Json<CompletionNotification>,
) -> ApiResult<(StatusCode, Json<CompletionAccepted>)> {
    if notification.device_id.trim().is_empty() {
        return Err(ApiError::BadRequest("device_id must not be empty".to_string()));
    }
    if !notification.status.is_terminal() {
        return Err(ApiError::BadRequest(format!(
            "status must be terminal, got {}",
            notification.status
        )));
    }

    let message_id = send_json(
        state.queues.completion.as_ref(),
        &notification,
        notification.group_id(),
        Some(notification.dedup_id()),
    )
    .await?;

    info!(
        device_id = %notification.device_id,
        recorded_at = %notification.recording().recorded_at_str(),
        stage = %notification.feature_type,
        status = %notification.status,
        "Completion notification received"
    );

    Ok((StatusCode::ACCEPTED, Json(CompletionAccepted { message_id })))
}

pub fn event_routes() -> Router<AppState> {
    Router::new()
        .route("/events/upload", post(upload_event))
        .route("/events/completion", post(completion_event))
}
