//! HTTP surface tests via `tower::ServiceExt::oneshot`

mod helpers;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use helpers::*;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use watchme_common::messages::CompletionNotification;
use watchme_common::queue::{MessageQueue, QueueSet};
use watchme_common::store::InMemoryStatusStore;
use watchme_common::{JobStatus, Stage};
use watchme_pipeline::dispatcher::Dispatcher;
use watchme_pipeline::{build_router, AppState};

fn app(store: Arc<InMemoryStatusStore>, queues: &QueueSet) -> Router {
    let dispatcher = Arc::new(Dispatcher::new(store, queues.clone(), offset()));
    build_router(AppState::new(dispatcher, queues.clone()))
}

fn upload_event(key: &str) -> Value {
    json!({
        "Records": [{
            "s3": {
                "bucket": {"name": "watchme-vault"},
                "object": {"key": key}
            }
        }]
    })
}

async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_health_endpoint() {
    let queues = queues();
    let (status, body) = send(app(Arc::new(InMemoryStatusStore::new()), &queues), "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "watchme-pipeline");
    assert!(body["uptime_seconds"].is_u64());
}

#[tokio::test]
async fn test_upload_event_dispatches_three_stages() {
    // Given: no store row, identity comes from the path
    let queues = queues();
    let app = app(Arc::new(InMemoryStatusStore::new()), &queues);

    // When
    let (status, body) = send(app, "POST", "/events/upload", Some(upload_event(FILE_PATH))).await;

    // Then
    assert_eq!(status, StatusCode::OK);
    let report = &body["dispatched"][0];
    assert_eq!(report["device_id"], DEVICE);
    assert_eq!(report["recorded_at"], "2024-05-01T09:00:00Z");
    assert_eq!(report["resolved_from_store"], false);
    assert_eq!(report["stages"].as_array().unwrap().len(), 3);

    for stage in Stage::ALL {
        assert_eq!(queues.stage(stage).depth().await.unwrap(), 1, "stage {}", stage);
    }
}

#[tokio::test]
async fn test_upload_event_decodes_object_key() {
    let queues = queues();
    let store = Arc::new(InMemoryStatusStore::new());
    store.insert_recording(FILE_PATH, recording_row()).await;
    let app = app(store, &queues);

    let encoded = FILE_PATH.replace('/', "%2F");
    let (status, body) = send(app, "POST", "/events/upload", Some(upload_event(&encoded))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["dispatched"][0]["file_path"], FILE_PATH);
    assert_eq!(body["dispatched"][0]["resolved_from_store"], true);
}

#[tokio::test]
async fn test_malformed_path_is_rejected() {
    let queues = queues();
    let app = app(Arc::new(InMemoryStatusStore::new()), &queues);

    let (status, body) = send(app, "POST", "/events/upload", Some(upload_event("audio.wav"))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "MALFORMED_PATH");
    assert_eq!(queues.asr.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_empty_upload_event_is_rejected() {
    let queues = queues();
    let app = app(Arc::new(InMemoryStatusStore::new()), &queues);

    let (status, _) = send(app, "POST", "/events/upload", Some(json!({"Records": []}))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_store_outage_returns_500() {
    let queues = queues();
    let store = Arc::new(InMemoryStatusStore::new());
    store.set_unavailable(true);
    let app = app(store, &queues);

    let (status, body) = send(app, "POST", "/events/upload", Some(upload_event(FILE_PATH))).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"]["message"].as_str().unwrap().contains("unavailable"));
}

#[tokio::test]
async fn test_completion_event_is_queued_once() {
    let queues = queues();
    let store = Arc::new(InMemoryStatusStore::new());
    let notification = json!({
        "device_id": DEVICE,
        "recorded_at": "2024-05-01T18:00:00+09:00",
        "feature_type": "emotion",
        "status": "completed"
    });

    let (first, _) = send(app(store.clone(), &queues), "POST", "/events/completion", Some(notification.clone())).await;
    let (second, _) = send(app(store, &queues), "POST", "/events/completion", Some(notification)).await;

    assert_eq!(first, StatusCode::ACCEPTED);
    assert_eq!(second, StatusCode::ACCEPTED);

    let queued: Vec<CompletionNotification> = take_all(&queues.completion).await;
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].feature_type, Stage::Ser);
    assert_eq!(queued[0].status, JobStatus::Completed);
    assert_eq!(queued[0].recorded_at, recorded_at());
}

#[tokio::test]
async fn test_queue_depths_endpoint() {
    let queues = queues();
    let app = app(Arc::new(InMemoryStatusStore::new()), &queues);
    let (_, _) = send(app.clone(), "POST", "/events/upload", Some(upload_event(FILE_PATH))).await;

    let (status, body) = send(app, "GET", "/queues", None).await;

    assert_eq!(status, StatusCode::OK);
    let depths = body.as_array().unwrap();
    assert_eq!(depths.len(), 7);
    assert_eq!(depths[0], json!({"queue": "asr", "depth": 1}));
    assert_eq!(depths[3], json!({"queue": "completion", "depth": 0}));
}

#[tokio::test]
async fn test_partial_dispatch_failure_returns_502() {
    let queues = queues_rejecting_ser();
    let app = app(Arc::new(InMemoryStatusStore::new()), &queues);

    let (status, body) = send(app, "POST", "/events/upload", Some(upload_event(FILE_PATH))).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "PARTIAL_DISPATCH_FAILURE");
    assert!(body["error"]["message"].as_str().unwrap().contains("ser"));
    assert_eq!(queues.asr.depth().await.unwrap(), 1);
}

#[tokio::test]
async fn test_non_terminal_completion_event_is_rejected() {
    let queues = queues();
    let app = app(Arc::new(InMemoryStatusStore::new()), &queues);
    let notification = json!({
        "device_id": DEVICE,
        "recorded_at": "2024-05-01T09:00:00Z",
        "feature_type": "emotion",
        "status": "processing"
    });

    let (status, body) = send(app, "POST", "/events/completion", Some(notification)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
    assert_eq!(queues.completion.depth().await.unwrap(), 0);
}
