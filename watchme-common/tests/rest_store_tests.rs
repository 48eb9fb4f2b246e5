//! REST Status Store against a mock PostgREST endpoint

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Json, Router,
};
use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use watchme_common::store::{RestStatusStore, StatusStore};
use watchme_common::{AggregateStatus, Error, JobStatus, RecordingKey, Stage};

#[derive(Debug, Clone)]
struct Captured {
    method: Method,
    table: String,
    query: HashMap<String, String>,
    headers: HeaderMap,
    body: Value,
}

#[derive(Clone, Default)]
struct MockStore {
    /// table -> rows returned for any request
    rows: Arc<Mutex<HashMap<String, Value>>>,
    /// table -> forced status
    failures: Arc<Mutex<HashMap<String, u16>>>,
    captured: Arc<Mutex<Vec<Captured>>>,
}

impl MockStore {
    fn with_rows(self, table: &str, rows: Value) -> Self {
        self.rows.lock().unwrap().insert(table.to_string(), rows);
        self
    }

    fn captured(&self) -> Vec<Captured> {
        self.captured.lock().unwrap().clone()
    }
}

async fn handle(
    State(mock): State<MockStore>,
    method: Method,
    Path(table): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    mock.captured.lock().unwrap().push(Captured {
        method,
        table: table.clone(),
        query,
        headers,
        body: serde_json::from_str(&body).unwrap_or(Value::Null),
    });

    if let Some(status) = mock.failures.lock().unwrap().get(&table) {
        return (StatusCode::from_u16(*status).unwrap(), "denied").into_response();
    }

    let rows = mock.rows.lock().unwrap().get(&table).cloned().unwrap_or(json!([]));
    Json(rows).into_response()
}

async fn serve(mock: MockStore) -> RestStatusStore {
    let app = Router::new()
        .route("/rest/v1/:table", any(handle))
        .with_state(mock);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    RestStatusStore::new(format!("http://{}/", addr), "service-key", Duration::from_secs(5)).unwrap()
}

fn key() -> RecordingKey {
    RecordingKey::new("dev-1", Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap())
}

#[tokio::test]
async fn test_feature_statuses_reads_triple_with_filters_and_auth() {
    let mock = MockStore::default().with_rows(
        "spot_features",
        json!([{
            "vibe_status": "completed",
            "behavior_status": "completed",
            "emotion_status": null,
            "local_date": "2024-05-01"
        }]),
    );
    let store = serve(mock.clone()).await;

    let statuses = store.feature_statuses(&key()).await.unwrap().unwrap();
    assert_eq!(statuses.vibe, JobStatus::Completed);
    assert_eq!(statuses.behavior, JobStatus::Completed);
    assert_eq!(statuses.emotion, JobStatus::Pending);
    assert_eq!(statuses.local_date, NaiveDate::from_ymd_opt(2024, 5, 1));
    assert!(!statuses.all_completed());

    let request = &mock.captured()[0];
    assert_eq!(request.method, Method::GET);
    assert_eq!(request.query["device_id"], "eq.dev-1");
    assert_eq!(request.query["recorded_at"], "eq.2024-05-01T09:00:00Z");
    assert_eq!(
        request.query["select"],
        "vibe_status,behavior_status,emotion_status,local_date"
    );
    assert_eq!(request.headers["apikey"], "service-key");
    assert_eq!(request.headers["authorization"], "Bearer service-key");
}

#[tokio::test]
async fn test_missing_row_is_none() {
    let store = serve(MockStore::default()).await;
    assert!(store.feature_statuses(&key()).await.unwrap().is_none());
    assert!(store.find_recording_by_path("files/x/audio.wav").await.unwrap().is_none());
}

#[tokio::test]
async fn test_find_recording_by_path_parses_timestamp() {
    let mock = MockStore::default().with_rows(
        "audio_files",
        json!([{"device_id": "dev-1", "recorded_at": "2024-05-01T18:00:00+09:00"}]),
    );
    let store = serve(mock.clone()).await;

    let row = store
        .find_recording_by_path("files/dev-1/2024-05-01/18-00/audio.wav")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.key(), key());
    assert!(row.local_date.is_none());
    assert_eq!(
        mock.captured()[0].query["file_path"],
        "eq.files/dev-1/2024-05-01/18-00/audio.wav"
    );
}

#[tokio::test]
async fn test_status_patches_use_minimal_return() {
    let mock = MockStore::default();
    let store = serve(mock.clone()).await;

    store.set_aggregator_status(&key(), AggregateStatus::Completed).await.unwrap();
    store.set_profiler_status(&key(), AggregateStatus::Failed).await.unwrap();

    let captured = mock.captured();
    assert_eq!(captured[0].method, Method::PATCH);
    assert_eq!(captured[0].table, "spot_aggregators");
    assert_eq!(captured[0].body, json!({"aggregator_status": "completed"}));
    assert_eq!(captured[0].headers["prefer"], "return=minimal");
    assert_eq!(captured[1].table, "spot_results");
    assert_eq!(captured[1].body, json!({"profiler_status": "failed"}));
    assert_eq!(captured[1].query["recorded_at"], "eq.2024-05-01T09:00:00Z");
}

#[tokio::test]
async fn test_feature_status_is_upsert_of_single_column() {
    let mock = MockStore::default();
    let store = serve(mock.clone()).await;

    store.set_feature_status(&key(), Stage::Sed, JobStatus::Failed).await.unwrap();

    let request = &mock.captured()[0];
    assert_eq!(request.method, Method::POST);
    assert_eq!(request.table, "spot_features");
    assert_eq!(request.query["on_conflict"], "device_id,recorded_at");
    assert_eq!(
        request.body,
        json!({"device_id": "dev-1", "recorded_at": "2024-05-01T09:00:00Z", "behavior_status": "failed"})
    );
}

#[tokio::test]
async fn test_non_success_status_is_store_error() {
    let mock = MockStore::default();
    mock.failures.lock().unwrap().insert("spot_results".to_string(), 401);
    let store = serve(mock).await;

    let err = store
        .set_profiler_status(&key(), AggregateStatus::Completed)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Store(ref msg) if msg.contains("401")));
}

#[tokio::test]
async fn test_claim_granted_when_row_was_pending() {
    let mock = MockStore::default().with_rows(
        "spot_aggregators",
        json!([{"device_id": "dev-1", "aggregator_status": "processing"}]),
    );
    let store = serve(mock.clone()).await;

    assert!(store.claim_aggregation(&key()).await.unwrap());
    let captured = mock.captured();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].query["or"], "(aggregator_status.eq.pending,aggregator_status.is.null)");
}

#[tokio::test]
async fn test_claim_denied_when_nothing_updated_or_inserted() {
    let store = serve(MockStore::default()).await;
    assert!(!store.claim_aggregation(&key()).await.unwrap());
}

#[tokio::test]
async fn test_push_target_resolution_chain() {
    let mock = MockStore::default()
        .with_rows("user_devices", json!([{"user_id": "u-1"}]))
        .with_rows("users", json!([{"apns_token": "tok-123"}]))
        .with_rows("devices", json!([{"subject_id": "s-1"}]))
        .with_rows("subjects", json!([{"name": "Taro"}]));
    let store = serve(mock).await;

    let target = store.push_target("dev-1").await.unwrap().unwrap();
    assert_eq!(target.token, "tok-123");
    assert_eq!(target.subject_name.as_deref(), Some("Taro"));
}

#[tokio::test]
async fn test_push_target_absent_without_token() {
    let mock = MockStore::default()
        .with_rows("user_devices", json!([{"user_id": "u-1"}]))
        .with_rows("users", json!([{"apns_token": null}]));
    let store = serve(mock).await;

    assert!(store.push_target("dev-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_release_claim_resets_aggregator_to_pending() {
    let mock = MockStore::default();
    let store = serve(mock.clone()).await;

    store.release_claim(&key()).await.unwrap();

    let captured = mock.captured();
    assert_eq!(captured[0].method, Method::PATCH);
    assert_eq!(captured[0].table, "spot_aggregators");
    assert_eq!(captured[0].query["device_id"], "eq.dev-1");
    assert_eq!(captured[0].body, json!({"aggregator_status": "pending"}));
}
