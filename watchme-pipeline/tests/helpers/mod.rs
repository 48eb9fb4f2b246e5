//! Shared fixtures for pipeline integration tests
//!
//! [`Gateway`] is a throw-away axum server standing in for the upstream API
//! gateway: every request is recorded, and each path answers from a script
//! (falling back to a per-path default, then to `200 {}`).

#![allow(dead_code)]

use axum::{
    extract::{Query, State},
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use watchme_common::config::{QueueConfig, TomlConfig};
use watchme_common::queue::{MessageId, MessageQueue, OutgoingMessage, QueueSet, ReceivedMessage};
use watchme_common::store::{FeatureStatuses, RecordingRow};
use watchme_common::upstream::UpstreamClient;
use watchme_common::{JobStatus, RecordingKey};
use watchme_pipeline::endpoints::PipelineApi;
use watchme_pipeline::runtime::Consumer;

pub const DEVICE: &str = "d067d407-cf73-4174-a9c1-d91fb60d64d0";
pub const FILE_PATH: &str = "files/d067d407-cf73-4174-a9c1-d91fb60d64d0/2024-05-01/18-00/audio.wav";

/// One request received by the gateway
#[derive(Debug, Clone)]
pub struct Call {
    pub path: String,
    pub query: HashMap<String, String>,
    pub body: Value,
}

#[derive(Clone, Default)]
struct GatewayState {
    scripts: Arc<Mutex<HashMap<String, VecDeque<(u16, String)>>>>,
    defaults: Arc<Mutex<HashMap<String, (u16, String)>>>,
    calls: Arc<Mutex<Vec<Call>>>,
}

pub struct Gateway {
    state: GatewayState,
    pub base_url: String,
}

async fn record(
    State(state): State<GatewayState>,
    uri: Uri,
    Query(query): Query<HashMap<String, String>>,
    body: String,
) -> Response {
    let path = uri.path().to_string();
    state.calls.lock().unwrap().push(Call {
        path: path.clone(),
        query,
        body: serde_json::from_str(&body).unwrap_or(Value::Null),
    });

    let scripted = state
        .scripts
        .lock()
        .unwrap()
        .get_mut(&path)
        .and_then(|queue| queue.pop_front());
    let (status, body) = scripted
        .or_else(|| state.defaults.lock().unwrap().get(&path).cloned())
        .unwrap_or((200, "{}".to_string()));

    (StatusCode::from_u16(status).unwrap(), body).into_response()
}

impl Gateway {
    pub async fn start() -> Self {
        let state = GatewayState::default();
        let app = Router::new().fallback(record).with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            state,
            base_url: format!("http://{}", addr),
        }
    }

    /// Answer every request to `path` with this response unless scripted
    pub fn respond(&self, path: &str, status: u16, body: Value) {
        self.state
            .defaults
            .lock()
            .unwrap()
            .insert(path.to_string(), (status, body.to_string()));
    }

    /// Answer the next requests to `path` with these responses, in order
    pub fn script(&self, path: &str, responses: &[(u16, Value)]) {
        self.state.scripts.lock().unwrap().insert(
            path.to_string(),
            responses.iter().map(|(s, b)| (*s, b.to_string())).collect(),
        );
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.path == path).collect()
    }

    pub fn count(&self, path: &str) -> usize {
        self.calls_to(path).len()
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Defaults pointed at `gateway`, with millisecond backoff
pub fn test_config(gateway: &Gateway) -> TomlConfig {
    let mut config = TomlConfig::default();
    config.api.base_url = gateway.base_url.clone();
    config.retry.base_delay_ms = 10;
    config.retry.max_delay_ms = 40;
    config.timeouts.start_secs = 5;
    config.timeouts.analysis_secs = 5;
    config.timeouts.chain_secs = 5;
    config.queue.redelivery_delay_ms = 0;
    config.queue.poll_interval_ms = 5;
    config
}

pub fn api(config: &TomlConfig) -> PipelineApi {
    PipelineApi::new(UpstreamClient::from_config(config).unwrap(), config.api.clone())
}

pub fn queues() -> QueueSet {
    QueueSet::in_memory(&QueueConfig {
        redelivery_delay_ms: 0,
        ..QueueConfig::default()
    })
}

pub fn offset() -> chrono::FixedOffset {
    chrono::FixedOffset::east_opt(9 * 3600).unwrap()
}

/// 2024-05-01T09:00:00Z, i.e. 18:00 local at +09:00
pub fn recorded_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
}

pub fn recording() -> RecordingKey {
    RecordingKey::new(DEVICE, recorded_at())
}

pub fn local_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
}

pub fn recording_row() -> RecordingRow {
    RecordingRow {
        device_id: DEVICE.to_string(),
        recorded_at: recorded_at(),
        local_date: Some(local_date()),
    }
}

pub fn statuses(vibe: JobStatus, behavior: JobStatus, emotion: JobStatus) -> FeatureStatuses {
    FeatureStatuses {
        vibe,
        behavior,
        emotion,
        local_date: Some(local_date()),
    }
}

/// Batch report listing `path` as processed
pub fn processed(path: &str) -> Value {
    serde_json::json!({
        "processed_files": [path],
        "error_files": [],
        "summary": {"total_files": 1, "pending_processed": 1, "errors": 0}
    })
}

/// Poll `consumer` until `queue` is empty
pub async fn drain(queue: &Arc<dyn MessageQueue>, consumer: &Consumer) {
    for _ in 0..50 {
        if queue.depth().await.unwrap() == 0 {
            return;
        }
        consumer.poll_once().await.unwrap();
    }
    panic!("queue {} did not drain", queue.name());
}

/// Receive and ack every visible message, returning the decoded bodies
pub async fn take_all<T: serde::de::DeserializeOwned>(queue: &Arc<dyn MessageQueue>) -> Vec<T> {
    let mut bodies = Vec::new();
    loop {
        let batch = queue.receive(10).await.unwrap();
        if batch.is_empty() {
            return bodies;
        }
        for message in batch {
            bodies.push(message.decode().unwrap());
            queue.ack(&message.receipt).await.unwrap();
        }
    }
}


/// Queue whose sends always fail, for exercising partial dispatch
pub struct RejectingQueue {
    pub name: String,
}

#[async_trait::async_trait]
impl MessageQueue for RejectingQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, _message: OutgoingMessage) -> watchme_common::Result<MessageId> {
        Err(watchme_common::Error::Queue(format!("{} rejected the message", self.name)))
    }

    async fn receive(&self, _max: usize) -> watchme_common::Result<Vec<ReceivedMessage>> {
        Ok(Vec::new())
    }

    async fn ack(&self, _receipt: &str) -> watchme_common::Result<()> {
        Ok(())
    }

    async fn nack(&self, _receipt: &str) -> watchme_common::Result<()> {
        Ok(())
    }

    async fn depth(&self) -> watchme_common::Result<usize> {
        Ok(0)
    }
}

/// Pipeline queues with the SER dispatch queue refusing every send
pub fn queues_rejecting_ser() -> QueueSet {
    QueueSet {
        ser: Arc::new(RejectingQueue { name: "ser".to_string() }),
        ..queues()
    }
}
