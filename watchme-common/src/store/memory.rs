//! In-memory Status Store
//!
//! Holds the same rows the REST store reads and writes, and records every
//! write in order so callers can assert exactly what the pipeline did.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use super::{FeatureStatuses, PushTarget, RecordingRow, StatusStore};
use crate::types::{AggregateStatus, JobStatus, RecordingKey, Stage};
use crate::{Error, Result};

/// One write performed against the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreWrite {
    FeatureStatus {
        key: RecordingKey,
        stage: Stage,
        status: JobStatus,
    },
    AggregatorStatus {
        key: RecordingKey,
        status: AggregateStatus,
    },
    ProfilerStatus {
        key: RecordingKey,
        status: AggregateStatus,
    },
    Claim {
        key: RecordingKey,
        granted: bool,
    },
    ClaimReleased {
        key: RecordingKey,
    },
}

#[derive(Debug, Default)]
struct State {
    /// Keyed by object path
    recordings: HashMap<String, RecordingRow>,
    features: HashMap<RecordingKey, FeatureStatuses>,
    aggregator: HashMap<RecordingKey, AggregateStatus>,
    profiler: HashMap<RecordingKey, AggregateStatus>,
    push_targets: HashMap<String, PushTarget>,
    writes: Vec<StoreWrite>,
}

/// Status Store held in process memory
#[derive(Debug, Default)]
pub struct InMemoryStatusStore {
    state: Mutex<State>,
    unavailable: AtomicBool,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a recording row under its object path
    pub async fn insert_recording(&self, file_path: impl Into<String>, row: RecordingRow) {
        self.state.lock().await.recordings.insert(file_path.into(), row);
    }

    /// Seed the status triple for a recording
    pub async fn insert_statuses(&self, key: RecordingKey, statuses: FeatureStatuses) {
        self.state.lock().await.features.insert(key, statuses);
    }

    pub async fn insert_push_target(&self, device_id: impl Into<String>, target: PushTarget) {
        self.state.lock().await.push_targets.insert(device_id.into(), target);
    }

    /// Make every operation fail with [`Error::Store`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Every write, in order
    pub async fn writes(&self) -> Vec<StoreWrite> {
        self.state.lock().await.writes.clone()
    }

    pub async fn aggregator_status(&self, key: &RecordingKey) -> Option<AggregateStatus> {
        self.state.lock().await.aggregator.get(key).copied()
    }

    pub async fn profiler_status(&self, key: &RecordingKey) -> Option<AggregateStatus> {
        self.state.lock().await.profiler.get(key).copied()
    }

    pub async fn feature_status(&self, key: &RecordingKey, stage: Stage) -> Option<JobStatus> {
        self.state.lock().await.features.get(key).map(|s| s.get(stage))
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Store("status store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn find_recording_by_path(&self, file_path: &str) -> Result<Option<RecordingRow>> {
        self.ensure_available()?;
        Ok(self.state.lock().await.recordings.get(file_path).cloned())
    }

    async fn feature_statuses(&self, key: &RecordingKey) -> Result<Option<FeatureStatuses>> {
        self.ensure_available()?;
        Ok(self.state.lock().await.features.get(key).copied())
    }

    async fn set_feature_status(&self, key: &RecordingKey, stage: Stage, status: JobStatus) -> Result<()> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        state
            .features
            .entry(key.clone())
            .or_insert_with(FeatureStatuses::pending)
            .set(stage, status);
        state.writes.push(StoreWrite::FeatureStatus {
            key: key.clone(),
            stage,
            status,
        });
        Ok(())
    }

    async fn set_aggregator_status(&self, key: &RecordingKey, status: AggregateStatus) -> Result<()> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        state.aggregator.insert(key.clone(), status);
        state.writes.push(StoreWrite::AggregatorStatus {
            key: key.clone(),
            status,
        });
        Ok(())
    }

    async fn set_profiler_status(&self, key: &RecordingKey, status: AggregateStatus) -> Result<()> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        state.profiler.insert(key.clone(), status);
        state.writes.push(StoreWrite::ProfilerStatus {
            key: key.clone(),
            status,
        });
        Ok(())
    }

    async fn claim_aggregation(&self, key: &RecordingKey) -> Result<bool> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        let granted = match state.aggregator.get(key) {
            None | Some(AggregateStatus::Pending) => {
                state.aggregator.insert(key.clone(), AggregateStatus::Processing);
                true
            }
            Some(_) => false,
        };
        state.writes.push(StoreWrite::Claim {
            key: key.clone(),
            granted,
        });
        Ok(granted)
    }

    async fn release_claim(&self, key: &RecordingKey) -> Result<()> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        state.aggregator.insert(key.clone(), AggregateStatus::Pending);
        state.writes.push(StoreWrite::ClaimReleased { key: key.clone() });
        Ok(())
    }

    async fn local_date(&self, key: &RecordingKey) -> Result<Option<NaiveDate>> {
        self.ensure_available()?;
        Ok(self
            .state
            .lock()
            .await
            .recordings
            .values()
            .find(|row| row.device_id == key.device_id && row.recorded_at == key.recorded_at)
            .and_then(|row| row.local_date))
    }

    async fn push_target(&self, device_id: &str) -> Result<Option<PushTarget>> {
        self.ensure_available()?;
        Ok(self.state.lock().await.push_targets.get(device_id).cloned())
    }
}
