//! Status Store client
//!
//! The Status Store is the single source of truth for per-recording stage
//! statuses and for the aggregator/profiler status fields. Pipeline roles
//! reach it only through [`StatusStore`]; the REST implementation talks to a
//! PostgREST-style endpoint, the in-memory one backs tests and local runs.

mod memory;
mod rest;

pub use memory::{InMemoryStatusStore, StoreWrite};
pub use rest::RestStatusStore;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AggregateStatus, JobStatus, RecordingKey, Stage};
use crate::Result;

/// Recording row looked up by object path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingRow {
    pub device_id: String,
    pub recorded_at: DateTime<Utc>,
    #[serde(default)]
    pub local_date: Option<NaiveDate>,
}

impl RecordingRow {
    pub fn key(&self) -> RecordingKey {
        RecordingKey::new(self.device_id.clone(), self.recorded_at)
    }
}

/// The status triple plus the recording's local date
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureStatuses {
    pub vibe: JobStatus,
    pub behavior: JobStatus,
    pub emotion: JobStatus,
    pub local_date: Option<NaiveDate>,
}

impl FeatureStatuses {
    /// All three stages pending
    pub fn pending() -> Self {
        Self {
            vibe: JobStatus::Pending,
            behavior: JobStatus::Pending,
            emotion: JobStatus::Pending,
            local_date: None,
        }
    }

    pub fn get(&self, stage: Stage) -> JobStatus {
        match stage {
            Stage::Asr => self.vibe,
            Stage::Sed => self.behavior,
            Stage::Ser => self.emotion,
        }
    }

    pub fn set(&mut self, stage: Stage, status: JobStatus) {
        match stage {
            Stage::Asr => self.vibe = status,
            Stage::Sed => self.behavior = status,
            Stage::Ser => self.emotion = status,
        }
    }

    /// Barrier condition: every stage reads `completed`
    pub fn all_completed(&self) -> bool {
        Stage::ALL.iter().all(|s| self.get(*s) == JobStatus::Completed)
    }

    /// Stages not yet completed, for logging
    pub fn waiting_on(&self) -> Vec<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|s| self.get(*s) != JobStatus::Completed)
            .collect()
    }
}

/// Where a device's push notification goes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushTarget {
    pub token: String,
    pub subject_name: Option<String>,
}

/// Read/patch operations the pipeline performs against the Status Store
///
/// Writes are overwrites keyed by recording, so repeating any of them is safe.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Look up the recording an uploaded object belongs to
    async fn find_recording_by_path(&self, file_path: &str) -> Result<Option<RecordingRow>>;

    /// Read the status triple for a recording
    async fn feature_statuses(&self, key: &RecordingKey) -> Result<Option<FeatureStatuses>>;

    /// Overwrite one stage's status, creating the row if needed
    async fn set_feature_status(&self, key: &RecordingKey, stage: Stage, status: JobStatus) -> Result<()>;

    async fn set_aggregator_status(&self, key: &RecordingKey, status: AggregateStatus) -> Result<()>;

    async fn set_profiler_status(&self, key: &RecordingKey, status: AggregateStatus) -> Result<()>;

    /// Conditionally move `aggregator_status` from pending (or absent) to processing
    ///
    /// Returns `true` for exactly one caller per recording.
    async fn claim_aggregation(&self, key: &RecordingKey) -> Result<bool>;

    /// Put `aggregator_status` back to pending so a later delivery can claim again
    async fn release_claim(&self, key: &RecordingKey) -> Result<()>;

    /// Local date stored on the recording row
    async fn local_date(&self, key: &RecordingKey) -> Result<Option<NaiveDate>>;

    /// Resolve the push token and subject name for a device
    async fn push_target(&self, device_id: &str) -> Result<Option<PushTarget>>;
}
