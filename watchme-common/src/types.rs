//! Domain types shared by every pipeline role

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

// ============================================================================
// Stages
// ============================================================================

/// Independent feature-extraction stage
///
/// Each stage owns exactly one status column in the Status Store and one
/// dispatch queue. Notifications sent by the extraction services themselves
/// use the feature names (`vibe`, `behavior`, `emotion`), accepted as aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Speech-to-text transcription
    #[serde(alias = "vibe")]
    Asr,
    /// Acoustic event detection
    #[serde(alias = "behavior")]
    Sed,
    /// Speech emotion recognition
    #[serde(alias = "emotion")]
    Ser,
}

impl Stage {
    /// All stages in dispatch order
    pub const ALL: [Stage; 3] = [Stage::Asr, Stage::Sed, Stage::Ser];

    /// Stage name used in dedup keys, ordering groups and queue names
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Asr => "asr",
            Stage::Sed => "sed",
            Stage::Ser => "ser",
        }
    }

    /// Status Store column holding this stage's FeatureJob status
    pub fn status_column(self) -> &'static str {
        match self {
            Stage::Asr => "vibe_status",
            Stage::Sed => "behavior_status",
            Stage::Ser => "emotion_status",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asr" | "vibe" => Ok(Stage::Asr),
            "sed" | "behavior" => Ok(Stage::Sed),
            "ser" | "emotion" => Ok(Stage::Ser),
            other => Err(Error::InvalidInput(format!("Unknown stage: {}", other))),
        }
    }
}

// ============================================================================
// Status values
// ============================================================================

/// FeatureJob status, mutated only by the owning Stage Worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Skipped => "skipped",
        }
    }

    /// Terminal states fire exactly one CompletionNotification
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Skipped)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "skipped" => Ok(JobStatus::Skipped),
            other => Err(Error::InvalidInput(format!("Unknown job status: {}", other))),
        }
    }
}

/// Status of the aggregator and profiler steps, written only by the Coordinator
///
/// `Processing` is only ever written by a conditional claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl AggregateStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AggregateStatus::Pending => "pending",
            AggregateStatus::Processing => "processing",
            AggregateStatus::Completed => "completed",
            AggregateStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for AggregateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason code attached to an explicit failure record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Recording fell into quiet hours and was never processed
    OffHoursSkip,
    /// Upstream kept answering 429 until the attempt cap
    QuotaExceeded,
    /// Upstream kept timing out until the attempt cap
    Timeout,
    /// HTTP 200 but the item itself was reported as failed
    ProcessingFailed,
    /// Non-retryable status or malformed response
    UpstreamError,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::OffHoursSkip => "off_hours_skip",
            FailureReason::QuotaExceeded => "quota_exceeded",
            FailureReason::Timeout => "timeout",
            FailureReason::ProcessingFailed => "processing_failed",
            FailureReason::UpstreamError => "upstream_error",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Recording identity
// ============================================================================

/// Identity of a recording: (device_id, recorded_at)
///
/// Immutable once created. `recorded_at` is always a UTC instant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordingKey {
    pub device_id: String,
    pub recorded_at: DateTime<Utc>,
}

impl RecordingKey {
    pub fn new(device_id: impl Into<String>, recorded_at: DateTime<Utc>) -> Self {
        Self {
            device_id: device_id.into(),
            recorded_at,
        }
    }

    /// Canonical text form of `recorded_at` (RFC 3339, `Z` suffix)
    ///
    /// Used for dedup keys and store filters so the same instant always
    /// renders identically regardless of how it was first received.
    pub fn recorded_at_str(&self) -> String {
        canonical_timestamp(&self.recorded_at)
    }
}

impl fmt::Display for RecordingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device_id, self.recorded_at_str())
    }
}

/// Render a UTC instant in canonical RFC 3339 form
pub fn canonical_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
