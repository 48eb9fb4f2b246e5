//! Message envelopes exchanged between pipeline roles
//!
//! All envelopes travel as JSON bodies on the queue transport. Identifiers
//! (device_id, recorded_at, local_date) are copied verbatim from one envelope
//! to the next so no role ever recomputes them.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::dedup::{dedup_key, ordering_group};
use crate::types::{JobStatus, RecordingKey, Stage};
use crate::{Error, Result};

/// One message per stage, emitted by the Dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchMessage {
    /// Object-storage path of the uploaded recording
    pub file_path: String,
    pub device_id: String,
    pub recorded_at: DateTime<Utc>,
    /// Bucket / source identifier the upload came from
    pub source_ref: String,
    /// Local calendar date, when the store already knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_date: Option<NaiveDate>,
}

impl DispatchMessage {
    pub fn recording(&self) -> RecordingKey {
        RecordingKey::new(self.device_id.clone(), self.recorded_at)
    }
}

/// Fired once per FeatureJob terminal state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionNotification {
    pub device_id: String,
    pub recorded_at: DateTime<Utc>,
    pub feature_type: Stage,
    pub status: JobStatus,
}

impl CompletionNotification {
    pub fn new(recording: &RecordingKey, stage: Stage, status: JobStatus) -> Self {
        Self {
            device_id: recording.device_id.clone(),
            recorded_at: recording.recorded_at,
            feature_type: stage,
            status,
        }
    }

    pub fn recording(&self) -> RecordingKey {
        RecordingKey::new(self.device_id.clone(), self.recorded_at)
    }

    /// One logical notification per (recording, stage, status)
    pub fn dedup_id(&self) -> String {
        format!(
            "{}-{}",
            dedup_key(&self.recording(), self.feature_type),
            self.status.as_str()
        )
    }

    pub fn group_id(&self) -> String {
        ordering_group(&self.device_id, self.feature_type)
    }
}

/// Dashboard-summary trigger, enqueued by the Coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryTrigger {
    pub device_id: String,
    pub recorded_at: DateTime<Utc>,
    pub local_date: NaiveDate,
}

/// Generated prompt forwarded from the summary relay to the analysis relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub device_id: String,
    #[serde(alias = "local_date")]
    pub date: NaiveDate,
    pub recorded_at: DateTime<Utc>,
    pub prompt: String,
}

/// Analysis payload forwarded from the analysis relay to the notification relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub device_id: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub analysis_result: serde_json::Value,
}

// ============================================================================
// Object-storage upload events
// ============================================================================

/// Upload-completion event as delivered by the object store
#[derive(Debug, Clone, Deserialize)]
pub struct UploadEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<UploadRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadRecord {
    pub s3: StorageEntity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageEntity {
    pub bucket: StorageBucket,
    pub object: StorageObject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageBucket {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageObject {
    /// URL-encoded object key (`+` encodes a space)
    pub key: String,
}

impl UploadRecord {
    pub fn bucket(&self) -> &str {
        &self.s3.bucket.name
    }

    /// Decoded object key
    pub fn object_key(&self) -> Result<String> {
        let plus_decoded = self.s3.object.key.replace('+', " ");
        urlencoding::decode(&plus_decoded)
            .map(|key| key.into_owned())
            .map_err(|e| Error::InvalidInput(format!("Object key is not valid UTF-8: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_dispatch_message_wire_format() {
        let msg = DispatchMessage {
            file_path: "files/dev-1/2024-05-01/18-00/audio.wav".to_string(),
            device_id: "dev-1".to_string(),
            recorded_at: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
            source_ref: "watchme-vault".to_string(),
            local_date: None,
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["recorded_at"], "2024-05-01T09:00:00Z");
        assert_eq!(json["source_ref"], "watchme-vault");
        assert!(json.get("local_date").is_none());
    }

    #[test]
    fn test_completion_notification_accepts_feature_names() {
        let body = r#"{"device_id":"dev-1","recorded_at":"2024-05-01T09:00:00+00:00","feature_type":"behavior","status":"completed"}"#;
        let note: CompletionNotification = serde_json::from_str(body).unwrap();
        assert_eq!(note.feature_type, Stage::Sed);
        assert_eq!(note.status, JobStatus::Completed);
        assert_eq!(note.recording().recorded_at_str(), "2024-05-01T09:00:00Z");
    }

    #[test]
    fn test_upload_event_decodes_object_key() {
        let body = r#"{"Records":[{"s3":{"bucket":{"name":"vault"},"object":{"key":"files/dev%2D1/2024-05-01/18-00/my+audio.wav"}}}]}"#;
        let event: UploadEvent = serde_json::from_str(body).unwrap();
        assert_eq!(event.records.len(), 1);
        assert_eq!(event.records[0].bucket(), "vault");
        assert_eq!(
            event.records[0].object_key().unwrap(),
            "files/dev-1/2024-05-01/18-00/my audio.wav"
        );
    }
}
