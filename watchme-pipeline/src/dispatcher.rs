//! Fan-out dispatcher
//!
//! Turns one upload event into three dispatch messages, one per stage queue.
//!
//! # Contract
//! 1. Resolve (device_id, recorded_at) from the Status Store by object path
//! 2. Without a store row, derive both from the path
//!    (`files/{device_id}/{YYYY-MM-DD}/{HH-MM}/...`), or fail with `MalformedPath`
//! 3. Compute one dedup key per stage and send to that stage's queue with
//!    ordering group `"{device_id}-{stage}"`
//! 4. Any failed enqueue surfaces as `PartialDispatchFailure` naming the stages;
//!    stages that were enqueued are collapsed by their dedup key on redelivery

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use watchme_common::dedup::{dedup_key, ordering_group};
use watchme_common::messages::{DispatchMessage, UploadEvent};
use watchme_common::queue::{send_json, MessageId, QueueSet};
use watchme_common::store::StatusStore;
use watchme_common::time::instant_from_path_segments;
use watchme_common::{Error, RecordingKey, Result, Stage};

/// One stage's enqueue result
#[derive(Debug, Clone, Serialize)]
pub struct StageDispatch {
    pub stage: Stage,
    pub dedup_key: String,
    pub message_id: MessageId,
}

/// Result of dispatching one uploaded object
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub file_path: String,
    pub device_id: String,
    pub recorded_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_date: Option<NaiveDate>,
    /// Whether the identity came from the store or from the path
    pub resolved_from_store: bool,
    pub stages: Vec<StageDispatch>,
}

/// Object path segments of an uploaded recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathParts<'a> {
    pub device_id: &'a str,
    pub date: &'a str,
    pub time_slot: &'a str,
}

/// Split `files/{device_id}/{date}/{time_slot}/...`
///
/// Returns `None` when the path has fewer than four segments or an empty
/// device segment.
pub fn parse_object_path(path: &str) -> Option<PathParts<'_>> {
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() < 4 || parts[1].trim().is_empty() {
        return None;
    }
    Some(PathParts {
        device_id: parts[1],
        date: parts[2],
        time_slot: parts[3],
    })
}

/// Upload-event fan-out
pub struct Dispatcher {
    store: Arc<dyn StatusStore>,
    queues: QueueSet,
    fallback_offset: FixedOffset,
}

impl Dispatcher {
    /// # Arguments
    /// * `fallback_offset` - offset used to read the path's local date/time slot
    ///   when the store has no row for the object
    pub fn new(store: Arc<dyn StatusStore>, queues: QueueSet, fallback_offset: FixedOffset) -> Self {
        Self {
            store,
            queues,
            fallback_offset,
        }
    }

    /// Dispatch every record of an upload event
    ///
    /// Stops at the first record that fails; records already dispatched are
    /// deduplicated if the whole event is redelivered.
    pub async fn dispatch_event(&self, event: &UploadEvent) -> Result<Vec<DispatchReport>> {
        if event.records.is_empty() {
            return Err(Error::InvalidInput("Upload event has no records".to_string()));
        }

        let mut reports = Vec::with_capacity(event.records.len());
        for record in &event.records {
            let object_key = record.object_key()?;
            reports.push(self.dispatch(&object_key, record.bucket()).await?);
        }
        Ok(reports)
    }

    /// Dispatch one uploaded object to all three stage queues
    pub async fn dispatch(&self, file_path: &str, source_ref: &str) -> Result<DispatchReport> {
        let (recording, local_date, resolved_from_store) = self.resolve(file_path).await?;

        let message = DispatchMessage {
            file_path: file_path.to_string(),
            device_id: recording.device_id.clone(),
            recorded_at: recording.recorded_at,
            source_ref: source_ref.to_string(),
            local_date,
        };

        let mut stages = Vec::with_capacity(Stage::ALL.len());
        let mut failed = Vec::new();

        for stage in Stage::ALL {
            let key = dedup_key(&recording, stage);
            let group = ordering_group(&recording.device_id, stage);

            match send_json(self.queues.stage(stage).as_ref(), &message, group, Some(key.clone())).await {
                Ok(message_id) => stages.push(StageDispatch {
                    stage,
                    dedup_key: key,
                    message_id,
                }),
                Err(e) => {
                    error!(
                        device_id = %recording.device_id,
                        recorded_at = %recording.recorded_at_str(),
                        stage = %stage,
                        error = %e,
                        "Failed to enqueue dispatch message"
                    );
                    failed.push(stage);
                }
            }
        }

        if !failed.is_empty() {
            return Err(Error::PartialDispatchFailure { failed });
        }

        info!(
            device_id = %recording.device_id,
            recorded_at = %recording.recorded_at_str(),
            file_path,
            "Recording dispatched to all stages"
        );

        Ok(DispatchReport {
            file_path: file_path.to_string(),
            device_id: recording.device_id,
            recorded_at: recording.recorded_at,
            local_date,
            resolved_from_store,
            stages,
        })
    }

    /// Resolve the recording identity for an object path
    async fn resolve(&self, file_path: &str) -> Result<(RecordingKey, Option<NaiveDate>, bool)> {
        if let Some(row) = self.store.find_recording_by_path(file_path).await? {
            return Ok((row.key(), row.local_date, true));
        }

        let parts = parse_object_path(file_path)
            .ok_or_else(|| Error::MalformedPath(format!("no device id in {}", file_path)))?;

        let recorded_at = instant_from_path_segments(parts.date, parts.time_slot, &self.fallback_offset)
            .ok_or_else(|| {
                Error::MalformedPath(format!(
                    "unparseable date/time slot {}/{} in {} and no store row",
                    parts.date, parts.time_slot, file_path
                ))
            })?;

        warn!(
            file_path,
            device_id = parts.device_id,
            recorded_at = %recorded_at,
            "No store row for object, identity derived from path"
        );

        Ok((RecordingKey::new(parts.device_id, recorded_at), None, false))
    }
}
