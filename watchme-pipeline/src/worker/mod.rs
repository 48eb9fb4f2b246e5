//! Stage Workers (ASR, SED, SER)
//!
//! One worker per stage consumes its dispatch queue, invokes the stage's
//! extraction endpoint through the upstream wrapper, and records the outcome.
//!
//! # Per-message flow
//! 1. Read the job's own status; a `skipped` job is never processed
//! 2. Invoke the endpoint (batch or accepted completion mode)
//! 3. Batch mode: write `completed` / `failed`, run the optional follow-up,
//!    then emit a CompletionNotification
//! 4. Accepted mode: a 202 is the whole job; the endpoint writes the status
//!    and emits the notification itself
//!
//! Errors returned from [`StageWorker::process`] are infrastructure failures
//! (store or queue unreachable, connection refused) and lead to redelivery.

pub mod completion;

pub use completion::{batch_item_succeeded, StageCompletionMode, StageResult};

use async_trait::async_trait;
use chrono::FixedOffset;
use std::sync::Arc;
use tracing::{error, info, warn};
use watchme_common::config::StageConfig;
use watchme_common::messages::{CompletionNotification, DispatchMessage};
use watchme_common::queue::{send_json, MessageQueue, ReceivedMessage};
use watchme_common::store::StatusStore;
use watchme_common::time::fallback_local_date;
use watchme_common::types::FailureReason;
use watchme_common::upstream::CallOutcome;
use watchme_common::{JobStatus, RecordingKey, Result, Stage};

use crate::endpoints::PipelineApi;
use crate::runtime::MessageHandler;

/// Consumer of one stage's dispatch queue
pub struct StageWorker {
    stage: Stage,
    config: StageConfig,
    mode: StageCompletionMode,
    api: PipelineApi,
    store: Arc<dyn StatusStore>,
    completion_queue: Arc<dyn MessageQueue>,
    fallback_offset: FixedOffset,
}

impl StageWorker {
    pub fn new(
        stage: Stage,
        config: StageConfig,
        api: PipelineApi,
        store: Arc<dyn StatusStore>,
        completion_queue: Arc<dyn MessageQueue>,
        fallback_offset: FixedOffset,
    ) -> Self {
        Self {
            stage,
            mode: StageCompletionMode::from(config.mode),
            config,
            api,
            store,
            completion_queue,
            fallback_offset,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Process one dispatch message
    pub async fn process(&self, message: &DispatchMessage) -> Result<StageResult> {
        let recording = message.recording();

        if let Some(statuses) = self.store.feature_statuses(&recording).await? {
            if statuses.get(self.stage) == JobStatus::Skipped {
                return self.finish_skipped(&recording).await;
            }
        }

        info!(
            device_id = %recording.device_id,
            recorded_at = %recording.recorded_at_str(),
            stage = %self.stage,
            "Invoking stage endpoint"
        );

        let outcome = self.api.run_stage(&self.config, message).await?;
        let result = self.mode.interpret(&outcome, &message.file_path);

        match result {
            StageResult::Acknowledged => {
                info!(
                    device_id = %recording.device_id,
                    recorded_at = %recording.recorded_at_str(),
                    stage = %self.stage,
                    "Stage endpoint accepted the job"
                );
            }
            StageResult::Completed => {
                self.store
                    .set_feature_status(&recording, self.stage, JobStatus::Completed)
                    .await?;
                self.follow_up(message).await;
                self.notify(&recording, JobStatus::Completed).await?;
                info!(
                    device_id = %recording.device_id,
                    recorded_at = %recording.recorded_at_str(),
                    stage = %self.stage,
                    "Stage completed"
                );
            }
            StageResult::Failed(reason) => {
                self.store
                    .set_feature_status(&recording, self.stage, JobStatus::Failed)
                    .await?;
                self.record_failure(&recording, reason, &describe(&outcome)).await;
                self.notify(&recording, JobStatus::Failed).await?;
                warn!(
                    device_id = %recording.device_id,
                    recorded_at = %recording.recorded_at_str(),
                    stage = %self.stage,
                    reason = %reason,
                    "Stage failed"
                );
            }
            // interpret never yields Skipped
            StageResult::Skipped => {}
        }

        Ok(result)
    }

    async fn finish_skipped(&self, recording: &RecordingKey) -> Result<StageResult> {
        info!(
            device_id = %recording.device_id,
            recorded_at = %recording.recorded_at_str(),
            stage = %self.stage,
            "Job marked skipped, not processing"
        );
        self.record_failure(recording, FailureReason::OffHoursSkip, "Recording outside processing hours")
            .await;
        self.notify(recording, JobStatus::Skipped).await?;
        Ok(StageResult::Skipped)
    }

    /// Best-effort stage aggregator call after a completed batch
    async fn follow_up(&self, message: &DispatchMessage) {
        let Some(path) = self.config.follow_up_path.as_deref() else {
            return;
        };
        let date = message
            .local_date
            .unwrap_or_else(|| fallback_local_date(&message.recorded_at, &self.fallback_offset));

        match self.api.stage_follow_up(path, &message.device_id, date).await {
            Ok(CallOutcome::Success(body)) => {
                info!(
                    device_id = %message.device_id,
                    stage = %self.stage,
                    task_id = body.get("task_id").and_then(|v| v.as_str()).unwrap_or(""),
                    "Stage follow-up started"
                );
            }
            Ok(outcome) => {
                warn!(
                    device_id = %message.device_id,
                    stage = %self.stage,
                    outcome = %describe(&outcome),
                    "Stage follow-up did not succeed"
                );
            }
            Err(e) => {
                warn!(device_id = %message.device_id, stage = %self.stage, error = %e, "Stage follow-up failed");
            }
        }
    }

    /// Best-effort explicit failure record
    async fn record_failure(&self, recording: &RecordingKey, reason: FailureReason, detail: &str) {
        match self.api.create_failed_record(recording, reason, detail).await {
            Ok(outcome) if outcome.is_success() => {}
            Ok(outcome) => warn!(
                device_id = %recording.device_id,
                recorded_at = %recording.recorded_at_str(),
                reason = %reason,
                outcome = %describe(&outcome),
                "Failure record was not created"
            ),
            Err(e) => error!(
                device_id = %recording.device_id,
                recorded_at = %recording.recorded_at_str(),
                reason = %reason,
                error = %e,
                "Failure record call errored"
            ),
        }
    }

    /// Emit the job's single CompletionNotification
    ///
    /// A redelivered dispatch message cannot produce a second notification
    /// inside the dedup window.
    async fn notify(&self, recording: &RecordingKey, status: JobStatus) -> Result<()> {
        let notification = CompletionNotification::new(recording, self.stage, status);
        send_json(
            self.completion_queue.as_ref(),
            &notification,
            notification.group_id(),
            Some(notification.dedup_id()),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for StageWorker {
    async fn handle(&self, message: &ReceivedMessage) -> Result<()> {
        let dispatch: DispatchMessage = message.decode()?;
        self.process(&dispatch).await.map(|_| ())
    }
}

fn describe(outcome: &CallOutcome) -> String {
    match outcome {
        CallOutcome::Success(_) => "item reported as failed in batch result".to_string(),
        CallOutcome::Failure(cause) => cause.to_string(),
        CallOutcome::ExhaustedRetries { attempts, last } => {
            format!("gave up after {} attempts (last: {})", attempts, last)
        }
    }
}
