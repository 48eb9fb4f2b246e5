//! Completion Coordinator
//!
//! Consumes CompletionNotifications and, once all three stages of a recording
//! read `completed` in the Status Store, runs the aggregation chain:
//!
//! ```text
//! awaiting ──all completed──▶ aggregating ──ok──▶ profiling ──ok──▶ done
//!                                  │                  │
//!                                  └──fail──▶ failed ◀┘
//! ```
//!
//! The barrier is evaluated against a fresh read of the store, never against
//! the notification alone, so handling the same notification twice is a
//! no-op while any stage is still outstanding.
//!
//! Every recording that reaches the chain enqueues exactly one summary
//! trigger, whether the chain ends in `done` or `failed`.

use async_trait::async_trait;
use chrono::{FixedOffset, NaiveDate};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};
use watchme_common::config::ClaimMode;
use watchme_common::dedup::labelled_key;
use watchme_common::messages::{CompletionNotification, SummaryTrigger};
use watchme_common::queue::{send_json, MessageQueue, ReceivedMessage};
use watchme_common::store::StatusStore;
use watchme_common::time::fallback_local_date;
use watchme_common::upstream::CallOutcome;
use watchme_common::{AggregateStatus, JobStatus, RecordingKey, Result, Stage};

use crate::endpoints::PipelineApi;
use crate::runtime::MessageHandler;

/// Per-recording coordination state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinationState {
    Awaiting,
    Aggregating,
    Profiling,
    Done,
    Failed,
}

impl fmt::Display for CoordinationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CoordinationState::Awaiting => "awaiting",
            CoordinationState::Aggregating => "aggregating",
            CoordinationState::Profiling => "profiling",
            CoordinationState::Done => "done",
            CoordinationState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Chain step that ended a recording in `failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainStep {
    Aggregator,
    Profiler,
}

/// What handling one notification did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinationOutcome {
    /// The notification reported a failed or skipped stage
    StageNotCompleted { stage: Stage, status: JobStatus },
    /// The notification carried `pending` or `processing`
    NotTerminal { stage: Stage, status: JobStatus },
    /// Barrier not yet satisfied
    Waiting { waiting_on: Vec<Stage> },
    /// Another coordinator holds the aggregation claim
    AlreadyClaimed,
    /// The chain ran to a terminal state
    Finished {
        state: CoordinationState,
        failed_step: Option<ChainStep>,
        local_date: NaiveDate,
    },
}

impl CoordinationOutcome {
    pub fn state(&self) -> CoordinationState {
        match self {
            CoordinationOutcome::Finished { state, .. } => *state,
            _ => CoordinationState::Awaiting,
        }
    }
}

/// Consumer of the completion queue
pub struct Coordinator {
    api: PipelineApi,
    store: Arc<dyn StatusStore>,
    summary_queue: Arc<dyn MessageQueue>,
    claim_mode: ClaimMode,
    fallback_offset: FixedOffset,
}

impl Coordinator {
    pub fn new(
        api: PipelineApi,
        store: Arc<dyn StatusStore>,
        summary_queue: Arc<dyn MessageQueue>,
        claim_mode: ClaimMode,
        fallback_offset: FixedOffset,
    ) -> Self {
        Self {
            api,
            store,
            summary_queue,
            claim_mode,
            fallback_offset,
        }
    }

    /// Handle one CompletionNotification
    ///
    /// Only `completed` can open the barrier. `failed` and `skipped` advance the
    /// dashboard summary and never return an error; `pending` and `processing`
    /// are not terminal and are ignored.
    pub async fn on_notification(&self, notification: &CompletionNotification) -> Result<CoordinationOutcome> {
        let recording = notification.recording();
        let stage = notification.feature_type;
        let status = notification.status;

        match status {
            JobStatus::Completed => self.on_completed(&recording).await,
            JobStatus::Failed | JobStatus::Skipped => {
                self.on_stage_not_completed(&recording, stage, status).await;
                Ok(CoordinationOutcome::StageNotCompleted { stage, status })
            }
            JobStatus::Pending | JobStatus::Processing => {
                info!(
                    device_id = %recording.device_id,
                    recorded_at = %recording.recorded_at_str(),
                    stage = %stage,
                    status = %status,
                    "Non-terminal stage status, ignored"
                );
                Ok(CoordinationOutcome::NotTerminal { stage, status })
            }
        }
    }

    async fn on_completed(&self, recording: &RecordingKey) -> Result<CoordinationOutcome> {
        let Some(statuses) = self.store.feature_statuses(recording).await? else {
            warn!(
                device_id = %recording.device_id,
                recorded_at = %recording.recorded_at_str(),
                "No status row for recording"
            );
            return Ok(CoordinationOutcome::Waiting {
                waiting_on: Stage::ALL.to_vec(),
            });
        };

        if !statuses.all_completed() {
            let waiting_on = statuses.waiting_on();
            info!(
                device_id = %recording.device_id,
                recorded_at = %recording.recorded_at_str(),
                vibe = %statuses.vibe,
                behavior = %statuses.behavior,
                emotion = %statuses.emotion,
                "Not all stages complete yet"
            );
            return Ok(CoordinationOutcome::Waiting { waiting_on });
        }

        let local_date = self.resolve_local_date(recording, statuses.local_date).await?;

        if self.claim_mode == ClaimMode::Unguarded {
            return self.finish(recording, local_date).await;
        }

        if !self.store.claim_aggregation(recording).await? {
            info!(
                device_id = %recording.device_id,
                recorded_at = %recording.recorded_at_str(),
                "Aggregation already claimed"
            );
            return Ok(CoordinationOutcome::AlreadyClaimed);
        }

        match self.finish(recording, local_date).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                // A held claim would turn every redelivery into AlreadyClaimed
                if let Err(release_error) = self.store.release_claim(recording).await {
                    error!(
                        device_id = %recording.device_id,
                        recorded_at = %recording.recorded_at_str(),
                        error = %release_error,
                        "Failed to release aggregation claim"
                    );
                }
                Err(e)
            }
        }
    }

    /// Run the chain, then trigger the summary whatever the chain's end state
    async fn finish(&self, recording: &RecordingKey, local_date: NaiveDate) -> Result<CoordinationOutcome> {
        let (state, failed_step) = self.run_chain(recording).await?;
        self.trigger_summary(recording, local_date).await?;

        Ok(CoordinationOutcome::Finished {
            state,
            failed_step,
            local_date,
        })
    }

    /// Log the stage outcome and advance the dashboard summary; errors are logged, not returned
    async fn on_stage_not_completed(&self, recording: &RecordingKey, stage: Stage, status: JobStatus) {
        warn!(
            device_id = %recording.device_id,
            recorded_at = %recording.recorded_at_str(),
            stage = %stage,
            status = %status,
            "Stage did not complete, recording stays awaiting"
        );

        let from_status = match self.store.feature_statuses(recording).await {
            Ok(statuses) => statuses.and_then(|s| s.local_date),
            Err(e) => {
                warn!(device_id = %recording.device_id, error = %e, "Status row unreadable");
                None
            }
        };
        let local_date = match self.resolve_local_date(recording, from_status).await {
            Ok(date) => date,
            Err(e) => {
                warn!(device_id = %recording.device_id, error = %e, "Recording row unreadable");
                fallback_local_date(&recording.recorded_at, &self.fallback_offset)
            }
        };

        if let Err(e) = self.trigger_summary(recording, local_date).await {
            error!(
                device_id = %recording.device_id,
                recorded_at = %recording.recorded_at_str(),
                error = %e,
                "Dashboard summary trigger not sent"
            );
        }
    }

    /// aggregating → profiling → done, or → failed at the first failing step
    async fn run_chain(&self, recording: &RecordingKey) -> Result<(CoordinationState, Option<ChainStep>)> {
        info!(
            device_id = %recording.device_id,
            recorded_at = %recording.recorded_at_str(),
            state = %CoordinationState::Aggregating,
            "All stages complete, starting aggregator"
        );

        let aggregated = self.chain_call(recording, ChainStep::Aggregator, self.api.aggregate_spot(recording).await);
        if !aggregated {
            self.store
                .set_aggregator_status(recording, AggregateStatus::Failed)
                .await?;
            return Ok((CoordinationState::Failed, Some(ChainStep::Aggregator)));
        }
        self.store
            .set_aggregator_status(recording, AggregateStatus::Completed)
            .await?;

        info!(
            device_id = %recording.device_id,
            recorded_at = %recording.recorded_at_str(),
            state = %CoordinationState::Profiling,
            "Aggregator completed, starting profiler"
        );

        let profiled = self.chain_call(recording, ChainStep::Profiler, self.api.profile_spot(recording).await);
        if !profiled {
            self.store
                .set_profiler_status(recording, AggregateStatus::Failed)
                .await?;
            return Ok((CoordinationState::Failed, Some(ChainStep::Profiler)));
        }
        self.store
            .set_profiler_status(recording, AggregateStatus::Completed)
            .await?;

        info!(
            device_id = %recording.device_id,
            recorded_at = %recording.recorded_at_str(),
            state = %CoordinationState::Done,
            "Profiler completed"
        );
        Ok((CoordinationState::Done, None))
    }

    /// Any outcome other than success, transport errors included, fails the step
    fn chain_call(&self, recording: &RecordingKey, step: ChainStep, outcome: Result<CallOutcome>) -> bool {
        match outcome {
            Ok(CallOutcome::Success(payload)) => {
                if step == ChainStep::Profiler {
                    info!(
                        device_id = %recording.device_id,
                        vibe_score = %payload.get("vibe_score").cloned().unwrap_or_default(),
                        "Profiler result"
                    );
                }
                true
            }
            Ok(outcome) => {
                warn!(
                    device_id = %recording.device_id,
                    recorded_at = %recording.recorded_at_str(),
                    step = ?step,
                    outcome = ?outcome,
                    "Chain step failed"
                );
                false
            }
            Err(e) => {
                error!(
                    device_id = %recording.device_id,
                    recorded_at = %recording.recorded_at_str(),
                    step = ?step,
                    error = %e,
                    "Chain step errored"
                );
                false
            }
        }
    }

    /// Status row date, then recording row date, then `recorded_at` at the fallback offset
    async fn resolve_local_date(&self, recording: &RecordingKey, from_status: Option<NaiveDate>) -> Result<NaiveDate> {
        if let Some(date) = from_status {
            return Ok(date);
        }
        if let Some(date) = self.store.local_date(recording).await? {
            return Ok(date);
        }

        let date = fallback_local_date(&recording.recorded_at, &self.fallback_offset);
        warn!(
            device_id = %recording.device_id,
            recorded_at = %recording.recorded_at_str(),
            local_date = %date,
            offset = %self.fallback_offset,
            "No stored local date, derived from recorded_at"
        );
        Ok(date)
    }

    async fn trigger_summary(&self, recording: &RecordingKey, local_date: NaiveDate) -> Result<()> {
        let trigger = SummaryTrigger {
            device_id: recording.device_id.clone(),
            recorded_at: recording.recorded_at,
            local_date,
        };
        let message_id = send_json(
            self.summary_queue.as_ref(),
            &trigger,
            recording.device_id.clone(),
            Some(labelled_key(recording, "summary")),
        )
        .await?;

        info!(
            device_id = %recording.device_id,
            recorded_at = %recording.recorded_at_str(),
            local_date = %local_date,
            message_id = %message_id,
            "Dashboard summary triggered"
        );
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for Coordinator {
    async fn handle(&self, message: &ReceivedMessage) -> Result<()> {
        let notification: CompletionNotification = message.decode()?;
        let outcome = self.on_notification(&notification).await?;
        if let CoordinationOutcome::Finished {
            state: CoordinationState::Failed,
            failed_step,
            ..
        } = outcome
        {
            warn!(
                device_id = %notification.device_id,
                failed_step = ?failed_step,
                "Aggregation chain ended in failed"
            );
        }
        Ok(())
    }
}
