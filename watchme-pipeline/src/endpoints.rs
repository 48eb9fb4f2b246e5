//! Typed client for the upstream API gateway
//!
//! Wraps [`UpstreamClient`] with the endpoint paths from `[api]` and
//! `[stages.*]` and the request shapes each endpoint expects.

use chrono::NaiveDate;
use serde_json::{json, Value};
use watchme_common::config::{ApiConfig, CompletionModeKind, StageConfig};
use watchme_common::messages::DispatchMessage;
use watchme_common::types::FailureReason;
use watchme_common::upstream::{CallClass, CallOutcome, CallSpec, RetryPolicy, UpstreamClient};
use watchme_common::{RecordingKey, Result};

/// Upstream API gateway
#[derive(Debug, Clone)]
pub struct PipelineApi {
    client: UpstreamClient,
    paths: ApiConfig,
}

impl PipelineApi {
    pub fn new(client: UpstreamClient, paths: ApiConfig) -> Self {
        Self { client, paths }
    }

    /// Same gateway with one attempt per call
    pub fn single_attempt(&self) -> Self {
        Self {
            client: self.client.with_policy(RetryPolicy::single_attempt()),
            paths: self.paths.clone(),
        }
    }

    pub fn paths(&self) -> &ApiConfig {
        &self.paths
    }

    // ========================================================================
    // Stage endpoints
    // ========================================================================

    /// Invoke a stage extraction endpoint for one recording
    ///
    /// Batch endpoints receive `{file_paths: [...]}` and answer synchronously;
    /// accepted endpoints receive the recording identity and answer 202.
    pub async fn run_stage(&self, stage: &StageConfig, message: &DispatchMessage) -> Result<CallOutcome> {
        match stage.mode {
            CompletionModeKind::Batch => {
                self.client
                    .post_json(
                        &stage.path,
                        &json!({ "file_paths": [message.file_path] }),
                        CallSpec::synchronous(CallClass::Analysis),
                    )
                    .await
            }
            CompletionModeKind::Accepted => {
                self.client
                    .post_json(
                        &stage.path,
                        &json!({
                            "file_path": message.file_path,
                            "device_id": message.device_id,
                            "recorded_at": message.recording().recorded_at_str(),
                        }),
                        CallSpec::accepted(),
                    )
                    .await
            }
        }
    }

    /// Stage-aggregator follow-up: `{device_id, date}` -> `{task_id}`
    pub async fn stage_follow_up(&self, path: &str, device_id: &str, date: NaiveDate) -> Result<CallOutcome> {
        self.client
            .post_json(
                path,
                &json!({ "device_id": device_id, "date": date.to_string() }),
                CallSpec::synchronous(CallClass::Start),
            )
            .await
    }

    /// Write an explicit failure record for a recording
    pub async fn create_failed_record(
        &self,
        key: &RecordingKey,
        reason: FailureReason,
        error_message: &str,
    ) -> Result<CallOutcome> {
        self.client
            .post_query(
                &self.paths.failed_record_path,
                &[
                    ("device_id", key.device_id.clone()),
                    ("recorded_at", key.recorded_at_str()),
                    ("failure_reason", reason.as_str().to_string()),
                    ("error_message", error_message.to_string()),
                ],
                CallSpec::status_only(CallClass::Start),
            )
            .await
    }

    // ========================================================================
    // Aggregation chain
    // ========================================================================

    pub async fn aggregate_spot(&self, key: &RecordingKey) -> Result<CallOutcome> {
        self.client
            .post_json(
                &self.paths.aggregator_path,
                &recording_body(key),
                CallSpec::status_only(CallClass::Chain),
            )
            .await
    }

    /// Profiler answers `{vibe_score, summary}`
    pub async fn profile_spot(&self, key: &RecordingKey) -> Result<CallOutcome> {
        self.client
            .post_json(
                &self.paths.profiler_path,
                &recording_body(key),
                CallSpec::synchronous(CallClass::Chain),
            )
            .await
    }

    /// Daily aggregator answers `{aggregated_prompt}`
    pub async fn daily_summary(&self, device_id: &str, local_date: NaiveDate) -> Result<CallOutcome> {
        self.client
            .post_json(
                &self.paths.daily_summary_path,
                &json!({ "device_id": device_id, "local_date": local_date.to_string() }),
                CallSpec::synchronous(CallClass::Chain),
            )
            .await
    }

    /// Dashboard analysis answers `{status|success, analysis_result}`
    pub async fn dashboard_analysis(&self, device_id: &str, date: NaiveDate) -> Result<CallOutcome> {
        self.client
            .post_json(
                &self.paths.dashboard_analysis_path,
                &json!({ "device_id": device_id, "date": date.to_string() }),
                CallSpec::synchronous(CallClass::Chain),
            )
            .await
    }

    pub async fn weekly_aggregate(&self, device_id: &str, week_start: NaiveDate) -> Result<CallOutcome> {
        self.client
            .post_json(
                &self.paths.weekly_aggregator_path,
                &weekly_body(device_id, week_start),
                CallSpec::synchronous(CallClass::Chain),
            )
            .await
    }

    pub async fn weekly_profile(&self, device_id: &str, week_start: NaiveDate) -> Result<CallOutcome> {
        self.client
            .post_json(
                &self.paths.weekly_profiler_path,
                &weekly_body(device_id, week_start),
                CallSpec::synchronous(CallClass::Chain),
            )
            .await
    }

    /// POST a push payload to an absolute gateway URL
    pub async fn send_push(&self, gateway_url: &str, payload: &Value) -> Result<CallOutcome> {
        self.client
            .post_json(gateway_url, payload, CallSpec::status_only(CallClass::Start))
            .await
    }
}

fn recording_body(key: &RecordingKey) -> Value {
    json!({ "device_id": key.device_id, "recorded_at": key.recorded_at_str() })
}

fn weekly_body(device_id: &str, week_start: NaiveDate) -> Value {
    json!({ "device_id": device_id, "week_start_date": week_start.to_string() })
}
