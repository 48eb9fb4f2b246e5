//! Weekly profile job
//!
//! Runs once per day. For every configured device it generates the weekly
//! prompt for the week containing yesterday, then the weekly profile.
//! Devices are independent: one device failing never stops the others.

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use watchme_common::time::week_start_for;

use crate::endpoints::PipelineApi;

/// Step a device's weekly run stopped at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WeeklyStep {
    Aggregator,
    Profiler,
}

/// Result for one device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceWeeklyResult {
    pub device_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spot_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memorable_events: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<WeeklyStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of one weekly run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyReport {
    pub week_start_date: NaiveDate,
    pub total_devices: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub results: Vec<DeviceWeeklyResult>,
}

pub struct WeeklyProfileJob {
    api: PipelineApi,
    device_ids: Vec<String>,
}

impl WeeklyProfileJob {
    pub fn new(api: PipelineApi, device_ids: Vec<String>) -> Self {
        Self { api, device_ids }
    }

    /// Process every device for the week containing the day before `today`
    pub async fn run(&self, today: NaiveDate) -> WeeklyReport {
        let week_start = week_start_for(today);
        info!(
            week_start_date = %week_start,
            devices = self.device_ids.len(),
            "Starting weekly profile run"
        );

        let mut results = Vec::with_capacity(self.device_ids.len());
        for device_id in &self.device_ids {
            let device_id = device_id.trim();
            if device_id.is_empty() {
                continue;
            }
            results.push(self.run_device(device_id, week_start).await);
        }

        let success_count = results.iter().filter(|r| r.success).count();
        let report = WeeklyReport {
            week_start_date: week_start,
            total_devices: results.len(),
            success_count,
            failure_count: results.len() - success_count,
            results,
        };

        info!(
            week_start_date = %week_start,
            total = report.total_devices,
            succeeded = report.success_count,
            failed = report.failure_count,
            "Weekly profile run finished"
        );
        report
    }

    async fn run_device(&self, device_id: &str, week_start: NaiveDate) -> DeviceWeeklyResult {
        let paths = self.api.paths();

        let aggregated = self
            .api
            .weekly_aggregate(device_id, week_start)
            .await
            .and_then(|outcome| outcome.into_payload(&paths.weekly_aggregator_path));
        let aggregated = match aggregated {
            Ok(payload) => payload,
            Err(e) => return failed(device_id, WeeklyStep::Aggregator, e.to_string()),
        };
        let spot_count = aggregated.get("spot_count").and_then(Value::as_u64).unwrap_or(0);

        let profiled = self
            .api
            .weekly_profile(device_id, week_start)
            .await
            .and_then(|outcome| outcome.into_payload(&paths.weekly_profiler_path));
        let profiled = match profiled {
            Ok(payload) => payload,
            Err(e) => return failed(device_id, WeeklyStep::Profiler, e.to_string()),
        };
        let memorable_events = profiled
            .pointer("/analysis_result/memorable_events")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);

        info!(device_id, spot_count, memorable_events, "Weekly profile completed");
        DeviceWeeklyResult {
            device_id: device_id.to_string(),
            success: true,
            spot_count: Some(spot_count),
            memorable_events: Some(memorable_events),
            failed_step: None,
            error: None,
        }
    }
}

fn failed(device_id: &str, step: WeeklyStep, error: String) -> DeviceWeeklyResult {
    warn!(device_id, step = ?step, error = %error, "Weekly profile failed");
    DeviceWeeklyResult {
        device_id: device_id.to_string(),
        success: false,
        spot_count: None,
        memorable_events: None,
        failed_step: Some(step),
        error: Some(error),
    }
}
