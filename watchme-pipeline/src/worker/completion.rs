//! How a stage endpoint's answer becomes a FeatureJob result
//!
//! Two completion-detection mechanisms coexist:
//! - `Batch`: the endpoint answers synchronously with a batch report that is
//!   classified per item
//! - `Accepted`: the endpoint answers 202 and later writes the status itself

use serde_json::Value;
use watchme_common::config::CompletionModeKind;
use watchme_common::types::FailureReason;
use watchme_common::upstream::{CallOutcome, RetryCause};

/// Result of one stage invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageResult {
    /// Batch report lists this item as processed
    Completed,
    /// Terminal failure with the reason recorded on the failure record
    Failed(FailureReason),
    /// Accepted-mode acknowledgement; completion arrives out of band
    Acknowledged,
    /// The job was marked skipped before processing
    Skipped,
}

/// Completion-detection mechanism of a stage endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageCompletionMode {
    Batch,
    Accepted,
}

impl From<CompletionModeKind> for StageCompletionMode {
    fn from(kind: CompletionModeKind) -> Self {
        match kind {
            CompletionModeKind::Batch => StageCompletionMode::Batch,
            CompletionModeKind::Accepted => StageCompletionMode::Accepted,
        }
    }
}

impl StageCompletionMode {
    /// Interpret a wrapped call for the job identified by `file_path`
    pub fn interpret(&self, outcome: &CallOutcome, file_path: &str) -> StageResult {
        match outcome {
            CallOutcome::Success(payload) => match self {
                StageCompletionMode::Accepted => StageResult::Acknowledged,
                StageCompletionMode::Batch => {
                    if batch_item_succeeded(payload, file_path) {
                        StageResult::Completed
                    } else {
                        StageResult::Failed(FailureReason::ProcessingFailed)
                    }
                }
            },
            CallOutcome::Failure(_) => StageResult::Failed(FailureReason::UpstreamError),
            CallOutcome::ExhaustedRetries { last, .. } => StageResult::Failed(match last {
                RetryCause::Status(429) => FailureReason::QuotaExceeded,
                RetryCause::Timeout => FailureReason::Timeout,
                RetryCause::Status(_) => FailureReason::UpstreamError,
            }),
        }
    }
}

/// Per-item classification of a batch report
///
/// 1. `file_path` in `processed_files` -> success
/// 2. `file_path` in `error_files` -> failure
/// 3. in neither -> success iff `summary.errors == 0`
///
/// Step 3 can misjudge a multi-file batch; it is kept as the documented fallback.
pub fn batch_item_succeeded(report: &Value, file_path: &str) -> bool {
    if list_contains(report.get("processed_files"), file_path) {
        return true;
    }
    if list_contains(report.get("error_files"), file_path) {
        return false;
    }

    let errors = report
        .get("summary")
        .and_then(|summary| summary.get("errors"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    errors == 0
}

/// Entries are plain paths, or objects carrying a `file_path` field
fn list_contains(list: Option<&Value>, file_path: &str) -> bool {
    let Some(items) = list.and_then(Value::as_array) else {
        return false;
    };
    items.iter().any(|item| match item {
        Value::String(path) => path == file_path,
        Value::Object(fields) => fields.get("file_path").and_then(Value::as_str) == Some(file_path),
        _ => false,
    })
}
