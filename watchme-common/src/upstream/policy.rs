//! Retry policy as a pure function of attempt classification
//!
//! One HTTP attempt produces an [`Observation`]; [`RetryPolicy::classify`]
//! turns it into a tagged [`AttemptResult`], and [`RetryPolicy::next_step`]
//! decides whether to stop, retry after a delay, or give up.

use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::config::RetryConfig;

/// What a single attempt observed on the wire
#[derive(Debug, Clone)]
pub enum Observation {
    Response { status: u16, body: String },
    Timeout,
}

/// Why an attempt is worth repeating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCause {
    Status(u16),
    Timeout,
}

impl fmt::Display for RetryCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryCause::Status(code) => write!(f, "HTTP {}", code),
            RetryCause::Timeout => f.write_str("timeout"),
        }
    }
}

/// Why an attempt ended the call without success
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// Status outside the retryable set and not the expected success status
    Status { status: u16, body: String },
    /// Expected status but the body was not the JSON the caller needs
    MalformedBody(String),
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Status { status, .. } => write!(f, "HTTP {}", status),
            FailureCause::MalformedBody(e) => write!(f, "malformed response: {}", e),
        }
    }
}

/// Tagged classification of one attempt
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptResult {
    Success(Value),
    RetryableFailure(RetryCause),
    PermanentFailure(FailureCause),
}

/// What the call loop does after an attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// The attempt was final (success or permanent failure)
    Stop,
    /// Sleep, then make another attempt
    RetryAfter(Duration),
    /// Retryable failure on the last allowed attempt
    Exhausted,
}

/// Bounded exponential-backoff retry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            retryable_statuses: config.retryable_statuses.clone(),
        }
    }

    /// Exactly one attempt; failures go back to the queue transport
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before the `retry`-th retry (1-based)
    ///
    /// `min(max_delay, base_delay * 2^(retry - 1))`
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Classify one attempt
    ///
    /// # Arguments
    /// * `expected_status` - the status meaning success (200, or 202 for accepted calls)
    /// * `expects_body` - whether success requires a JSON body
    pub fn classify(&self, observation: &Observation, expected_status: u16, expects_body: bool) -> AttemptResult {
        match observation {
            Observation::Timeout => AttemptResult::RetryableFailure(RetryCause::Timeout),
            Observation::Response { status, body } => {
                if self.retryable_statuses.contains(status) {
                    return AttemptResult::RetryableFailure(RetryCause::Status(*status));
                }
                if *status != expected_status {
                    return AttemptResult::PermanentFailure(FailureCause::Status {
                        status: *status,
                        body: body.clone(),
                    });
                }
                if !expects_body {
                    return AttemptResult::Success(serde_json::from_str(body).unwrap_or(Value::Null));
                }
                match serde_json::from_str::<Value>(body) {
                    Ok(value) => AttemptResult::Success(value),
                    Err(e) => AttemptResult::PermanentFailure(FailureCause::MalformedBody(e.to_string())),
                }
            }
        }
    }

    /// Decide what follows attempt number `attempt` (1-based)
    pub fn next_step(&self, attempt: u32, result: &AttemptResult) -> Step {
        match result {
            AttemptResult::Success(_) | AttemptResult::PermanentFailure(_) => Step::Stop,
            AttemptResult::RetryableFailure(_) if attempt >= self.max_attempts => Step::Exhausted,
            AttemptResult::RetryableFailure(_) => Step::RetryAfter(self.delay_before_retry(attempt)),
        }
    }
}
