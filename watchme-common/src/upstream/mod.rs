//! Upstream Call Wrapper
//!
//! Every outbound call to an extraction, aggregation or relay endpoint goes
//! through [`UpstreamClient`], which applies:
//! - a timeout chosen by call class (start / analysis / chain)
//! - a bounded retry loop driven by [`RetryPolicy`]
//!
//! The result is tri-state ([`CallOutcome`]). Connection failures other than
//! timeouts are returned as `Err` so the hosting transport redelivers the
//! message.

pub mod policy;

pub use policy::{AttemptResult, FailureCause, Observation, RetryCause, RetryPolicy, Step};

use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{TimeoutConfig, TomlConfig};
use crate::{Error, Result};

/// Timeout budget class of an outbound call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallClass {
    /// Fire-and-forget start calls and best-effort follow-ups
    Start,
    /// Synchronous long-running extraction
    Analysis,
    /// Aggregation chain and relay calls
    Chain,
}

/// How one call is judged successful
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSpec {
    pub class: CallClass,
    pub success_status: u16,
    pub expects_body: bool,
}

impl CallSpec {
    /// HTTP 200 with a JSON body
    pub fn synchronous(class: CallClass) -> Self {
        Self {
            class,
            success_status: 200,
            expects_body: true,
        }
    }

    /// HTTP 200, body ignored
    pub fn status_only(class: CallClass) -> Self {
        Self {
            class,
            success_status: 200,
            expects_body: false,
        }
    }

    /// HTTP 202, body ignored
    pub fn accepted() -> Self {
        Self {
            class: CallClass::Start,
            success_status: 202,
            expects_body: false,
        }
    }
}

/// Tri-state result of a wrapped call
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    Success(Value),
    Failure(FailureCause),
    ExhaustedRetries { attempts: u32, last: RetryCause },
}

impl CallOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success(_))
    }

    /// Payload on success, a descriptive error otherwise
    pub fn into_payload(self, endpoint: &str) -> Result<Value> {
        match self {
            CallOutcome::Success(value) => Ok(value),
            CallOutcome::Failure(cause) => Err(Error::Upstream(format!("{}: {}", endpoint, cause))),
            CallOutcome::ExhaustedRetries { attempts, last } => Err(Error::Upstream(format!(
                "{}: gave up after {} attempts (last: {})",
                endpoint, attempts, last
            ))),
        }
    }
}

/// Per-class timeout budgets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTimeouts {
    pub start: Duration,
    pub analysis: Duration,
    pub chain: Duration,
}

impl CallTimeouts {
    pub fn for_class(&self, class: CallClass) -> Duration {
        match class {
            CallClass::Start => self.start,
            CallClass::Analysis => self.analysis,
            CallClass::Chain => self.chain,
        }
    }
}

impl From<&TimeoutConfig> for CallTimeouts {
    fn from(config: &TimeoutConfig) -> Self {
        Self {
            start: config.start(),
            analysis: config.analysis(),
            chain: config.chain(),
        }
    }
}

/// Retrying HTTP client for upstream endpoints
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: Client,
    base_url: String,
    timeouts: CallTimeouts,
    policy: RetryPolicy,
}

impl UpstreamClient {
    pub fn new(base_url: impl Into<String>, timeouts: CallTimeouts, policy: RetryPolicy) -> Result<Self> {
        let http = Client::builder()
            .build()
            .map_err(|e| Error::Config(format!("Failed to create upstream HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeouts,
            policy,
        })
    }

    pub fn from_config(config: &TomlConfig) -> Result<Self> {
        Self::new(
            config.api.base_url.clone(),
            CallTimeouts::from(&config.timeouts),
            RetryPolicy::from_config(&config.retry),
        )
    }

    /// Same client and timeouts with a different retry policy
    pub fn with_policy(&self, policy: RetryPolicy) -> Self {
        Self {
            policy,
            ..self.clone()
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Resolve a path against the base URL; absolute URLs pass through
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    /// POST a JSON body
    pub async fn post_json(&self, path: &str, body: &Value, spec: CallSpec) -> Result<CallOutcome> {
        self.execute(path, spec, |request| request.json(body)).await
    }

    /// POST with query parameters and no body
    pub async fn post_query(&self, path: &str, query: &[(&str, String)], spec: CallSpec) -> Result<CallOutcome> {
        self.execute(path, spec, |request| request.query(query)).await
    }

    async fn execute<F>(&self, path: &str, spec: CallSpec, build: F) -> Result<CallOutcome>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let url = self.url_for(path);
        let timeout = self.timeouts.for_class(spec.class);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            debug!(
                endpoint = path,
                attempt,
                max_attempts = self.policy.max_attempts,
                "Calling upstream"
            );

            let observation = self.attempt(&url, timeout, &build).await?;
            let result = self
                .policy
                .classify(&observation, spec.success_status, spec.expects_body);

            match self.policy.next_step(attempt, &result) {
                Step::Stop => {
                    return Ok(match result {
                        AttemptResult::Success(payload) => {
                            debug!(endpoint = path, attempt, "Upstream call succeeded");
                            CallOutcome::Success(payload)
                        }
                        AttemptResult::PermanentFailure(cause) => {
                            warn!(endpoint = path, attempt, cause = %cause, "Upstream call failed");
                            CallOutcome::Failure(cause)
                        }
                        // next_step never stops on a retryable failure
                        AttemptResult::RetryableFailure(last) => CallOutcome::ExhaustedRetries {
                            attempts: attempt,
                            last,
                        },
                    });
                }
                Step::RetryAfter(delay) => {
                    if let AttemptResult::RetryableFailure(cause) = &result {
                        info!(
                            endpoint = path,
                            attempt,
                            cause = %cause,
                            delay_ms = delay.as_millis() as u64,
                            "Retryable upstream failure, backing off"
                        );
                    }
                    tokio::time::sleep(delay).await;
                }
                Step::Exhausted => {
                    let last = match result {
                        AttemptResult::RetryableFailure(cause) => cause,
                        _ => RetryCause::Timeout,
                    };
                    warn!(endpoint = path, attempts = attempt, last = %last, "Upstream retries exhausted");
                    return Ok(CallOutcome::ExhaustedRetries {
                        attempts: attempt,
                        last,
                    });
                }
            }
        }
    }

    /// One HTTP exchange; timeouts are observations, other transport errors are errors
    async fn attempt<F>(&self, url: &str, timeout: Duration, build: &F) -> Result<Observation>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let request = build(self.http.post(url).timeout(timeout));

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Ok(Observation::Timeout),
            Err(e) => return Err(Error::Transport(e)),
        };

        let status = response.status().as_u16();
        match response.text().await {
            Ok(body) => Ok(Observation::Response { status, body }),
            Err(e) if e.is_timeout() => Ok(Observation::Timeout),
            Err(e) => Err(Error::Transport(e)),
        }
    }
}
