//! Common error types for the WatchMe pipeline

use thiserror::Error;

use crate::types::Stage;

/// Common result type for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across pipeline roles
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport-level HTTP failure not absorbed by the retry wrapper
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Status Store returned an unexpected response
    #[error("Status store error: {0}")]
    Store(String),

    /// Queue transport failure (send, receive, ack)
    #[error("Queue error: {0}")]
    Queue(String),

    /// JSON encode/decode failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage object path from which no device id can be derived
    #[error("Malformed object path: {0}")]
    MalformedPath(String),

    /// One or more stage queues rejected the dispatch message
    #[error("Dispatch failed for stages: {}", format_stages(.failed))]
    PartialDispatchFailure {
        /// Stages whose enqueue failed
        failed: Vec<Stage>,
    },

    /// Upstream endpoint call ended without success
    #[error("Upstream call failed: {0}")]
    Upstream(String),

    /// Invalid input or message content
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

fn format_stages(stages: &[Stage]) -> String {
    stages
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
