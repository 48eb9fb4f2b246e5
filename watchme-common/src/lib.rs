//! # WatchMe Common Library
//!
//! Shared code for every pipeline role (dispatcher, stage workers, coordinator, relays):
//! - Domain types and message envelopes
//! - Deduplication keys and ordering groups
//! - Configuration loading and logging bootstrap
//! - Queue transport abstraction
//! - Status Store client
//! - Upstream call wrapper with bounded retry

pub mod config;
pub mod dedup;
pub mod error;
pub mod logging;
pub mod messages;
pub mod queue;
pub mod store;
pub mod time;
pub mod types;
pub mod upstream;

pub use error::{Error, Result};
pub use types::{AggregateStatus, JobStatus, RecordingKey, Stage};
