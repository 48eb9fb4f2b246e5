//! Deduplication keys and ordering groups for dispatch messages
//!
//! The dedup key is the idempotency anchor against duplicate upload events:
//! the same (device_id, recorded_at, stage) always yields the same key, so the
//! queue transport collapses repeated dispatches into one logical job.

use sha2::{Digest, Sha256};

use crate::types::{RecordingKey, Stage};

/// Maximum number of hex characters kept from the digest
///
/// A SHA-256 hex digest is 64 characters, so in practice the whole digest is kept.
pub const DEDUP_KEY_MAX_LEN: usize = 80;

/// Compute the dedup key for one stage of one recording
///
/// `hex(SHA-256(device_id + "-" + recorded_at + "-" + stage))`, truncated to
/// [`DEDUP_KEY_MAX_LEN`] characters. `recorded_at` is rendered canonically.
pub fn dedup_key(recording: &RecordingKey, stage: Stage) -> String {
    labelled_key(recording, stage.as_str())
}

/// Dedup key for a per-recording message that is not tied to a stage
///
/// Same construction as [`dedup_key`] with `label` in place of the stage name.
pub fn labelled_key(recording: &RecordingKey, label: &str) -> String {
    let material = format!("{}-{}-{}", recording.device_id, recording.recorded_at_str(), label);

    let digest = Sha256::digest(material.as_bytes());
    let mut hex = format!("{:x}", digest);
    hex.truncate(DEDUP_KEY_MAX_LEN);
    hex
}

/// Ordering group for a (device, stage) pair: `"{device_id}-{stage}"`
///
/// Messages sharing a group are delivered in submission order; different
/// groups proceed independently.
pub fn ordering_group(device_id: &str, stage: Stage) -> String {
    format!("{}-{}", device_id, stage.as_str())
}
