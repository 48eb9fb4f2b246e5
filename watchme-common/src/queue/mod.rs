//! Queue transport abstraction
//!
//! Every pipeline hop is a message on a named queue with at-least-once
//! delivery. Messages carry an ordering group (in-order delivery within a
//! group, independent across groups) and an optional dedup id that lets the
//! transport collapse duplicate sends into one logical message.

mod memory;

pub use memory::{DeadLetter, InMemoryFifoQueue};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::QueueConfig;
use crate::types::Stage;
use crate::Result;

/// Transport-assigned message identifier
pub type MessageId = String;

/// Message handed to [`MessageQueue::send`]
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub body: String,
    pub group_id: String,
    pub dedup_id: Option<String>,
}

/// Message handed out by [`MessageQueue::receive`]
///
/// Invisible to other receivers until acked, nacked, or its visibility
/// timeout elapses.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub id: MessageId,
    pub body: String,
    pub group_id: String,
    /// Handle for ack/nack of this particular delivery
    pub receipt: String,
    /// Number of times this message has been delivered, this delivery included
    pub receive_count: u32,
}

impl ReceivedMessage {
    /// Decode the JSON body
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// At-least-once message transport
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Queue name, for logs and the depth report
    fn name(&self) -> &str;

    /// Enqueue a message
    ///
    /// A repeated dedup id inside the dedup window is accepted without
    /// enqueueing anything and returns the id of the original message.
    async fn send(&self, message: OutgoingMessage) -> Result<MessageId>;

    /// Receive up to `max` visible messages
    async fn receive(&self, max: usize) -> Result<Vec<ReceivedMessage>>;

    /// Remove a delivered message permanently
    async fn ack(&self, receipt: &str) -> Result<()>;

    /// Return a delivered message for redelivery
    async fn nack(&self, receipt: &str) -> Result<()>;

    /// Messages not yet acked, in flight included
    async fn depth(&self) -> Result<usize>;
}

/// Serialize `body` as JSON and send it
pub async fn send_json<T: Serialize + ?Sized>(
    queue: &dyn MessageQueue,
    body: &T,
    group_id: impl Into<String>,
    dedup_id: Option<String>,
) -> Result<MessageId> {
    let message = OutgoingMessage {
        body: serde_json::to_string(body)?,
        group_id: group_id.into(),
        dedup_id,
    };
    queue.send(message).await
}

// ============================================================================
// Named pipeline queues
// ============================================================================

/// The queues connecting pipeline roles
#[derive(Clone)]
pub struct QueueSet {
    pub asr: Arc<dyn MessageQueue>,
    pub sed: Arc<dyn MessageQueue>,
    pub ser: Arc<dyn MessageQueue>,
    pub completion: Arc<dyn MessageQueue>,
    pub summary: Arc<dyn MessageQueue>,
    pub analysis: Arc<dyn MessageQueue>,
    pub notification: Arc<dyn MessageQueue>,
}

impl QueueSet {
    /// Build every queue as an in-process FIFO queue
    pub fn in_memory(config: &QueueConfig) -> Self {
        let make = |name: &str| -> Arc<dyn MessageQueue> {
            Arc::new(InMemoryFifoQueue::new(
                name,
                Duration::from_secs(config.visibility_timeout_secs),
                config.max_receive_count,
                Duration::from_secs(config.dedup_window_secs),
                Duration::from_millis(config.redelivery_delay_ms),
            ))
        };

        Self {
            asr: make("asr"),
            sed: make("sed"),
            ser: make("ser"),
            completion: make("completion"),
            summary: make("summary"),
            analysis: make("analysis"),
            notification: make("notification"),
        }
    }

    /// Dispatch queue for a stage
    pub fn stage(&self, stage: Stage) -> &Arc<dyn MessageQueue> {
        match stage {
            Stage::Asr => &self.asr,
            Stage::Sed => &self.sed,
            Stage::Ser => &self.ser,
        }
    }

    /// All queues in pipeline order
    pub fn all(&self) -> [&Arc<dyn MessageQueue>; 7] {
        [
            &self.asr,
            &self.sed,
            &self.ser,
            &self.completion,
            &self.summary,
            &self.analysis,
            &self.notification,
        ]
    }
}
