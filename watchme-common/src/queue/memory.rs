//! In-process FIFO queue with ordering groups and content deduplication
//!
//! Delivery rules:
//! - Within a group, the oldest unacked message must be acked before the next
//!   one is handed out (at most one in-flight message per group)
//! - Groups never block each other
//! - A dedup id seen inside the dedup window collapses the send
//! - A message delivered `max_receive_count` times without an ack moves to the
//!   dead-letter list on its next receive

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{MessageId, MessageQueue, OutgoingMessage, ReceivedMessage};
use crate::{Error, Result};

#[derive(Debug)]
struct Entry {
    id: MessageId,
    body: String,
    group_id: String,
    visible_at: Instant,
    receive_count: u32,
    /// Receipt and visibility deadline of the current delivery
    in_flight: Option<(String, Instant)>,
}

/// Message moved out of the queue after too many deliveries
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub id: MessageId,
    pub body: String,
    pub group_id: String,
    pub receive_count: u32,
}

#[derive(Debug, Default)]
struct Inner {
    messages: VecDeque<Entry>,
    /// dedup id -> (original message id, first seen)
    dedup: HashMap<String, (MessageId, Instant)>,
    dead_letters: Vec<DeadLetter>,
}

/// FIFO queue held in process memory
pub struct InMemoryFifoQueue {
    name: String,
    visibility_timeout: Duration,
    max_receive_count: u32,
    dedup_window: Duration,
    redelivery_delay: Duration,
    inner: Mutex<Inner>,
}

impl InMemoryFifoQueue {
    /// Create a queue
    ///
    /// # Arguments
    /// * `visibility_timeout` - how long a delivery may stay unacked before redelivery
    /// * `max_receive_count` - deliveries allowed before dead-lettering
    /// * `dedup_window` - lifetime of a dedup id
    /// * `redelivery_delay` - invisibility applied by `nack`
    pub fn new(
        name: impl Into<String>,
        visibility_timeout: Duration,
        max_receive_count: u32,
        dedup_window: Duration,
        redelivery_delay: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            visibility_timeout,
            max_receive_count: max_receive_count.max(1),
            dedup_window,
            redelivery_delay,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Messages that exhausted their deliveries
    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.lock().await.dead_letters.clone()
    }
}

#[async_trait]
impl MessageQueue for InMemoryFifoQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: OutgoingMessage) -> Result<MessageId> {
        let now = Instant::now();
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let window = self.dedup_window;
        inner.dedup.retain(|_, (_, seen)| now.duration_since(*seen) < window);

        if let Some(dedup_id) = &message.dedup_id {
            if let Some((original, _)) = inner.dedup.get(dedup_id) {
                debug!(
                    queue = %self.name,
                    dedup_id = %dedup_id,
                    message_id = %original,
                    "Duplicate send collapsed"
                );
                return Ok(original.clone());
            }
        }

        let id = Uuid::new_v4().to_string();
        if let Some(dedup_id) = message.dedup_id {
            inner.dedup.insert(dedup_id, (id.clone(), now));
        }

        inner.messages.push_back(Entry {
            id: id.clone(),
            body: message.body,
            group_id: message.group_id,
            visible_at: now,
            receive_count: 0,
            in_flight: None,
        });

        Ok(id)
    }

    async fn receive(&self, max: usize) -> Result<Vec<ReceivedMessage>> {
        let now = Instant::now();
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        // Expired deliveries become visible again
        for entry in inner.messages.iter_mut() {
            if let Some((_, deadline)) = &entry.in_flight {
                if *deadline <= now {
                    entry.in_flight = None;
                    entry.visible_at = now;
                }
            }
        }

        let mut blocked: HashSet<String> = HashSet::new();
        let mut delivered = Vec::new();
        let mut index = 0;

        while index < inner.messages.len() && delivered.len() < max {
            let entry = &mut inner.messages[index];

            if blocked.contains(&entry.group_id) {
                index += 1;
                continue;
            }

            if entry.in_flight.is_some() || entry.visible_at > now {
                blocked.insert(entry.group_id.clone());
                index += 1;
                continue;
            }

            if entry.receive_count >= self.max_receive_count {
                if let Some(dead) = inner.messages.remove(index) {
                    warn!(
                        queue = %self.name,
                        message_id = %dead.id,
                        receive_count = dead.receive_count,
                        "Message moved to dead-letter list"
                    );
                    inner.dead_letters.push(DeadLetter {
                        id: dead.id,
                        body: dead.body,
                        group_id: dead.group_id,
                        receive_count: dead.receive_count,
                    });
                }
                continue;
            }

            let receipt = Uuid::new_v4().to_string();
            entry.receive_count += 1;
            entry.in_flight = Some((receipt.clone(), now + self.visibility_timeout));
            blocked.insert(entry.group_id.clone());

            delivered.push(ReceivedMessage {
                id: entry.id.clone(),
                body: entry.body.clone(),
                group_id: entry.group_id.clone(),
                receipt,
                receive_count: entry.receive_count,
            });
            index += 1;
        }

        Ok(delivered)
    }

    async fn ack(&self, receipt: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let position = inner
            .messages
            .iter()
            .position(|e| matches!(&e.in_flight, Some((r, _)) if r == receipt))
            .ok_or_else(|| Error::Queue(format!("{}: unknown or expired receipt", self.name)))?;
        inner.messages.remove(position);
        Ok(())
    }

    async fn nack(&self, receipt: &str) -> Result<()> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        let entry = inner
            .messages
            .iter_mut()
            .find(|e| matches!(&e.in_flight, Some((r, _)) if r == receipt))
            .ok_or_else(|| Error::Queue(format!("{}: unknown or expired receipt", self.name)))?;
        entry.in_flight = None;
        entry.visible_at = now + self.redelivery_delay;
        Ok(())
    }

    async fn depth(&self) -> Result<usize> {
        Ok(self.inner.lock().await.messages.len())
    }
}
