//! Queue consumer runtime
//!
//! Each pipeline role is a [`MessageHandler`]; a [`Consumer`] binds one
//! handler to one queue and runs the receive → handle → ack/nack loop.
//! `Ok` acks the delivery, `Err` nacks it so the transport redelivers (and
//! eventually dead-letters) the message.

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use watchme_common::queue::{MessageQueue, ReceivedMessage};
use watchme_common::Result;

/// A pipeline role consuming one queue
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &ReceivedMessage) -> Result<()>;
}

/// Binds a handler to a queue
#[derive(Clone)]
pub struct Consumer {
    queue: Arc<dyn MessageQueue>,
    handler: Arc<dyn MessageHandler>,
    poll_interval: Duration,
}

impl Consumer {
    pub fn new(queue: Arc<dyn MessageQueue>, handler: Arc<dyn MessageHandler>, poll_interval: Duration) -> Self {
        Self {
            queue,
            handler,
            poll_interval,
        }
    }

    /// Receive one batch and handle every message in it
    ///
    /// Returns the number of messages handled successfully.
    pub async fn poll_once(&self) -> Result<usize> {
        let messages = self.queue.receive(1).await?;
        let mut handled = 0;

        for message in messages {
            match self.handler.handle(&message).await {
                Ok(()) => {
                    self.queue.ack(&message.receipt).await?;
                    handled += 1;
                }
                Err(e) => {
                    warn!(
                        queue = self.queue.name(),
                        message_id = %message.id,
                        receive_count = message.receive_count,
                        error = %e,
                        "Handler failed, returning message for redelivery"
                    );
                    self.queue.nack(&message.receipt).await?;
                }
            }
        }

        Ok(handled)
    }

    /// Poll until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        debug!(queue = self.queue.name(), "Consumer started");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let idle = match self.poll_once().await {
                Ok(handled) => handled == 0,
                Err(e) => {
                    error!(queue = self.queue.name(), error = %e, "Queue poll failed");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        }

        debug!(queue = self.queue.name(), "Consumer stopped");
    }
}

/// Running consumer tasks
pub struct ConsumerPool {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl ConsumerPool {
    /// Spawn `per_queue` tasks for every consumer
    pub fn spawn(consumers: Vec<Consumer>, per_queue: usize, cancel: CancellationToken) -> Self {
        let mut handles = Vec::with_capacity(consumers.len() * per_queue);
        for consumer in consumers {
            for _ in 0..per_queue {
                handles.push(tokio::spawn(consumer.clone().run(cancel.clone())));
            }
        }

        info!(tasks = handles.len(), "Queue consumers running");
        Self { cancel, handles }
    }

    /// Cancel every consumer and wait for in-flight handlers to finish
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                error!(error = %e, "Consumer task panicked");
            }
        }
        info!("Queue consumers stopped");
    }
}
