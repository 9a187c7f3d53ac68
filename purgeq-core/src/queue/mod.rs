//! Durable, at-least-once message queue for invalidation events.
//!
//! The queue is a port: [`MemoryQueue`] keeps everything in process and is
//! used for tests and single-node development, [`PgQueue`] stores messages in
//! PostgreSQL and can be shared by several processes.
//!
//! Delivery semantics are the same for both:
//! - every delivery increments the message's delivery count and hides it for
//!   the visibility timeout;
//! - a message that is not acknowledged in time becomes visible again;
//! - a message about to be delivered with `delivery_count >= max_delivery_count`
//!   is moved to the dead-letter sink instead.

mod memory;
mod postgres;

pub use memory::MemoryQueue;
pub use postgres::PgQueue;

use crate::entities::{DeadLetter, InvalidationEvent, MessageId, QueueMessage};
use async_trait::async_trait;
use purgeq_sdk::objects::QueueStatsResponse;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The queue has been closed and accepts no more work
    #[error("queue is closed")]
    Closed,
}

/// Depth of the queue at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub visible: u64,
    pub in_flight: u64,
    pub dead_lettered: u64,
}

impl From<QueueStats> for QueueStatsResponse {
    fn from(value: QueueStats) -> Self {
        QueueStatsResponse {
            visible: value.visible,
            in_flight: value.in_flight,
            dead_lettered: value.dead_lettered,
        }
    }
}

/// At-least-once message buffer with delivery counting and a dead-letter sink.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Store every event, or none of them.
    ///
    /// Returns the assigned ids in the order of `events`.
    async fn enqueue_batch(
        &self,
        events: Vec<InvalidationEvent>,
    ) -> Result<Vec<MessageId>, QueueError>;

    /// Store a single event.
    async fn enqueue(&self, event: InvalidationEvent) -> Result<MessageId, QueueError> {
        let ids = self.enqueue_batch(vec![event]).await?;
        ids.into_iter().next().ok_or(QueueError::Closed)
    }

    /// Receive up to `max_count` messages.
    ///
    /// Returns as soon as `max_count` messages are visible. Otherwise waits
    /// until the oldest visible message has been visible for `max_wait` and
    /// returns whatever is visible then. Returns an empty batch if nothing
    /// became visible within `max_wait` of the call.
    async fn receive(
        &self,
        max_count: usize,
        max_wait: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    /// Permanently remove messages. Unknown ids are ignored.
    ///
    /// Returns the number of messages removed.
    async fn ack(&self, message_ids: &[MessageId]) -> Result<u64, QueueError>;

    /// Most recently dead-lettered messages, newest first.
    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, QueueError>;

    /// Current queue depth.
    async fn stats(&self) -> Result<QueueStats, QueueError>;
}
