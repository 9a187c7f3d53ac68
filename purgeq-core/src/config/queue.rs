//! Durable queue settings.

use std::time::Duration;

/// Delivery semantics shared by every queue implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Deliveries a message gets before it is moved to the dead-letter sink.
    pub max_delivery_count: u32,
    /// How long a delivered, unacknowledged message stays invisible.
    pub visibility_timeout: Duration,
    /// Polling period of database-backed queues while waiting for a batch.
    pub poll_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_delivery_count: 2,
            visibility_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
        }
    }
}
