//! Operator-facing response objects.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ObjectEventType;

/// A message that exhausted its delivery budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub message_id: Uuid,
    pub path: String,
    pub object_key: String,
    pub event_type: ObjectEventType,
    pub delivery_count: u32,
    /// Unix timestamp (seconds) of the original enqueue.
    pub enqueued_at: i64,
    /// Unix timestamp (seconds) at which the message was dead-lettered.
    pub dead_lettered_at: i64,
}

/// Response of `GET /dead-letters`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterList {
    pub entries: Vec<DeadLetterEntry>,
}

/// Queue depth snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatsResponse {
    pub visible: u64,
    pub in_flight: u64,
    pub dead_lettered: u64,
}
