//! The pipeline's data model: events, queue envelopes and dead letters.

use super::EventType;
use purgeq_sdk::objects::DeadLetterEntry;
use time::OffsetDateTime;
use uuid::Uuid;

/// Identifier assigned to a message by the queue on enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub Uuid);

impl MessageId {
    /// Allocate a fresh, time-ordered id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A single object change, normalized into the cache path to invalidate.
///
/// `path` always starts with exactly one `/` and contains no characters
/// reserved by the queue transport; see [`crate::path::is_transport_safe`].
/// Build events through [`crate::path::PathNormalizer::event`] to keep that
/// invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationEvent {
    pub path: String,
    pub object_key: String,
    pub event_type: EventType,
    pub received_at: OffsetDateTime,
}

/// Queue envelope around an [`InvalidationEvent`].
///
/// Owned by the queue until it is acknowledged or dead-lettered. Consumers
/// only read it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub message_id: MessageId,
    /// Number of times the message has been handed to a consumer, including
    /// the current delivery.
    pub delivery_count: u32,
    pub enqueued_at: OffsetDateTime,
    pub event: InvalidationEvent,
}

/// A message moved to the dead-letter sink after exhausting its delivery
/// budget. Terminal: never redelivered, never acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub message: QueueMessage,
    pub dead_lettered_at: OffsetDateTime,
}

impl From<&DeadLetter> for DeadLetterEntry {
    fn from(value: &DeadLetter) -> Self {
        let message = &value.message;
        DeadLetterEntry {
            message_id: message.message_id.0,
            path: message.event.path.clone(),
            object_key: message.event.object_key.clone(),
            event_type: message.event.event_type.into(),
            delivery_count: message.delivery_count,
            enqueued_at: message.enqueued_at.unix_timestamp(),
            dead_lettered_at: value.dead_lettered_at.unix_timestamp(),
        }
    }
}
