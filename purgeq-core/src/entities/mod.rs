pub mod invalidation_event;
pub mod queue_records;

pub use invalidation_event::{DeadLetter, InvalidationEvent, MessageId, QueueMessage};

use purgeq_sdk::objects::ObjectEventType;

/// Object change kind for database operations.
///
/// This is the sqlx::Type version. For API/DTO use, see `purgeq_sdk::objects::ObjectEventType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "object_event_type")]
pub enum EventType {
    Created,
    Updated,
    Deleted,
}

impl From<EventType> for ObjectEventType {
    fn from(value: EventType) -> Self {
        match value {
            EventType::Created => ObjectEventType::Created,
            EventType::Updated => ObjectEventType::Updated,
            EventType::Deleted => ObjectEventType::Deleted,
        }
    }
}

impl From<ObjectEventType> for EventType {
    fn from(value: ObjectEventType) -> Self {
        match value {
            ObjectEventType::Created => EventType::Created,
            ObjectEventType::Updated => EventType::Updated,
            ObjectEventType::Deleted => EventType::Deleted,
        }
    }
}
