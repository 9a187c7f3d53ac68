pub mod admin;
pub mod webhook;

pub use admin::{DeadLetterEntry, DeadLetterList, QueueStatsResponse};
pub use webhook::{
    ChangedObject, ObjectBatch, ObjectEventType, PayloadError, RowChange, StorageObjectRow,
    StorageRowEvent, WebhookAccepted, WebhookPayload,
};
