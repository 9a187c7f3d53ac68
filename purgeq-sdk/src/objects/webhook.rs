//! Webhook payload types for object change notifications.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Table name the storage service uses for object rows.
pub const STORAGE_OBJECTS_TABLE: &str = "objects";

/// Kind of change applied to a stored object.
///
/// This is the API/DTO version without sqlx::Type.
/// For database operations, use the version in `purgeq-core::entities`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectEventType {
    Created,
    Updated,
    Deleted,
}

impl std::fmt::Display for ObjectEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectEventType::Created => write!(f, "created"),
            ObjectEventType::Updated => write!(f, "updated"),
            ObjectEventType::Deleted => write!(f, "deleted"),
        }
    }
}

/// Body of `POST /webhook`.
///
/// Two shapes are accepted: an explicit list of changed objects, or a
/// single row-change event as emitted by a database webhook on the
/// storage service's object table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WebhookPayload {
    Objects(ObjectBatch),
    StorageRow(StorageRowEvent),
}

/// Explicit list of changed objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectBatch {
    pub objects: Vec<ChangedObject>,
}

/// One changed object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedObject {
    /// Bucket (namespace) holding the object.
    pub bucket: String,
    /// Object key inside the bucket. A trailing `/` marks a folder.
    pub key: String,
    pub event_type: ObjectEventType,
}

/// Row operation reported by a database webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RowChange {
    Insert,
    Update,
    Delete,
}

/// Row-change event on the storage object table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRowEvent {
    #[serde(rename = "type")]
    pub change: RowChange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<StorageObjectRow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_record: Option<StorageObjectRow>,
}

/// The columns of a storage object row that identify the object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageObjectRow {
    pub bucket_id: String,
    pub name: String,
}

/// Errors raised while flattening a payload into changed objects.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("payload lists no changed objects")]
    Empty,
    #[error("row event is for table `{0}`, expected `objects`")]
    UnexpectedTable(String),
    #[error("{0} event carries no `{1}`")]
    MissingRecord(&'static str, &'static str),
}

impl WebhookPayload {
    /// Flatten the payload into the list of objects whose cached copies
    /// must be invalidated.
    pub fn into_changed_objects(self) -> Result<Vec<ChangedObject>, PayloadError> {
        match self {
            WebhookPayload::Objects(batch) => {
                if batch.objects.is_empty() {
                    return Err(PayloadError::Empty);
                }
                Ok(batch.objects)
            }
            WebhookPayload::StorageRow(row) => row.into_changed_objects(),
        }
    }
}

impl StorageRowEvent {
    fn into_changed_objects(self) -> Result<Vec<ChangedObject>, PayloadError> {
        if let Some(table) = self.table
            && table != STORAGE_OBJECTS_TABLE
        {
            return Err(PayloadError::UnexpectedTable(table));
        }

        match self.change {
            RowChange::Insert => {
                let record = self
                    .record
                    .ok_or(PayloadError::MissingRecord("INSERT", "record"))?;
                Ok(vec![record.into_changed(ObjectEventType::Created)])
            }
            RowChange::Update => {
                let record = self
                    .record
                    .ok_or(PayloadError::MissingRecord("UPDATE", "record"))?;
                let mut objects = Vec::with_capacity(2);
                // A rename or move leaves a stale copy at the old location.
                if let Some(old) = self.old_record
                    && old != record
                {
                    objects.push(old.into_changed(ObjectEventType::Deleted));
                }
                objects.push(record.into_changed(ObjectEventType::Updated));
                Ok(objects)
            }
            RowChange::Delete => {
                let old = self
                    .old_record
                    .or(self.record)
                    .ok_or(PayloadError::MissingRecord("DELETE", "old_record"))?;
                Ok(vec![old.into_changed(ObjectEventType::Deleted)])
            }
        }
    }
}

impl StorageObjectRow {
    fn into_changed(self, event_type: ObjectEventType) -> ChangedObject {
        ChangedObject {
            bucket: self.bucket_id,
            key: self.name,
            event_type,
        }
    }
}

/// Response of an accepted `POST /webhook`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookAccepted {
    /// Queue message ids, one per changed object, in payload order.
    pub message_ids: Vec<Uuid>,
    /// Normalized cache paths, aligned with `message_ids`.
    pub paths: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_object_batch() {
        let json = r#"{"objects":[{"bucket":"public","key":"images/a.png","event_type":"deleted"}]}"#;
        let payload: WebhookPayload = serde_json::from_str(json).unwrap();
        let objects = payload.into_changed_objects().unwrap();
        assert_eq!(
            objects,
            vec![ChangedObject {
                bucket: "public".to_string(),
                key: "images/a.png".to_string(),
                event_type: ObjectEventType::Deleted,
            }]
        );
    }

    #[test]
    fn empty_batch_is_rejected() {
        let payload: WebhookPayload = serde_json::from_str(r#"{"objects":[]}"#).unwrap();
        assert_eq!(payload.into_changed_objects(), Err(PayloadError::Empty));
    }

    #[test]
    fn parses_row_delete_from_old_record() {
        let json = r#"{
            "type": "DELETE",
            "table": "objects",
            "schema": "storage",
            "record": null,
            "old_record": {"bucket_id": "avatars", "name": "u/1.png", "owner": "x"}
        }"#;
        let payload: WebhookPayload = serde_json::from_str(json).unwrap();
        let objects = payload.into_changed_objects().unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].bucket, "avatars");
        assert_eq!(objects[0].key, "u/1.png");
        assert_eq!(objects[0].event_type, ObjectEventType::Deleted);
    }

    #[test]
    fn row_update_with_move_yields_both_locations() {
        let json = r#"{
            "type": "UPDATE",
            "table": "objects",
            "record": {"bucket_id": "public", "name": "new/a.png"},
            "old_record": {"bucket_id": "public", "name": "old/a.png"}
        }"#;
        let payload: WebhookPayload = serde_json::from_str(json).unwrap();
        let objects = payload.into_changed_objects().unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].key, "old/a.png");
        assert_eq!(objects[0].event_type, ObjectEventType::Deleted);
        assert_eq!(objects[1].key, "new/a.png");
        assert_eq!(objects[1].event_type, ObjectEventType::Updated);
    }

    #[test]
    fn row_update_in_place_yields_one_object() {
        let json = r#"{
            "type": "UPDATE",
            "record": {"bucket_id": "public", "name": "a.png"},
            "old_record": {"bucket_id": "public", "name": "a.png"}
        }"#;
        let payload: WebhookPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.into_changed_objects().unwrap().len(), 1);
    }

    #[test]
    fn row_event_for_other_table_is_rejected() {
        let json = r#"{"type": "INSERT", "table": "buckets", "record": {"bucket_id": "b", "name": "n"}}"#;
        let payload: WebhookPayload = serde_json::from_str(json).unwrap();
        assert_eq!(
            payload.into_changed_objects(),
            Err(PayloadError::UnexpectedTable("buckets".to_string()))
        );
    }

    #[test]
    fn unknown_row_type_does_not_parse() {
        let json = r#"{"type": "TRUNCATE", "table": "objects"}"#;
        assert!(serde_json::from_str::<WebhookPayload>(json).is_err());
    }
}
