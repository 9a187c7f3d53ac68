//! Turns a received batch of messages into invalidation calls.
//!
//! Paths are deduplicated (first occurrence wins the position) and split
//! into chunks no larger than the CDN's per-call limit. Each chunk remembers
//! which messages contributed to it, so that after the calls return only the
//! messages whose every chunk succeeded get acknowledged.

use crate::entities::{MessageId, QueueMessage};
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Raised when the chunking lost track of a message. Indicates a bug, not
/// bad input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("message {0} is not covered by any invalidation batch")]
    Uncovered(MessageId),
}

/// Paths sent in one invalidation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationBatch {
    /// Distinct paths, in first-seen order.
    pub paths: Vec<String>,
    /// Every message that contributed at least one of `paths`.
    pub message_ids: Vec<MessageId>,
}

/// The calls to make for one drain cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainPlan {
    batches: Vec<InvalidationBatch>,
    /// Every received message, in receive order.
    message_ids: Vec<MessageId>,
}

impl DrainPlan {
    pub fn batches(&self) -> &[InvalidationBatch] {
        &self.batches
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn path_count(&self) -> usize {
        self.batches.iter().map(|b| b.paths.len()).sum()
    }

    /// Messages that may be acknowledged given the outcome of each batch.
    ///
    /// `succeeded[i]` is the outcome of `batches()[i]`. A message is
    /// ackable only if every batch holding one of its paths succeeded.
    pub fn ackable(&self, succeeded: &[bool]) -> Vec<MessageId> {
        let failed: HashSet<MessageId> = self
            .batches
            .iter()
            .enumerate()
            .filter(|(i, _)| !succeeded.get(*i).copied().unwrap_or(false))
            .flat_map(|(_, b)| b.message_ids.iter().copied())
            .collect();
        self.message_ids
            .iter()
            .copied()
            .filter(|id| !failed.contains(id))
            .collect()
    }
}

/// Plan the invalidation calls for `messages`.
///
/// Every distinct path lands in exactly one batch of at most
/// `max_paths_per_call` paths.
pub fn plan(messages: &[QueueMessage], max_paths_per_call: usize) -> Result<DrainPlan, PlanError> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(messages.len());
    let mut distinct: Vec<(&str, SmallVec<[MessageId; 2]>)> = Vec::with_capacity(messages.len());

    for message in messages {
        let path = message.event.path.as_str();
        match index.get(path) {
            Some(&i) => {
                if let Some((_, ids)) = distinct.get_mut(i) {
                    ids.push(message.message_id);
                }
            }
            None => {
                index.insert(path, distinct.len());
                let mut ids = SmallVec::new();
                ids.push(message.message_id);
                distinct.push((path, ids));
            }
        }
    }

    let batches: Vec<InvalidationBatch> = distinct
        .chunks(max_paths_per_call.max(1))
        .map(|chunk| {
            let mut seen = HashSet::new();
            let mut message_ids = Vec::new();
            for id in chunk.iter().flat_map(|(_, ids)| ids.iter().copied()) {
                if seen.insert(id) {
                    message_ids.push(id);
                }
            }
            InvalidationBatch {
                paths: chunk.iter().map(|(path, _)| path.to_string()).collect(),
                message_ids,
            }
        })
        .collect();

    let covered: HashSet<MessageId> = batches
        .iter()
        .flat_map(|b| b.message_ids.iter().copied())
        .collect();
    if let Some(missing) = messages.iter().find(|m| !covered.contains(&m.message_id)) {
        return Err(PlanError::Uncovered(missing.message_id));
    }

    Ok(DrainPlan {
        batches,
        message_ids: messages.iter().map(|m| m.message_id).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{EventType, InvalidationEvent};
    use time::OffsetDateTime;

    fn message(path: &str) -> QueueMessage {
        QueueMessage {
            message_id: MessageId::new(),
            delivery_count: 1,
            enqueued_at: OffsetDateTime::now_utc(),
            event: InvalidationEvent {
                path: path.to_string(),
                object_key: path.to_string(),
                event_type: EventType::Updated,
                received_at: OffsetDateTime::now_utc(),
            },
        }
    }

    #[test]
    fn empty_input_plans_nothing() {
        let plan = plan(&[], 10).unwrap();
        assert!(plan.is_empty());
        assert!(plan.ackable(&[]).is_empty());
    }

    #[test]
    fn duplicate_paths_collapse_in_first_seen_order() {
        let messages = vec![message("/b"), message("/a"), message("/b")];
        let plan = plan(&messages, 10).unwrap();

        assert_eq!(plan.batches().len(), 1);
        let batch = &plan.batches()[0];
        assert_eq!(batch.paths, ["/b", "/a"]);
        assert_eq!(batch.message_ids.len(), 3);

        let acked = plan.ackable(&[true]);
        assert_eq!(
            acked,
            messages.iter().map(|m| m.message_id).collect::<Vec<_>>()
        );
    }

    #[test]
    fn chunks_cover_every_path_exactly_once() {
        let messages: Vec<_> = (0..7).map(|i| message(&format!("/p/{i}"))).collect();
        let plan = plan(&messages, 3).unwrap();

        let sizes: Vec<_> = plan.batches().iter().map(|b| b.paths.len()).collect();
        assert_eq!(sizes, [3, 3, 1]);

        let all: Vec<&str> = plan
            .batches()
            .iter()
            .flat_map(|b| b.paths.iter().map(String::as_str))
            .collect();
        let expected: Vec<String> = (0..7).map(|i| format!("/p/{i}")).collect();
        assert_eq!(all, expected);
        assert_eq!(plan.path_count(), 7);
    }

    #[test]
    fn failed_chunk_withholds_only_its_messages() {
        let messages = vec![message("/a"), message("/b"), message("/c")];
        let plan = plan(&messages, 2).unwrap();

        let acked = plan.ackable(&[true, false]);
        assert_eq!(acked, [messages[0].message_id, messages[1].message_id]);
    }

    #[test]
    fn shared_path_across_failed_chunk_withholds_message() {
        // The duplicate of "/a" keeps the third message in the first chunk.
        let messages = vec![message("/a"), message("/b"), message("/a")];
        let plan = plan(&messages, 1).unwrap();
        assert_eq!(plan.batches().len(), 2);

        let acked = plan.ackable(&[false, true]);
        assert_eq!(acked, [messages[1].message_id]);
    }

    #[test]
    fn zero_limit_is_treated_as_one() {
        let messages = vec![message("/a"), message("/b")];
        let plan = plan(&messages, 0).unwrap();
        assert_eq!(plan.batches().len(), 2);
    }
}
