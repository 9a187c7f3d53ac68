//! PostgreSQL-backed queue.

use super::{MessageQueue, QueueError, QueueStats};
use crate::config::QueueConfig;
use crate::entities::queue_records::{
    ClaimVisibleMessages, DeadLetterExhaustedMessages, DeleteInvalidationMessages,
    GetQueueStats, GetVisibleBacklog, InsertInvalidationMessages, ListDeadLetters,
};
use crate::entities::{DeadLetter, InvalidationEvent, MessageId, QueueMessage};
use crate::framework::DatabaseProcessor;
use async_trait::async_trait;
use kanau::processor::Processor;
use sqlx::PgPool;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Queue stored in the `invalidation_messages` and
/// `invalidation_dead_letters` tables.
///
/// Several processes may share one database: claims skip rows locked by
/// another consumer, so a visible message is handed to one consumer at a
/// time. Visibility is judged by the database clock.
#[derive(Debug, Clone)]
pub struct PgQueue {
    db: DatabaseProcessor,
    config: QueueConfig,
}

impl PgQueue {
    pub fn new(pool: PgPool, config: QueueConfig) -> Self {
        Self {
            db: DatabaseProcessor { pool },
            config,
        }
    }
}

#[async_trait]
impl MessageQueue for PgQueue {
    async fn enqueue_batch(
        &self,
        events: Vec<InvalidationEvent>,
    ) -> Result<Vec<MessageId>, QueueError> {
        let ids = self
            .db
            .process(InsertInvalidationMessages { events })
            .await?;
        debug!(messages = ids.len(), "Enqueued invalidation events");
        Ok(ids)
    }

    async fn receive(
        &self,
        max_count: usize,
        max_wait: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let max_count = max_count.max(1);
        let limit = i64::try_from(max_count).unwrap_or(i64::MAX);
        let started = Instant::now();

        loop {
            let moved = self
                .db
                .process(DeadLetterExhaustedMessages {
                    max_delivery_count: self.config.max_delivery_count,
                })
                .await?;
            if moved > 0 {
                warn!(
                    messages = moved,
                    "Messages exhausted their delivery budget, moved to dead letters"
                );
            }

            let backlog = self.db.process(GetVisibleBacklog).await?;
            let remaining = match backlog.oldest_age_secs {
                Some(age) => {
                    let age = Duration::try_from_secs_f64(age.max(0.0)).unwrap_or_default();
                    if backlog.visible >= limit || age >= max_wait {
                        let batch = self
                            .db
                            .process(ClaimVisibleMessages {
                                limit,
                                visibility_timeout: self.config.visibility_timeout,
                                max_delivery_count: self.config.max_delivery_count,
                            })
                            .await?;
                        // Another consumer may have claimed the backlog first.
                        if !batch.is_empty() {
                            debug!(messages = batch.len(), "Delivered batch");
                            return Ok(batch);
                        }
                        self.config.poll_interval
                    } else {
                        max_wait - age
                    }
                }
                None => {
                    let waited = started.elapsed();
                    if waited >= max_wait {
                        return Ok(Vec::new());
                    }
                    max_wait - waited
                }
            };

            let pause = self.config.poll_interval.min(remaining);
            tokio::time::sleep(pause.max(Duration::from_millis(1))).await;
        }
    }

    async fn ack(&self, message_ids: &[MessageId]) -> Result<u64, QueueError> {
        Ok(self
            .db
            .process(DeleteInvalidationMessages {
                message_ids: message_ids.to_vec(),
            })
            .await?)
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, QueueError> {
        Ok(self
            .db
            .process(ListDeadLetters {
                limit: i64::try_from(limit).unwrap_or(i64::MAX),
            })
            .await?)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        Ok(self.db.process(GetQueueStats).await?)
    }
}

/// These need a PostgreSQL server:
/// `DATABASE_URL=postgres://... cargo test -p purgeq-core -- --ignored`.
/// Every test gets its own freshly migrated database.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::EventType;
    use std::collections::HashSet;
    use time::OffsetDateTime;

    fn event(path: &str) -> InvalidationEvent {
        InvalidationEvent {
            path: path.to_string(),
            object_key: path.trim_start_matches('/').to_string(),
            event_type: EventType::Updated,
            received_at: OffsetDateTime::now_utc(),
        }
    }

    fn queue(pool: PgPool) -> PgQueue {
        PgQueue::new(
            pool,
            QueueConfig {
                max_delivery_count: 2,
                visibility_timeout: Duration::from_millis(500),
                poll_interval: Duration::from_millis(20),
            },
        )
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn full_batch_is_claimed_without_waiting(pool: PgPool) {
        let queue = queue(pool);
        let events = (0..5).map(|i| event(&format!("/p/{i}"))).collect();
        let ids = queue.enqueue_batch(events).await.unwrap();

        let start = Instant::now();
        let batch = queue.receive(5, Duration::from_secs(30)).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(batch.len(), 5);
        assert!(batch.iter().all(|m| m.delivery_count == 1));
        let received: HashSet<MessageId> = batch.iter().map(|m| m.message_id).collect();
        assert_eq!(received, ids.into_iter().collect());
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn partial_batch_waits_for_window(pool: PgPool) {
        let queue = queue(pool);
        queue.enqueue(event("/a")).await.unwrap();

        let start = Instant::now();
        let batch = queue.receive(10, Duration::from_secs(1)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(800));
        assert_eq!(batch.len(), 1);
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn empty_queue_returns_empty_after_window(pool: PgPool) {
        let queue = queue(pool);
        let start = Instant::now();
        assert!(
            queue
                .receive(10, Duration::from_millis(300))
                .await
                .unwrap()
                .is_empty()
        );
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn batch_is_capped_and_oldest_first(pool: PgPool) {
        let queue = queue(pool);
        for path in ["/a", "/b", "/c"] {
            queue.enqueue(event(path)).await.unwrap();
        }

        let batch = queue.receive(2, Duration::ZERO).await.unwrap();
        let paths: Vec<&str> = batch.iter().map(|m| m.event.path.as_str()).collect();
        assert_eq!(paths, ["/a", "/b"]);

        let stats = queue.stats().await.unwrap();
        assert_eq!((stats.visible, stats.in_flight), (1, 2));
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn unacked_message_is_redelivered_then_dead_lettered(pool: PgPool) {
        let queue = queue(pool);
        let id = queue.enqueue(event("/a")).await.unwrap();

        let first = queue.receive(1, Duration::ZERO).await.unwrap();
        assert_eq!(first[0].delivery_count, 1);

        // Comes back once the visibility timeout expires.
        let second = queue.receive(1, Duration::from_secs(5)).await.unwrap();
        assert_eq!(second[0].message_id, id);
        assert_eq!(second[0].delivery_count, 2);

        let third = queue.receive(1, Duration::from_secs(1)).await.unwrap();
        assert!(third.is_empty());

        let stats = queue.stats().await.unwrap();
        assert_eq!(
            stats,
            QueueStats {
                visible: 0,
                in_flight: 0,
                dead_lettered: 1,
            }
        );
        let dead = queue.dead_letters(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].message.message_id, id);
        assert_eq!(dead[0].message.delivery_count, 2);
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn claim_skips_message_that_expired_after_the_sweep(pool: PgPool) {
        let queue = queue(pool.clone());
        let db = DatabaseProcessor { pool: pool.clone() };
        let id = queue.enqueue(event("/a")).await.unwrap();

        sqlx::query(
            "UPDATE invalidation_messages \
             SET delivery_count = 2, visible_at = now() + interval '300 milliseconds'",
        )
        .execute(&pool)
        .await
        .unwrap();

        let moved = db
            .process(DeadLetterExhaustedMessages {
                max_delivery_count: 2,
            })
            .await
            .unwrap();
        assert_eq!(moved, 0);

        tokio::time::sleep(Duration::from_millis(400)).await;
        let claimed = db
            .process(ClaimVisibleMessages {
                limit: 10,
                visibility_timeout: Duration::from_secs(30),
                max_delivery_count: 2,
            })
            .await
            .unwrap();
        assert!(claimed.is_empty());

        // The next receive sweeps it into the dead letters.
        assert!(queue.receive(1, Duration::ZERO).await.unwrap().is_empty());
        let dead = queue.dead_letters(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].message.message_id, id);
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn concurrent_claims_do_not_overlap(pool: PgPool) {
        let queue = queue(pool.clone());
        let events = (0..20).map(|i| event(&format!("/p/{i}"))).collect();
        queue.enqueue_batch(events).await.unwrap();

        let db = DatabaseProcessor { pool };
        let claim = || ClaimVisibleMessages {
            limit: 20,
            visibility_timeout: Duration::from_secs(30),
            max_delivery_count: 2,
        };
        let (a, b) = tokio::join!(db.process(claim()), db.process(claim()));
        let (a, b) = (a.unwrap(), b.unwrap());

        let distinct: HashSet<MessageId> =
            a.iter().chain(b.iter()).map(|m| m.message_id).collect();
        assert_eq!(a.len() + b.len(), 20);
        assert_eq!(distinct.len(), 20);
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn ack_removes_message_and_ignores_unknown_ids(pool: PgPool) {
        let queue = queue(pool);
        let id = queue.enqueue(event("/a")).await.unwrap();
        queue.receive(1, Duration::ZERO).await.unwrap();

        assert_eq!(queue.ack(&[id, MessageId::new()]).await.unwrap(), 1);
        assert_eq!(queue.ack(&[id]).await.unwrap(), 0);
        assert_eq!(queue.stats().await.unwrap(), QueueStats::default());
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn failed_insert_enqueues_nothing(pool: PgPool) {
        let queue = queue(pool);
        // PostgreSQL text cannot hold NUL, so the second row fails.
        let result = queue
            .enqueue_batch(vec![event("/ok"), event("/bad\0")])
            .await;
        assert!(matches!(result, Err(QueueError::Database(_))));
        assert_eq!(queue.stats().await.unwrap(), QueueStats::default());
    }
}
