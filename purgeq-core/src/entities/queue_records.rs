//! PostgreSQL queries backing [`crate::queue::PgQueue`].
//!
//! Every operation is a single statement, so each one is atomic without an
//! explicit transaction.

use crate::entities::{DeadLetter, EventType, InvalidationEvent, MessageId, QueueMessage};
use crate::framework::DatabaseProcessor;
use crate::queue::QueueStats;
use kanau::processor::Processor;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
struct InvalidationMessageRow {
    message_id: Uuid,
    path: String,
    object_key: String,
    event_type: EventType,
    received_at: OffsetDateTime,
    enqueued_at: OffsetDateTime,
    delivery_count: i32,
}

impl From<InvalidationMessageRow> for QueueMessage {
    fn from(row: InvalidationMessageRow) -> Self {
        QueueMessage {
            message_id: MessageId(row.message_id),
            delivery_count: u32::try_from(row.delivery_count).unwrap_or_default(),
            enqueued_at: row.enqueued_at,
            event: InvalidationEvent {
                path: row.path,
                object_key: row.object_key,
                event_type: row.event_type,
                received_at: row.received_at,
            },
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct DeadLetterRow {
    #[sqlx(flatten)]
    message: InvalidationMessageRow,
    dead_lettered_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
/// Insert a set of events as new, immediately visible messages.
///
/// Uses one multi-row INSERT, so either every event is stored or none is.
pub struct InsertInvalidationMessages {
    pub events: Vec<InvalidationEvent>,
}

impl Processor<InsertInvalidationMessages> for DatabaseProcessor {
    type Output = Vec<MessageId>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertInvalidationMessages")]
    async fn process(
        &self,
        insert: InsertInvalidationMessages,
    ) -> Result<Vec<MessageId>, sqlx::Error> {
        if insert.events.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<MessageId> = insert.events.iter().map(|_| MessageId::new()).collect();

        let mut query_builder = sqlx::QueryBuilder::new(
            "INSERT INTO invalidation_messages \
            (message_id, path, object_key, event_type, received_at) ",
        );

        query_builder.push_values(ids.iter().zip(insert.events), |mut b, (id, event)| {
            b.push_bind(id.0)
                .push_bind(event.path)
                .push_bind(event.object_key)
                .push_bind(event.event_type)
                .push_bind(event.received_at);
        });

        query_builder.build().execute(&self.pool).await?;
        Ok(ids)
    }
}

#[derive(Debug, Clone)]
/// Move every visible message whose delivery budget is spent into the
/// dead-letter table.
///
/// Returns the number of messages moved.
pub struct DeadLetterExhaustedMessages {
    pub max_delivery_count: u32,
}

impl Processor<DeadLetterExhaustedMessages> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:DeadLetterExhaustedMessages")]
    async fn process(&self, query: DeadLetterExhaustedMessages) -> Result<u64, sqlx::Error> {
        let max_delivery_count = i32::try_from(query.max_delivery_count).unwrap_or(i32::MAX);
        let result = sqlx::query(
            r#"
            WITH exhausted AS (
                DELETE FROM invalidation_messages
                WHERE visible_at <= now() AND delivery_count >= $1
                RETURNING message_id, path, object_key, event_type,
                          received_at, enqueued_at, delivery_count
            )
            INSERT INTO invalidation_dead_letters
                (message_id, path, object_key, event_type,
                 received_at, enqueued_at, delivery_count)
            SELECT message_id, path, object_key, event_type,
                   received_at, enqueued_at, delivery_count
            FROM exhausted
            "#,
        )
        .bind(max_delivery_count)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

/// Visible backlog of the queue as seen by the database clock.
#[derive(Debug, Clone, Copy, sqlx::FromRow)]
pub struct VisibleBacklog {
    pub visible: i64,
    /// Seconds since the oldest visible message became visible.
    pub oldest_age_secs: Option<f64>,
}

#[derive(Debug, Clone)]
/// Count visible messages and measure how long the oldest one has waited.
pub struct GetVisibleBacklog;

impl Processor<GetVisibleBacklog> for DatabaseProcessor {
    type Output = VisibleBacklog;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetVisibleBacklog")]
    async fn process(&self, _query: GetVisibleBacklog) -> Result<VisibleBacklog, sqlx::Error> {
        sqlx::query_as::<_, VisibleBacklog>(
            r#"
            SELECT
                count(*) AS visible,
                EXTRACT(EPOCH FROM (now() - min(visible_at)))::float8 AS oldest_age_secs
            FROM invalidation_messages
            WHERE visible_at <= now()
            "#,
        )
        .fetch_one(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Claim up to `limit` visible messages for delivery.
///
/// Claimed rows get their delivery count incremented and stay invisible for
/// `visibility_timeout`. `SKIP LOCKED` keeps concurrent consumers from
/// claiming the same row. Rows that already reached `max_delivery_count` are
/// never claimed, even if they became visible after the last
/// [`DeadLetterExhaustedMessages`] sweep.
pub struct ClaimVisibleMessages {
    pub limit: i64,
    pub visibility_timeout: Duration,
    pub max_delivery_count: u32,
}

impl Processor<ClaimVisibleMessages> for DatabaseProcessor {
    type Output = Vec<QueueMessage>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ClaimVisibleMessages")]
    async fn process(&self, claim: ClaimVisibleMessages) -> Result<Vec<QueueMessage>, sqlx::Error> {
        let max_delivery_count = i32::try_from(claim.max_delivery_count).unwrap_or(i32::MAX);
        let rows = sqlx::query_as::<_, InvalidationMessageRow>(
            r#"
            UPDATE invalidation_messages AS m
            SET delivery_count = m.delivery_count + 1,
                visible_at = now() + make_interval(secs => $2)
            WHERE m.message_id IN (
                SELECT message_id
                FROM invalidation_messages
                WHERE visible_at <= now() AND delivery_count < $3
                ORDER BY visible_at, enqueued_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING m.message_id, m.path, m.object_key, m.event_type,
                      m.received_at, m.enqueued_at, m.delivery_count
            "#,
        )
        .bind(claim.limit)
        .bind(claim.visibility_timeout.as_secs_f64())
        .bind(max_delivery_count)
        .fetch_all(&self.pool)
        .await?;

        let mut messages: Vec<QueueMessage> = rows.into_iter().map(Into::into).collect();
        messages.sort_by_key(|m| m.enqueued_at);
        Ok(messages)
    }
}

#[derive(Debug, Clone)]
/// Permanently remove acknowledged messages.
///
/// Returns the number of rows removed; unknown ids are ignored.
pub struct DeleteInvalidationMessages {
    pub message_ids: Vec<MessageId>,
}

impl Processor<DeleteInvalidationMessages> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:DeleteInvalidationMessages")]
    async fn process(&self, delete: DeleteInvalidationMessages) -> Result<u64, sqlx::Error> {
        if delete.message_ids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<Uuid> = delete.message_ids.iter().map(|id| id.0).collect();
        let result = sqlx::query("DELETE FROM invalidation_messages WHERE message_id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone)]
/// List the most recent dead letters.
pub struct ListDeadLetters {
    pub limit: i64,
}

impl Processor<ListDeadLetters> for DatabaseProcessor {
    type Output = Vec<DeadLetter>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListDeadLetters")]
    async fn process(&self, query: ListDeadLetters) -> Result<Vec<DeadLetter>, sqlx::Error> {
        let rows = sqlx::query_as::<_, DeadLetterRow>(
            r#"
            SELECT message_id, path, object_key, event_type,
                   received_at, enqueued_at, delivery_count, dead_lettered_at
            FROM invalidation_dead_letters
            ORDER BY dead_lettered_at DESC
            LIMIT $1
            "#,
        )
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| DeadLetter {
                message: row.message.into(),
                dead_lettered_at: row.dead_lettered_at,
            })
            .collect())
    }
}

#[derive(Debug, Clone, Copy, sqlx::FromRow)]
struct QueueStatsRow {
    visible: i64,
    in_flight: i64,
    dead_lettered: i64,
}

#[derive(Debug, Clone)]
/// Count visible, in-flight and dead-lettered messages.
pub struct GetQueueStats;

impl Processor<GetQueueStats> for DatabaseProcessor {
    type Output = QueueStats;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetQueueStats")]
    async fn process(&self, _query: GetQueueStats) -> Result<QueueStats, sqlx::Error> {
        let row = sqlx::query_as::<_, QueueStatsRow>(
            r#"
            SELECT
                (SELECT count(*) FROM invalidation_messages WHERE visible_at <= now()) AS visible,
                (SELECT count(*) FROM invalidation_messages WHERE visible_at > now()) AS in_flight,
                (SELECT count(*) FROM invalidation_dead_letters) AS dead_lettered
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueStats {
            visible: u64::try_from(row.visible).unwrap_or_default(),
            in_flight: u64::try_from(row.in_flight).unwrap_or_default(),
            dead_lettered: u64::try_from(row.dead_lettered).unwrap_or_default(),
        })
    }
}
