//! In-process queue on the tokio clock.

use super::{MessageQueue, QueueError, QueueStats};
use crate::config::QueueConfig;
use crate::entities::{DeadLetter, InvalidationEvent, MessageId, QueueMessage};
use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Stand-in for "never" when `at + after` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn deadline(at: Instant, after: Duration) -> Instant {
    at.checked_add(after)
        .or_else(|| at.checked_add(FAR_FUTURE))
        .unwrap_or(at)
}

#[derive(Debug)]
struct Entry {
    message: QueueMessage,
    /// Instant from which the message may be delivered. For a visible
    /// message this is also when it became visible.
    visible_at: Instant,
}

#[derive(Debug, Default)]
struct State {
    /// Kept in enqueue order.
    entries: Vec<Entry>,
    dead_letters: Vec<DeadLetter>,
    closed: bool,
}

impl State {
    /// Move every visible message with a spent delivery budget to the
    /// dead-letter sink.
    fn reap(&mut self, now: Instant, max_delivery_count: u32) {
        let (exhausted, live): (Vec<Entry>, Vec<Entry>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| e.visible_at <= now && e.message.delivery_count >= max_delivery_count);
        self.entries = live;

        for entry in exhausted {
            warn!(
                message_id = %entry.message.message_id,
                path = %entry.message.event.path,
                delivery_count = entry.message.delivery_count,
                "Message exhausted its delivery budget, moved to dead letters"
            );
            self.dead_letters.push(DeadLetter {
                message: entry.message,
                dead_lettered_at: OffsetDateTime::now_utc(),
            });
        }
    }

    fn visible(&self, now: Instant) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(move |e| e.visible_at <= now)
    }

    /// Hand out up to `max_count` visible messages, oldest first.
    fn deliver(
        &mut self,
        now: Instant,
        max_count: usize,
        visibility_timeout: Duration,
    ) -> Vec<QueueMessage> {
        let mut ready: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.visible_at <= now)
            .map(|(i, _)| i)
            .collect();
        // Stable sort keeps enqueue order among equally old messages.
        ready.sort_by_key(|&i| self.entries.get(i).map(|e| e.visible_at));
        ready.truncate(max_count);

        let mut delivered = Vec::with_capacity(ready.len());
        for i in ready {
            if let Some(entry) = self.entries.get_mut(i) {
                entry.message.delivery_count += 1;
                entry.visible_at = deadline(now, visibility_timeout);
                delivered.push(entry.message.clone());
            }
        }
        delivered
    }
}

/// Queue held entirely in memory. Not durable across restarts.
///
/// Uses the tokio clock, so timing can be driven by paused-time tests.
#[derive(Debug)]
pub struct MemoryQueue {
    config: QueueConfig,
    state: Mutex<State>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::default()),
            notify: Notify::new(),
        }
    }

    /// Stop accepting new messages and wake every waiting receiver.
    ///
    /// Messages already queued stay deliverable.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn enqueue_batch(
        &self,
        events: Vec<InvalidationEvent>,
    ) -> Result<Vec<MessageId>, QueueError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(QueueError::Closed);
        }

        let now = Instant::now();
        let enqueued_at = OffsetDateTime::now_utc();
        let mut ids = Vec::with_capacity(events.len());
        for event in events {
            let message_id = MessageId::new();
            ids.push(message_id);
            state.entries.push(Entry {
                message: QueueMessage {
                    message_id,
                    delivery_count: 0,
                    enqueued_at,
                    event,
                },
                visible_at: now,
            });
        }
        drop(state);

        if !ids.is_empty() {
            self.notify.notify_waiters();
        }
        Ok(ids)
    }

    async fn receive(
        &self,
        max_count: usize,
        max_wait: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let max_count = max_count.max(1);
        let started = Instant::now();

        loop {
            // Registered before inspecting the state so an enqueue between
            // the check and the wait still wakes us.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                state.reap(now, self.config.max_delivery_count);

                let visible = state.visible(now).count();
                let oldest = state.visible(now).map(|e| e.visible_at).min();

                match oldest {
                    Some(oldest) if visible >= max_count || now >= deadline(oldest, max_wait) => {
                        let batch =
                            state.deliver(now, max_count, self.config.visibility_timeout);
                        debug!(messages = batch.len(), "Delivered batch");
                        return Ok(batch);
                    }
                    None if now >= deadline(started, max_wait) => return Ok(Vec::new()),
                    _ => {}
                }

                let window_end = deadline(oldest.unwrap_or(started), max_wait);
                // An in-flight message timing out may complete the batch or
                // need dead-lettering before the window closes.
                let next_timeout = state
                    .entries
                    .iter()
                    .map(|e| e.visible_at)
                    .filter(|&at| at > now)
                    .min();
                next_timeout.map_or(window_end, |at| at.min(window_end))
            };

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn ack(&self, message_ids: &[MessageId]) -> Result<u64, QueueError> {
        if message_ids.is_empty() {
            return Ok(0);
        }
        let ids: HashSet<&MessageId> = message_ids.iter().collect();
        let mut state = self.state.lock().await;
        let before = state.entries.len();
        state
            .entries
            .retain(|e| !ids.contains(&e.message.message_id));
        Ok((before - state.entries.len()) as u64)
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, QueueError> {
        let state = self.state.lock().await;
        Ok(state.dead_letters.iter().rev().take(limit).cloned().collect())
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let state = self.state.lock().await;
        let now = Instant::now();
        let visible = state.visible(now).count() as u64;
        Ok(QueueStats {
            visible,
            in_flight: state.entries.len() as u64 - visible,
            dead_lettered: state.dead_letters.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::EventType;
    use std::sync::Arc;

    fn event(path: &str) -> InvalidationEvent {
        InvalidationEvent {
            path: path.to_string(),
            object_key: path.trim_start_matches('/').to_string(),
            event_type: EventType::Updated,
            received_at: OffsetDateTime::now_utc(),
        }
    }

    fn queue() -> MemoryQueue {
        MemoryQueue::new(QueueConfig::default())
    }

    const WINDOW: Duration = Duration::from_secs(5);

    #[tokio::test(start_paused = true)]
    async fn full_batch_is_returned_immediately() {
        let queue = queue();
        let events = (0..100).map(|i| event(&format!("/p/{i}"))).collect();
        queue.enqueue_batch(events).await.unwrap();

        let start = Instant::now();
        let batch = queue.receive(100, WINDOW).await.unwrap();
        assert_eq!(batch.len(), 100);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(batch.iter().all(|m| m.delivery_count == 1));
    }

    #[tokio::test(start_paused = true)]
    async fn partial_batch_waits_for_window() {
        let queue = queue();
        queue.enqueue(event("/a")).await.unwrap();

        let start = Instant::now();
        let batch = queue.receive(100, WINDOW).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(start.elapsed(), WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn window_counts_from_oldest_visible_message() {
        let queue = queue();
        queue.enqueue(event("/a")).await.unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;

        let start = Instant::now();
        let batch = queue.receive(100, WINDOW).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_queue_returns_empty_after_window() {
        let queue = queue();
        let start = Instant::now();
        let batch = queue.receive(10, WINDOW).await.unwrap();
        assert!(batch.is_empty());
        assert_eq!(start.elapsed(), WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn message_arriving_mid_wait_starts_its_own_window() {
        let queue = Arc::new(queue());
        let receiver = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                let start = Instant::now();
                let batch = queue.receive(10, WINDOW).await.unwrap();
                (batch, start.elapsed())
            })
        };

        tokio::time::sleep(Duration::from_secs(2)).await;
        queue.enqueue(event("/late")).await.unwrap();

        let (batch, elapsed) = receiver.await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(elapsed, Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn batch_is_capped_and_oldest_first() {
        let queue = queue();
        let events = ["/1", "/2", "/3", "/4", "/5"].map(event).to_vec();
        queue.enqueue_batch(events).await.unwrap();

        let batch = queue.receive(2, WINDOW).await.unwrap();
        let paths: Vec<_> = batch.iter().map(|m| m.event.path.as_str()).collect();
        assert_eq!(paths, ["/1", "/2"]);

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.visible, 3);
        assert_eq!(stats.in_flight, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unacked_message_is_redelivered_after_visibility_timeout() {
        let queue = queue();
        let id = queue.enqueue(event("/a")).await.unwrap();

        let first = queue.receive(1, WINDOW).await.unwrap();
        assert_eq!(first[0].message_id, id);
        assert_eq!(first[0].delivery_count, 1);

        // Invisible while in flight.
        let hidden = queue.receive(1, Duration::from_secs(1)).await.unwrap();
        assert!(hidden.is_empty());

        tokio::time::advance(Duration::from_secs(30)).await;
        let second = queue.receive(1, WINDOW).await.unwrap();
        assert_eq!(second[0].message_id, id);
        assert_eq!(second[0].delivery_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn message_is_dead_lettered_instead_of_third_delivery() {
        let queue = queue();
        let id = queue.enqueue(event("/a")).await.unwrap();

        for expected in 1..=2 {
            let batch = queue.receive(1, WINDOW).await.unwrap();
            assert_eq!(batch[0].delivery_count, expected);
            tokio::time::advance(Duration::from_secs(30)).await;
        }

        let third = queue.receive(1, WINDOW).await.unwrap();
        assert!(third.is_empty());

        let dead = queue.dead_letters(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].message.message_id, id);
        assert_eq!(dead[0].message.delivery_count, 2);

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats, QueueStats { visible: 0, in_flight: 0, dead_lettered: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn ack_removes_message_and_ignores_unknown_ids() {
        let queue = queue();
        let id = queue.enqueue(event("/a")).await.unwrap();
        queue.receive(1, WINDOW).await.unwrap();

        assert_eq!(queue.ack(&[id]).await.unwrap(), 1);
        assert_eq!(queue.ack(&[id, MessageId::new()]).await.unwrap(), 0);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(queue.receive(1, WINDOW).await.unwrap().is_empty());
        assert!(queue.dead_letters(10).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_queue_rejects_whole_batch() {
        let queue = queue();
        queue.close().await;

        let result = queue.enqueue_batch(vec![event("/a"), event("/b")]).await;
        assert!(matches!(result, Err(QueueError::Closed)));
        assert_eq!(queue.stats().await.unwrap(), QueueStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn huge_durations_do_not_overflow() {
        let queue = MemoryQueue::new(QueueConfig {
            visibility_timeout: Duration::MAX,
            ..QueueConfig::default()
        });
        queue.enqueue(event("/a")).await.unwrap();

        let batch = queue.receive(1, Duration::MAX).await.unwrap();
        assert_eq!(batch.len(), 1);
        let stats = queue.stats().await.unwrap();
        assert_eq!((stats.visible, stats.in_flight), (0, 1));

        // Nothing visible: the wait is bounded only by the far-future deadline.
        let waiting = tokio::time::timeout(Duration::from_secs(60), queue.receive(1, Duration::MAX));
        assert!(waiting.await.is_err());
    }
}
