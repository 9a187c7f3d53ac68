//! InvalidationConsumer processor.
//!
//! The InvalidationConsumer is responsible for:
//! - Receiving bounded batches of messages from the queue
//! - Planning deduplicated, size-limited invalidation calls
//! - Issuing the calls through an [`InvalidationClient`]
//! - Acknowledging messages whose paths were all accepted
//!
//! Failed calls are not retried here. Their messages stay unacknowledged and
//! come back after the visibility timeout until the queue dead-letters them.

use super::batch_plan::{self, PlanError};
use crate::config::{ConfigStore, ConsumerConfig};
use crate::invalidation::{InvalidationClient, InvalidationError, InvalidationId};
use crate::queue::{MessageQueue, QueueError};
use futures_util::StreamExt;
use futures_util::stream;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Pause after a failed queue operation before trying again.
const QUEUE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Errors that stop a drain cycle.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// Receiving or acknowledging failed
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// The batch planner lost a message; fatal
    #[error("batch partition error: {0}")]
    Partition(#[from] PlanError),
}

/// Outcome of one drain cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub received: usize,
    pub paths: usize,
    pub calls: usize,
    pub failed_calls: usize,
    pub acked: u64,
}

/// Drains the queue into CDN invalidation calls.
pub struct InvalidationConsumer {
    worker: usize,
    queue: Arc<dyn MessageQueue>,
    client: Arc<dyn InvalidationClient>,
    distribution_id: String,
    config: ConfigStore<ConsumerConfig>,
}

impl InvalidationConsumer {
    /// Create a new InvalidationConsumer.
    ///
    /// # Arguments
    ///
    /// * `worker` - Index of this worker, used in logs
    /// * `queue` - Queue to drain
    /// * `client` - CDN the invalidations are sent to
    /// * `distribution_id` - Distribution whose cache is invalidated
    /// * `config` - Tunables, re-read at the start of every cycle
    pub fn new(
        worker: usize,
        queue: Arc<dyn MessageQueue>,
        client: Arc<dyn InvalidationClient>,
        distribution_id: String,
        config: ConfigStore<ConsumerConfig>,
    ) -> Self {
        Self {
            worker,
            queue,
            client,
            distribution_id,
            config,
        }
    }

    /// Run drain cycles until shutdown.
    ///
    /// Queue errors are logged and retried after a short pause. A partition
    /// error ends the loop and is returned to the caller.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) -> Result<(), ConsumerError> {
        info!(worker = self.worker, "InvalidationConsumer started");

        while !*shutdown_rx.borrow() {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }

                result = self.drain_once() => match result {
                    Ok(report) if report.received > 0 => {
                        debug!(
                            worker = self.worker,
                            received = report.received,
                            paths = report.paths,
                            calls = report.calls,
                            failed_calls = report.failed_calls,
                            acked = report.acked,
                            "Drain cycle finished"
                        );
                    }
                    Ok(_) => {}
                    Err(ConsumerError::Queue(e)) => {
                        error!(worker = self.worker, error = %e, "Queue operation failed");
                        tokio::time::sleep(QUEUE_ERROR_BACKOFF).await;
                    }
                    Err(e) => {
                        error!(worker = self.worker, error = %e, "InvalidationConsumer stopped");
                        return Err(e);
                    }
                },
            }
        }

        info!(worker = self.worker, "InvalidationConsumer shutdown complete");
        Ok(())
    }

    /// Receive one batch, invalidate its paths and acknowledge what succeeded.
    pub async fn drain_once(&self) -> Result<DrainReport, ConsumerError> {
        let config = self.config.snapshot();
        let messages = self
            .queue
            .receive(config.max_batch_size, config.max_batch_window)
            .await?;
        if messages.is_empty() {
            return Ok(DrainReport::default());
        }

        let plan = batch_plan::plan(&messages, config.max_paths_per_call)?;
        // Collected eagerly so the `run` future stays `Send`.
        let calls: Vec<_> = plan
            .batches()
            .iter()
            .map(|batch| self.client.invalidate(&self.distribution_id, &batch.paths))
            .collect();
        let results: Vec<Result<InvalidationId, InvalidationError>> = stream::iter(calls)
            .buffered(config.max_concurrent_calls.max(1))
            .collect()
            .await;

        let mut failed_calls = 0;
        for (batch, result) in plan.batches().iter().zip(&results) {
            if let Err(e) = result {
                failed_calls += 1;
                warn!(
                    worker = self.worker,
                    paths = batch.paths.len(),
                    messages = batch.message_ids.len(),
                    transient = e.is_transient(),
                    error = %e,
                    "Invalidation call failed, messages will be redelivered"
                );
            }
        }

        let succeeded: Vec<bool> = results.iter().map(Result::is_ok).collect();
        let ackable = plan.ackable(&succeeded);
        let acked = self.queue.ack(&ackable).await?;

        Ok(DrainReport {
            received: messages.len(),
            paths: plan.path_count(),
            calls: results.len(),
            failed_calls,
            acked,
        })
    }
}
