//! Consumer worker pool.

use purgeq_core::config::{ConfigStore, ConsumerConfig};
use purgeq_core::invalidation::InvalidationClient;
use purgeq_core::processors::InvalidationConsumer;
use purgeq_core::queue::MessageQueue;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

/// Spawns `workers` consumers and a supervisor task that waits for them.
///
/// A consumer that fails or panics takes the whole process down through
/// `shutdown_tx`, so the HTTP server stops accepting events nobody drains.
pub fn spawn_consumers(
    workers: usize,
    queue: Arc<dyn MessageQueue>,
    client: Arc<dyn InvalidationClient>,
    distribution_id: String,
    config: ConfigStore<ConsumerConfig>,
    shutdown_tx: Arc<watch::Sender<bool>>,
) -> JoinHandle<()> {
    let mut set = JoinSet::new();
    for worker in 0..workers {
        let consumer = InvalidationConsumer::new(
            worker,
            queue.clone(),
            client.clone(),
            distribution_id.clone(),
            config.clone(),
        );
        set.spawn(consumer.run(shutdown_tx.subscribe()));
    }
    tracing::info!(workers, distribution_id = %distribution_id, "Consumers started");

    tokio::spawn(async move {
        while let Some(joined) = set.join_next().await {
            let failure = match joined {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(e) => Some(e.to_string()),
            };
            if let Some(reason) = failure {
                tracing::error!(reason = %reason, "Consumer terminated, shutting down");
                shutdown_tx.send_replace(true);
            }
        }
        tracing::info!("All consumers stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use purgeq_core::config::QueueConfig;
    use purgeq_core::invalidation::{InvalidationError, InvalidationId};
    use purgeq_core::queue::MemoryQueue;
    use std::time::Duration;

    struct AcceptAll;

    #[async_trait]
    impl InvalidationClient for AcceptAll {
        async fn invalidate(
            &self,
            _distribution_id: &str,
            _paths: &[String],
        ) -> Result<InvalidationId, InvalidationError> {
            Ok(InvalidationId("I1".to_string()))
        }
    }

    #[tokio::test]
    async fn supervisor_finishes_after_shutdown() {
        let shutdown_tx = Arc::new(watch::channel(false).0);
        let handle = spawn_consumers(
            2,
            Arc::new(MemoryQueue::new(QueueConfig::default())),
            Arc::new(AcceptAll),
            "E1".to_string(),
            ConfigStore::new(ConsumerConfig {
                max_batch_window: Duration::from_millis(20),
                ..ConsumerConfig::default()
            }),
            shutdown_tx.clone(),
        );

        shutdown_tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
