//! Batch consumer tunables.

use std::time::Duration;

/// Tunables of the batch consumer.
///
/// Everything except `workers` is re-read at the start of every drain
/// cycle, so updates through a [`super::ConfigStore`] apply without restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Number of consumer tasks draining the queue concurrently.
    pub workers: usize,
    /// Upper bound on messages received per drain cycle.
    pub max_batch_size: usize,
    /// How long a pending message may wait for the batch to fill up.
    pub max_batch_window: Duration,
    /// The CDN's per-call path limit.
    pub max_paths_per_call: usize,
    /// Invalidation calls issued in parallel within one drain cycle.
    pub max_concurrent_calls: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            max_batch_size: 100,
            max_batch_window: Duration::from_secs(5),
            max_paths_per_call: 3000,
            max_concurrent_calls: 4,
        }
    }
}
