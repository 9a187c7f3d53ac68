//! Generic reloadable config store.
//!
//! `ConfigStore<T>` holds the current value inside a `watch` channel, so
//! readers take cheap snapshots without locking out writers.

use std::sync::Arc;
use tokio::sync::watch;

/// A shared, swappable configuration value.
///
/// Cloning the store yields another handle to the same value.
pub struct ConfigStore<T> {
    tx: Arc<watch::Sender<T>>,
}

impl<T: Clone> ConfigStore<T> {
    /// Create a new `ConfigStore` with the given initial value.
    pub fn new(initial: T) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Replace the stored value.
    pub fn update(&self, value: T) {
        self.tx.send_replace(value);
    }

    /// Clone out the current value.
    pub fn snapshot(&self) -> T {
        self.tx.borrow().clone()
    }
}

impl<T> Clone for ConfigStore<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}
