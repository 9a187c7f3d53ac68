//! Application state shared across all request handlers.

use purgeq_core::config::{ConfigStore, WebhookSettings};
use purgeq_core::queue::MessageQueue;
use std::sync::Arc;

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    /// Queue the webhook receiver writes to.
    pub queue: Arc<dyn MessageQueue>,
    /// Webhook settings (can be reloaded via SIGHUP).
    pub webhook: ConfigStore<WebhookSettings>,
}

impl AppState {
    /// Create a new AppState with the given queue and webhook settings.
    pub fn new(queue: Arc<dyn MessageQueue>, webhook: ConfigStore<WebhookSettings>) -> Self {
        Self { queue, webhook }
    }
}
