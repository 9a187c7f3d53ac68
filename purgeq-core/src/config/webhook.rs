//! Webhook receiver settings.

use crate::path::PathNormalizer;

/// Settings of the webhook receiver. Reloadable.
#[derive(Clone)]
pub struct WebhookSettings {
    /// Shared bearer secret expected in the `Authorization` header.
    pub api_key: String,
    /// Maps object keys to CDN cache paths.
    pub normalizer: PathNormalizer,
}

impl std::fmt::Debug for WebhookSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSettings")
            .field("api_key", &"<redacted>")
            .field("normalizer", &self.normalizer)
            .finish()
    }
}
