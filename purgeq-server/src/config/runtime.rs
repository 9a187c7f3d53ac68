//! Runtime configuration types.
//!
//! The reloadable parts are defined in `purgeq_core::config` and re-exported
//! here; the rest only matters at startup.

pub use super::file::QueueBackend;
pub use purgeq_core::config::{ConsumerConfig, QueueConfig, WebhookSettings};

use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

/// HTTP server settings.
#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    pub listen: SocketAddr,
}

/// Which CDN receives the invalidations, and how to reach it.
#[derive(Clone)]
pub enum CdnConfig {
    CloudFront {
        distribution_id: String,
        request_timeout: Duration,
    },
    Http {
        distribution_id: String,
        endpoint: Url,
        api_token: Option<String>,
        request_timeout: Duration,
    },
}

impl CdnConfig {
    pub fn distribution_id(&self) -> &str {
        match self {
            CdnConfig::CloudFront {
                distribution_id, ..
            }
            | CdnConfig::Http {
                distribution_id, ..
            } => distribution_id,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        match self {
            CdnConfig::CloudFront { .. } => "cloudfront",
            CdnConfig::Http { .. } => "http",
        }
    }
}
