//! CDN invalidation port.
//!
//! An [`InvalidationClient`] asks a CDN to drop its cached copies of a set of
//! paths on one distribution. The contract ends when the CDN accepts the
//! request; propagation to edge nodes is not tracked.

mod cloudfront;
mod http;

pub use cloudfront::CloudFrontClient;
pub use http::HttpPurgeClient;

use async_trait::async_trait;
use thiserror::Error;

/// Identifier the CDN assigned to an accepted invalidation request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InvalidationId(pub String);

impl std::fmt::Display for InvalidationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors returned by invalidation clients.
///
/// The consumer treats both kinds the same way: the affected messages are
/// left unacknowledged and redelivered until their delivery budget runs out.
/// The distinction is kept for logging and for operators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidationError {
    /// The request can never succeed as sent (unknown distribution,
    /// malformed path, authorization failure, batch too large)
    #[error("invalidation rejected: {0}")]
    Permanent(String),

    /// The request may succeed later (throttling, network, timeout, 5xx)
    #[error("invalidation failed transiently: {0}")]
    Transient(String),
}

impl InvalidationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, InvalidationError::Transient(_))
    }
}

/// Issues invalidation requests against a CDN.
#[async_trait]
pub trait InvalidationClient: Send + Sync {
    /// Request invalidation of `paths` on `distribution_id`.
    ///
    /// `paths` are already normalized and deduplicated, and never exceed the
    /// CDN's per-call limit.
    async fn invalidate(
        &self,
        distribution_id: &str,
        paths: &[String],
    ) -> Result<InvalidationId, InvalidationError>;
}
