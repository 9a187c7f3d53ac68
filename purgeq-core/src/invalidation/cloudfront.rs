//! AWS CloudFront adapter.

use super::{InvalidationClient, InvalidationError, InvalidationId};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_config::timeout::TimeoutConfig;
use aws_sdk_cloudfront::Client;
use aws_sdk_cloudfront::error::{DisplayErrorContext, SdkError};
use aws_sdk_cloudfront::operation::create_invalidation::CreateInvalidationError;
use aws_sdk_cloudfront::types::{InvalidationBatch, Paths};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Invalidates CloudFront distributions through `CreateInvalidation`.
#[derive(Debug, Clone)]
pub struct CloudFrontClient {
    client: Client,
}

impl CloudFrontClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the default AWS credential and region chain.
    pub async fn from_env(request_timeout: Duration) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(request_timeout)
                    .build(),
            )
            .load()
            .await;
        Self::new(Client::new(&config))
    }
}

fn invalidation_batch(
    paths: &[String],
    caller_reference: String,
) -> Result<InvalidationBatch, InvalidationError> {
    let quantity = i32::try_from(paths.len())
        .map_err(|_| InvalidationError::Permanent(format!("{} paths in one call", paths.len())))?;
    let paths = Paths::builder()
        .quantity(quantity)
        .set_items(Some(paths.to_vec()))
        .build()
        .map_err(|e| InvalidationError::Permanent(e.to_string()))?;
    InvalidationBatch::builder()
        .paths(paths)
        .caller_reference(caller_reference)
        .build()
        .map_err(|e| InvalidationError::Permanent(e.to_string()))
}

fn classify<R: std::fmt::Debug>(err: SdkError<CreateInvalidationError, R>) -> InvalidationError {
    let permanent = match &err {
        SdkError::ConstructionFailure(_) => true,
        SdkError::ServiceError(_) => err.as_service_error().is_some_and(|e| {
            e.is_access_denied()
                || e.is_no_such_distribution()
                || e.is_invalid_argument()
                || e.is_missing_body()
                || e.is_inconsistent_quantities()
                || e.is_batch_too_large()
        }),
        // Timeouts, dispatch and response failures.
        _ => false,
    };

    let message = DisplayErrorContext(&err).to_string();
    if permanent {
        InvalidationError::Permanent(message)
    } else {
        InvalidationError::Transient(message)
    }
}

#[async_trait]
impl InvalidationClient for CloudFrontClient {
    async fn invalidate(
        &self,
        distribution_id: &str,
        paths: &[String],
    ) -> Result<InvalidationId, InvalidationError> {
        // A fresh reference per call: a retried batch is a new invalidation,
        // not a replay of the old one.
        let caller_reference = Uuid::now_v7().to_string();
        debug!(
            distribution_id,
            paths = paths.len(),
            caller_reference = %caller_reference,
            "Creating CloudFront invalidation"
        );
        let batch = invalidation_batch(paths, caller_reference)?;

        let output = self
            .client
            .create_invalidation()
            .distribution_id(distribution_id)
            .invalidation_batch(batch)
            .send()
            .await
            .map_err(classify)?;

        let id = output
            .invalidation()
            .map(|i| i.id().to_string())
            .or_else(|| output.location().map(str::to_string))
            .unwrap_or_default();
        info!(
            distribution_id,
            invalidation_id = %id,
            paths = paths.len(),
            "CloudFront accepted invalidation"
        );
        Ok(InvalidationId(id))
    }
}
