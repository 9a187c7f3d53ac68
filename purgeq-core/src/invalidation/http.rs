//! Generic JSON purge API adapter.
//!
//! `POST {endpoint}/distributions/{id}/invalidations` with body
//! `{"paths": [...], "caller_reference": "..."}`; a 2xx answer carrying
//! `{"id": "..."}` means the request was accepted.

use super::{InvalidationClient, InvalidationError, InvalidationId};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

#[derive(Serialize)]
struct PurgeRequest<'a> {
    paths: &'a [String],
    caller_reference: String,
}

#[derive(Deserialize)]
struct PurgeResponse {
    id: String,
}

/// Invalidation client for CDNs exposing a plain HTTP purge endpoint.
#[derive(Debug, Clone)]
pub struct HttpPurgeClient {
    client: reqwest::Client,
    endpoint: Url,
    api_token: Option<String>,
}

impl HttpPurgeClient {
    /// Create a client.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - Base URL of the purge API
    /// * `api_token` - Sent as a bearer token when present
    /// * `request_timeout` - Upper bound on one purge call
    pub fn new(
        mut endpoint: Url,
        api_token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        // Url::join drops the last segment of a base without a trailing slash.
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint,
            api_token,
        })
    }

    fn invalidations_url(&self, distribution_id: &str) -> Result<Url, InvalidationError> {
        let relative = format!(
            "distributions/{}/invalidations",
            urlencoding::encode(distribution_id)
        );
        self.endpoint
            .join(&relative)
            .map_err(|e| InvalidationError::Permanent(format!("invalid purge URL: {e}")))
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

fn classify_transport(err: reqwest::Error) -> InvalidationError {
    if err.is_builder() {
        InvalidationError::Permanent(err.to_string())
    } else {
        InvalidationError::Transient(err.to_string())
    }
}

#[async_trait]
impl InvalidationClient for HttpPurgeClient {
    async fn invalidate(
        &self,
        distribution_id: &str,
        paths: &[String],
    ) -> Result<InvalidationId, InvalidationError> {
        let url = self.invalidations_url(distribution_id)?;
        let body = PurgeRequest {
            paths,
            caller_reference: Uuid::now_v7().to_string(),
        };
        debug!(%url, paths = paths.len(), "Sending purge request");

        let mut request = self.client.post(url).json(&body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("purge API returned {status}: {body}");
            return Err(if is_transient_status(status) {
                InvalidationError::Transient(message)
            } else {
                InvalidationError::Permanent(message)
            });
        }

        let accepted: PurgeResponse = response
            .json()
            .await
            .map_err(|e| InvalidationError::Transient(format!("unreadable purge response: {e}")))?;
        info!(
            distribution_id,
            invalidation_id = %accepted.id,
            paths = paths.len(),
            "Purge API accepted invalidation"
        );
        Ok(InvalidationId(accepted.id))
    }
}
