//! HTTP client for the purgeq server.
//!
//! Gated behind the `client` cargo feature so downstream crates that only
//! need the shared types do not pull in `reqwest`.

use reqwest::{Client, StatusCode};
use url::Url;

use crate::auth::format_bearer_header;
use crate::objects::{DeadLetterList, WebhookAccepted, WebhookPayload};

/// Errors produced by [`PurgeqClient`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level failure (DNS, TLS, connection reset, …).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server returned a non-2xx status code.
    #[error("api error: status {status}, body: {body}")]
    Api { status: StatusCode, body: String },

    /// Response body could not be deserialized.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The base URL could not be joined with the endpoint path.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

impl ClientError {
    /// Whether the server asked the caller to retry the whole request.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Http(_) => true,
            ClientError::Api { status, .. } => status.is_server_error(),
            ClientError::Json(_) | ClientError::Url(_) => false,
        }
    }
}

/// Typed HTTP client for the purgeq webhook and operator endpoints.
#[derive(Debug, Clone)]
pub struct PurgeqClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl PurgeqClient {
    /// Create a new `PurgeqClient`.
    ///
    /// * `base_url` – root URL of the purgeq server.
    /// * `api_key` – the shared bearer secret.
    pub fn new(base_url: Url, api_key: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url,
            api_key: api_key.into(),
        }
    }

    /// Replace the default `reqwest::Client` with a custom one.
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    /// `POST /webhook` – report changed objects.
    ///
    /// An `Err` for which [`ClientError::is_retryable`] holds means nothing
    /// from this payload was queued; resend the whole payload.
    pub async fn notify(&self, payload: &WebhookPayload) -> Result<WebhookAccepted, ClientError> {
        let url = self.base_url.join("/webhook")?;
        let resp = self
            .http
            .post(url)
            .header(
                reqwest::header::AUTHORIZATION,
                format_bearer_header(&self.api_key),
            )
            .json(payload)
            .send()
            .await?;

        parse_response(resp).await
    }

    /// `GET /dead-letters` – list dead-lettered messages.
    pub async fn dead_letters(&self, limit: u32) -> Result<DeadLetterList, ClientError> {
        let mut url = self.base_url.join("/dead-letters")?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string());

        let resp = self
            .http
            .get(url)
            .header(
                reqwest::header::AUTHORIZATION,
                format_bearer_header(&self.api_key),
            )
            .send()
            .await?;

        parse_response(resp).await
    }
}

async fn parse_response<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, ClientError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ClientError::Api { status, body });
    }
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(ClientError::Json)
}
