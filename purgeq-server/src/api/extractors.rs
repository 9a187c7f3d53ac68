//! Custom Axum extractors for request authentication.
//!
//! Provides `BearerAuth`, which checks the `Authorization: Bearer <key>`
//! header against the configured webhook API key in constant time.

use axum::{
    extract::FromRequestParts,
    http::{HeaderValue, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use purgeq_sdk::auth::{parse_bearer_header, verify_api_key};

use crate::state::AppState;

/// Proof that the request carried the configured API key.
pub struct BearerAuth;

/// Errors returned by the [`BearerAuth`] extractor.
#[derive(Debug, thiserror::Error)]
pub enum BearerAuthError {
    #[error("missing Authorization header")]
    MissingHeader,
    #[error("invalid Authorization header format")]
    InvalidHeader,
    #[error("invalid API key")]
    InvalidKey,
}

impl IntoResponse for BearerAuthError {
    fn into_response(self) -> Response {
        let mut response = (StatusCode::UNAUTHORIZED, self.to_string()).into_response();
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        response
    }
}

impl FromRequestParts<AppState> for BearerAuth {
    type Rejection = BearerAuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(header::AUTHORIZATION)
            .ok_or(BearerAuthError::MissingHeader)?
            .to_str()
            .map_err(|_| BearerAuthError::InvalidHeader)?;
        let presented = parse_bearer_header(value).map_err(|_| BearerAuthError::InvalidHeader)?;

        let settings = state.webhook.snapshot();
        if !verify_api_key(presented, &settings.api_key) {
            tracing::warn!("Rejected request with invalid API key");
            return Err(BearerAuthError::InvalidKey);
        }
        Ok(BearerAuth)
    }
}
