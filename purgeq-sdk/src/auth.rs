//! Shared-secret bearer authentication.
//!
//! Every authenticated endpoint expects
//!
//! ```text
//! Authorization: Bearer {api_key}
//! ```
//!
//! where `api_key` is compared byte-for-byte against the configured secret.

use subtle::ConstantTimeEq;

/// Scheme prefix of the `Authorization` header value.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Number of random bytes in a generated API key.
pub const API_KEY_BYTES: usize = 32;

/// Errors produced while reading a bearer credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BearerError {
    #[error("authorization header is not a bearer credential")]
    NotBearer,
    #[error("bearer credential is empty")]
    Empty,
}

/// Extract the token from an `Authorization` header value.
pub fn parse_bearer_header(value: &str) -> Result<&str, BearerError> {
    let token = value
        .strip_prefix(BEARER_PREFIX)
        .ok_or(BearerError::NotBearer)?;
    if token.is_empty() {
        return Err(BearerError::Empty);
    }
    Ok(token)
}

/// Format an `Authorization` header value for `api_key`.
pub fn format_bearer_header(api_key: &str) -> String {
    format!("{BEARER_PREFIX}{api_key}")
}

/// Compare a presented token with the configured key in constant time.
pub fn verify_api_key(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Generate a fresh opaque API key.
pub fn generate_api_key() -> String {
    let bytes: [u8; API_KEY_BYTES] = rand::random();
    fast32::base64::RFC4648_NOPAD.encode(&bytes)
}
