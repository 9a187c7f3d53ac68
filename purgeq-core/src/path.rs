//! Object key to CDN cache path normalization.
//!
//! A cache path is `{prefix}/{bucket}/{key segments...}` where every
//! segment is percent-encoded. A key ending in `/` names a folder and maps
//! to a trailing `/*` wildcard.

use crate::entities::InvalidationEvent;
use purgeq_sdk::objects::ChangedObject;
use thiserror::Error;
use time::OffsetDateTime;

/// Public object route of the storage service behind the CDN.
pub const DEFAULT_PATH_PREFIX: &str = "/storage/v1/object";

/// Errors raised while normalizing an object into a cache path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("path prefix `{0}` must start with `/` and contain only unreserved characters")]
    InvalidPrefix(String),
    #[error("bucket name is empty")]
    EmptyBucket,
    #[error("bucket name `{0}` is not a single path segment")]
    InvalidBucket(String),
    #[error("object key is empty")]
    EmptyKey,
    #[error("object key `{0}` contains a `..` segment")]
    ParentSegment(String),
}

/// Maps `(bucket, key)` pairs onto cache paths of one CDN distribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathNormalizer {
    prefix: String,
    strip_prefixes: Vec<String>,
}

impl Default for PathNormalizer {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PATH_PREFIX.to_string(),
            strip_prefixes: Vec::new(),
        }
    }
}

impl PathNormalizer {
    /// Create a normalizer.
    ///
    /// * `prefix` – route prepended to every path, e.g. `/storage/v1/object`.
    ///   `/` alone means no prefix.
    /// * `strip_prefixes` – internal storage prefixes removed from the front
    ///   of object keys (first match wins).
    pub fn new(prefix: &str, strip_prefixes: Vec<String>) -> Result<Self, NormalizeError> {
        if !prefix.starts_with('/') {
            return Err(NormalizeError::InvalidPrefix(prefix.to_string()));
        }
        let trimmed = prefix.trim_end_matches('/');
        if !trimmed.is_empty() && (trimmed.contains('*') || !is_transport_safe(trimmed)) {
            return Err(NormalizeError::InvalidPrefix(prefix.to_string()));
        }

        let strip_prefixes = strip_prefixes
            .into_iter()
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty())
            .collect();

        Ok(Self {
            prefix: trimmed.to_string(),
            strip_prefixes,
        })
    }

    /// The normalized route prefix (no trailing `/`).
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Normalize one object into its cache path.
    pub fn normalize(&self, bucket: &str, key: &str) -> Result<String, NormalizeError> {
        let bucket = bucket.trim_matches('/');
        if bucket.is_empty() {
            return Err(NormalizeError::EmptyBucket);
        }
        if bucket.contains('/') || bucket == "." || bucket == ".." {
            return Err(NormalizeError::InvalidBucket(bucket.to_string()));
        }

        let is_folder = key.ends_with('/');
        let rest = self.strip_internal_prefix(key.trim_start_matches('/'));

        let mut segments = Vec::new();
        for segment in rest.split('/') {
            match segment {
                "" | "." => continue,
                ".." => return Err(NormalizeError::ParentSegment(key.to_string())),
                s => segments.push(urlencoding::encode(s)),
            }
        }
        if segments.is_empty() && !is_folder {
            return Err(NormalizeError::EmptyKey);
        }

        let mut path = String::with_capacity(self.prefix.len() + bucket.len() + key.len() + 8);
        path.push_str(&self.prefix);
        path.push('/');
        path.push_str(&urlencoding::encode(bucket));
        for segment in segments {
            path.push('/');
            path.push_str(&segment);
        }
        if is_folder {
            path.push_str("/*");
        }
        Ok(path)
    }

    /// Build the queue event for a changed object.
    pub fn event(
        &self,
        object: &ChangedObject,
        received_at: OffsetDateTime,
    ) -> Result<InvalidationEvent, NormalizeError> {
        Ok(InvalidationEvent {
            path: self.normalize(&object.bucket, &object.key)?,
            object_key: object.key.clone(),
            event_type: object.event_type.into(),
            received_at,
        })
    }

    fn strip_internal_prefix<'k>(&self, key: &'k str) -> &'k str {
        for prefix in &self.strip_prefixes {
            if let Some(rest) = key.strip_prefix(prefix.as_str())
                && (rest.is_empty() || rest.starts_with('/'))
            {
                return rest.trim_start_matches('/');
            }
        }
        key
    }
}

/// Whether `path` is a well-formed cache path.
///
/// It must start with exactly one `/`, have no empty segments, and consist
/// only of RFC 3986 unreserved characters, `/` and `%XX` escapes, with an
/// optional single `*` as the very last character.
pub fn is_transport_safe(path: &str) -> bool {
    let bytes = path.as_bytes();
    if bytes.first() != Some(&b'/') || path.contains("//") {
        return false;
    }

    let mut i = 0;
    while let Some(&b) = bytes.get(i) {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {}
            b'*' if i + 1 == bytes.len() => {}
            b'%' => {
                let escaped = bytes
                    .get(i + 1..i + 3)
                    .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit));
                if !escaped {
                    return false;
                }
                i += 2;
            }
            _ => return false,
        }
        i += 1;
    }
    true
}
