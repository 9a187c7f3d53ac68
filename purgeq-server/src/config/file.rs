//! TOML file configuration structures.
//!
//! These structs directly map to the `purgeq-config.toml` file format.

use purgeq_core::path::DEFAULT_PATH_PREFIX;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use url::Url;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
    pub cdn: CdnConfig,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080))
}

/// Webhook receiver section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Shared bearer secret. Generated and written back when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Route prepended to every cache path.
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,
    /// Internal storage prefixes removed from object keys.
    #[serde(default)]
    pub strip_prefixes: Vec<String>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            path_prefix: default_path_prefix(),
            strip_prefixes: Vec::new(),
        }
    }
}

fn default_path_prefix() -> String {
    DEFAULT_PATH_PREFIX.to_string()
}

/// Where queued messages are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    /// PostgreSQL tables; durable and shareable between processes.
    #[default]
    Postgres,
    /// Process memory; lost on restart.
    Memory,
}

/// Durable queue section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub backend: QueueBackend,
    #[serde(default = "default_max_delivery_count")]
    pub max_delivery_count: u32,
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::default(),
            max_delivery_count: default_max_delivery_count(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_max_delivery_count() -> u32 {
    2
}

fn default_visibility_timeout_secs() -> u64 {
    30
}

fn default_poll_interval_ms() -> u64 {
    250
}

/// Batch consumer section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_max_batch_window_secs")]
    pub max_batch_window_secs: u64,
    #[serde(default = "default_max_paths_per_call")]
    pub max_paths_per_call: usize,
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_batch_size: default_max_batch_size(),
            max_batch_window_secs: default_max_batch_window_secs(),
            max_paths_per_call: default_max_paths_per_call(),
            max_concurrent_calls: default_max_concurrent_calls(),
        }
    }
}

fn default_workers() -> usize {
    1
}

fn default_max_batch_size() -> usize {
    100
}

fn default_max_batch_window_secs() -> u64 {
    5
}

fn default_max_paths_per_call() -> usize {
    3000
}

fn default_max_concurrent_calls() -> usize {
    4
}

/// CDN provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CdnProvider {
    /// AWS CloudFront, credentials from the default AWS chain.
    Cloudfront,
    /// Generic JSON purge API.
    Http,
}

/// CDN section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdnConfig {
    pub provider: CdnProvider,
    pub distribution_id: String,
    /// Base URL of the purge API (http provider only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Url>,
    /// Bearer token for the purge API (http provider only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl FileConfig {
    /// The webhook API key, if one is configured.
    pub fn api_key(&self) -> Option<&str> {
        self.webhook
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
    }
}
