//! Configuration module for purgeq-server.
//!
//! Handles loading configuration from TOML files, CLI arguments,
//! and environment variables. Also generates the webhook API key on
//! first start.

pub mod file;
pub mod runtime;

use crate::config::file::{CdnProvider, FileConfig};
use crate::config::runtime::{
    CdnConfig, ConsumerConfig, QueueBackend, QueueConfig, ServerConfig, WebhookSettings,
};
use purgeq_core::path::PathNormalizer;
use purgeq_sdk::auth::generate_api_key;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Upper bound for every duration setting.
const MAX_DURATION_SECS: u64 = 86_400;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,
}

/// Loaded configuration result containing all parts.
pub struct LoadedConfig {
    pub server: ServerConfig,
    pub webhook: WebhookSettings,
    pub queue_backend: QueueBackend,
    pub queue: QueueConfig,
    pub consumer: ConsumerConfig,
    pub cdn: CdnConfig,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: std::path::PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    /// Create a new config loader.
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    /// Load and process the configuration.
    ///
    /// This will:
    /// 1. Read the TOML file
    /// 2. Apply CLI overrides
    /// 3. Validate the configuration
    /// 4. Generate the webhook API key if it's missing (and rewrite the file)
    /// 5. Build the loaded configuration
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        let mut file_config: FileConfig = toml::from_str(&config_content)?;

        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }

        self.validate(&file_config)?;

        let api_key = match file_config.api_key() {
            Some(key) => key.to_string(),
            None => {
                let key = generate_api_key();
                file_config.webhook.api_key = Some(key.clone());
                self.rewrite_config(&file_config)?;
                tracing::info!(
                    config = ?self.config_path,
                    "Generated webhook API key and wrote it to the config file"
                );
                key
            }
        };

        self.build_loaded_config(file_config, api_key)
    }

    /// Reload the configuration (used during SIGHUP).
    pub fn reload(&self) -> Result<LoadedConfig, ConfigError> {
        self.load()
    }

    fn validate(&self, config: &FileConfig) -> Result<(), ConfigError> {
        let nonzero = [
            ("queue.max_delivery_count", config.queue.max_delivery_count as u64),
            ("queue.visibility_timeout_secs", config.queue.visibility_timeout_secs),
            ("queue.poll_interval_ms", config.queue.poll_interval_ms),
            ("consumer.workers", config.consumer.workers as u64),
            ("consumer.max_batch_size", config.consumer.max_batch_size as u64),
            ("consumer.max_batch_window_secs", config.consumer.max_batch_window_secs),
            ("consumer.max_paths_per_call", config.consumer.max_paths_per_call as u64),
            ("consumer.max_concurrent_calls", config.consumer.max_concurrent_calls as u64),
            ("cdn.request_timeout_secs", config.cdn.request_timeout_secs),
        ];
        if let Some((name, _)) = nonzero.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::ValidationError(format!("{name} must be positive")));
        }

        let durations = [
            ("queue.visibility_timeout_secs", config.queue.visibility_timeout_secs),
            ("consumer.max_batch_window_secs", config.consumer.max_batch_window_secs),
            ("cdn.request_timeout_secs", config.cdn.request_timeout_secs),
        ];
        if let Some((name, _)) = durations
            .iter()
            .find(|(_, secs)| *secs > MAX_DURATION_SECS)
        {
            return Err(ConfigError::ValidationError(format!(
                "{name} must not exceed {MAX_DURATION_SECS} seconds"
            )));
        }

        // Messages must stay invisible for the whole CDN call.
        if config.cdn.request_timeout_secs >= config.queue.visibility_timeout_secs {
            return Err(ConfigError::ValidationError(
                "cdn.request_timeout_secs must be shorter than queue.visibility_timeout_secs"
                    .to_string(),
            ));
        }

        if config.cdn.distribution_id.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "cdn.distribution_id must not be empty".to_string(),
            ));
        }
        if config.cdn.provider == CdnProvider::Http && config.cdn.endpoint.is_none() {
            return Err(ConfigError::ValidationError(
                "cdn.endpoint is required for the http provider".to_string(),
            ));
        }
        Ok(())
    }

    fn rewrite_config(&self, config: &FileConfig) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(config)?;

        // Write atomically: write to temp file, then rename
        let temp_path = self.config_path.with_extension("toml.tmp");
        std::fs::write(&temp_path, toml_string)?;
        std::fs::rename(&temp_path, &self.config_path)?;

        Ok(())
    }

    fn build_loaded_config(
        &self,
        file_config: FileConfig,
        api_key: String,
    ) -> Result<LoadedConfig, ConfigError> {
        let normalizer = PathNormalizer::new(
            &file_config.webhook.path_prefix,
            file_config.webhook.strip_prefixes,
        )
        .map_err(|e| ConfigError::ValidationError(format!("webhook.path_prefix: {e}")))?;

        let request_timeout = Duration::from_secs(file_config.cdn.request_timeout_secs);
        let cdn = match (file_config.cdn.provider, file_config.cdn.endpoint) {
            (CdnProvider::Cloudfront, _) => CdnConfig::CloudFront {
                distribution_id: file_config.cdn.distribution_id,
                request_timeout,
            },
            (CdnProvider::Http, Some(endpoint)) => CdnConfig::Http {
                distribution_id: file_config.cdn.distribution_id,
                endpoint,
                api_token: file_config.cdn.api_token,
                request_timeout,
            },
            (CdnProvider::Http, None) => {
                return Err(ConfigError::ValidationError(
                    "cdn.endpoint is required for the http provider".to_string(),
                ));
            }
        };

        Ok(LoadedConfig {
            server: ServerConfig {
                listen: file_config.server.listen,
            },
            webhook: WebhookSettings {
                api_key,
                normalizer,
            },
            queue_backend: file_config.queue.backend,
            queue: QueueConfig {
                max_delivery_count: file_config.queue.max_delivery_count,
                visibility_timeout: Duration::from_secs(file_config.queue.visibility_timeout_secs),
                poll_interval: Duration::from_millis(file_config.queue.poll_interval_ms),
            },
            consumer: ConsumerConfig {
                workers: file_config.consumer.workers,
                max_batch_size: file_config.consumer.max_batch_size,
                max_batch_window: Duration::from_secs(file_config.consumer.max_batch_window_secs),
                max_paths_per_call: file_config.consumer.max_paths_per_call,
                max_concurrent_calls: file_config.consumer.max_concurrent_calls,
            },
            cdn,
        })
    }
}

/// Get the database URL from the environment.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct TempConfig(PathBuf);

    impl TempConfig {
        fn new(content: &str) -> Self {
            let path = std::env::temp_dir().join(format!("purgeq-{}.toml", uuid::Uuid::new_v4()));
            std::fs::write(&path, content).unwrap();
            Self(path)
        }
    }

    impl Drop for TempConfig {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    const CLOUDFRONT: &str = r#"
[cdn]
provider = "cloudfront"
distribution_id = "E123"
"#;

    #[test]
    fn generates_and_persists_missing_api_key() {
        let file = TempConfig::new(CLOUDFRONT);
        let loader = ConfigLoader::new(&file.0, None);

        let first = loader.load().unwrap();
        assert!(!first.webhook.api_key.is_empty());

        let rewritten: FileConfig =
            toml::from_str(&std::fs::read_to_string(&file.0).unwrap()).unwrap();
        assert_eq!(rewritten.api_key(), Some(first.webhook.api_key.as_str()));

        // The key is stable across reloads.
        let second = loader.reload().unwrap();
        assert_eq!(second.webhook.api_key, first.webhook.api_key);
    }

    #[test]
    fn listen_override_wins() {
        let file = TempConfig::new(&format!("[webhook]\napi_key = \"k\"\n{CLOUDFRONT}"));
        let listen: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        let loaded = ConfigLoader::new(&file.0, Some(listen)).load().unwrap();
        assert_eq!(loaded.server.listen, listen);
        assert_eq!(loaded.cdn.distribution_id(), "E123");
        assert_eq!(loaded.queue.max_delivery_count, 2);
        assert_eq!(loaded.consumer.max_batch_window, Duration::from_secs(5));
    }

    #[test]
    fn rejects_zero_sizes() {
        let file = TempConfig::new(&format!(
            "[webhook]\napi_key = \"k\"\n[consumer]\nmax_paths_per_call = 0\n{CLOUDFRONT}"
        ));
        let err = ConfigLoader::new(&file.0, None).load().err().unwrap();
        assert!(err.to_string().contains("consumer.max_paths_per_call"), "{err}");
    }

    #[test]
    fn rejects_http_provider_without_endpoint() {
        let file = TempConfig::new(
            "[webhook]\napi_key = \"k\"\n[cdn]\nprovider = \"http\"\ndistribution_id = \"d\"\n",
        );
        let err = ConfigLoader::new(&file.0, None).load().err().unwrap();
        assert!(matches!(err, ConfigError::ValidationError(_)), "{err}");
    }

    #[test]
    fn rejects_relative_path_prefix() {
        let file = TempConfig::new(&format!(
            "[webhook]\napi_key = \"k\"\npath_prefix = \"storage\"\n{CLOUDFRONT}"
        ));
        let err = ConfigLoader::new(&file.0, None).load().err().unwrap();
        assert!(err.to_string().contains("webhook.path_prefix"), "{err}");
    }

    #[test]
    fn rejects_request_timeout_not_below_visibility_timeout() {
        let file = TempConfig::new(
            "[webhook]\napi_key = \"k\"\n[queue]\nvisibility_timeout_secs = 30\n\
             [cdn]\nprovider = \"cloudfront\"\ndistribution_id = \"E123\"\nrequest_timeout_secs = 30\n",
        );
        let err = ConfigLoader::new(&file.0, None).load().err().unwrap();
        assert!(err.to_string().contains("cdn.request_timeout_secs"), "{err}");
    }

    #[test]
    fn default_timeouts_leave_room_for_the_cdn_call() {
        let file = TempConfig::new(&format!("[webhook]\napi_key = \"k\"\n{CLOUDFRONT}"));
        let loaded = ConfigLoader::new(&file.0, None).load().unwrap();
        let CdnConfig::CloudFront {
            request_timeout, ..
        } = loaded.cdn
        else {
            panic!("expected cloudfront");
        };
        assert!(request_timeout < loaded.queue.visibility_timeout);
    }

    #[test]
    fn rejects_oversized_durations() {
        let file = TempConfig::new(&format!(
            "[webhook]\napi_key = \"k\"\n[consumer]\nmax_batch_window_secs = 100000\n{CLOUDFRONT}"
        ));
        let err = ConfigLoader::new(&file.0, None).load().err().unwrap();
        assert!(err.to_string().contains("consumer.max_batch_window_secs"), "{err}");
    }
}
