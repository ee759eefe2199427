use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use config::{Config as ConfigLib, ConfigBuilder, ConfigError, Environment, builder::DefaultState};
use serde::{Deserialize, Serialize};

use crate::outbound::webhook::RetryStrategy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub webhooks: WebhookConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Delivery tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Per-attempt HTTP timeout.
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Backoff before retry 1, 2, 3...; the last entry repeats.
    pub retry_delays_ms: Vec<u64>,
    /// Cap on stored response bodies, in characters.
    pub response_body_limit: usize,
    /// Records kept by the in-memory delivery log before the oldest is evicted.
    pub delivery_log_capacity: usize,
    /// How long shutdown waits for in-flight deliveries.
    pub shutdown_grace_secs: u64,
    /// JSON array of endpoints loaded at startup.
    #[serde(default)]
    pub endpoints_file: Option<PathBuf>,
}

impl WebhookConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn retry_strategy(&self) -> RetryStrategy {
        RetryStrategy::from_millis(self.max_retries, &self.retry_delays_ms)
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_sources(None)
    }

    fn load_with_sources(env_vars: Option<HashMap<String, String>>) -> Result<Self, ConfigError> {
        let mut builder = Self::set_defaults()?;
        // If env_vars is provided, we use it instead of system environment
        // This is to avoid systems variables pollution across tests
        if let Some(vars) = env_vars {
            for (key, value) in vars {
                builder = builder.set_override(&key, value)?;
            }
        } else {
            // Use system environment variables
            // Should be in the format APP_SERVER__PORT or APP_WEBHOOKS__MAX_RETRIES
            builder = builder.add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("webhooks.retry_delays_ms")
                    .try_parsing(true),
            );
        }

        builder.build()?.try_deserialize()
    }

    /// Set default values for the configuration.
    /// This is used when no environment variables or config file are provided
    fn set_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        ConfigLib::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .set_default("webhooks.timeout_secs", 30)?
            .set_default("webhooks.max_retries", 3)?
            .set_default("webhooks.retry_delays_ms", vec![1000, 5000, 15000])?
            .set_default("webhooks.response_body_limit", 1000)?
            .set_default("webhooks.delivery_log_capacity", 10_000)?
            .set_default("webhooks.shutdown_grace_secs", 30)
    }
}
