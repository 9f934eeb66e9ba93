//! Settings loaded from an optional file plus `RELAYBUS__*` environment overrides
//!
//! ```toml
//! [naming]
//! prefix = "acme"
//! source = "billing"
//!
//! [consumer]
//! max_concurrency = 4
//! polling_interval_ms = 200
//!
//! [[consumers]]
//! event = "orders_created"
//! consumer = "order_projector"
//! max_concurrency = 2
//! ```
//!
//! `RELAYBUS__ENGINE__RETHROW_EXCEPTIONS=true` overrides `engine.rethrow_exceptions`.

use config::{Config, ConfigError, Environment, File, FileFormat};
use relaybus_core::application::retry::DEFAULT_BACKOFF_BASE;
use relaybus_core::application::{ConsumerOptions, EngineOptions, ResourceOptions};
use relaybus_core::domain::NamingOptions;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "RELAYBUS";

/// Separator between prefix and nested keys in environment variables
pub const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub naming: NamingOptions,
    pub resources: ResourceOptions,
    /// Defaults for every consumer; per-consumer entries override them
    pub consumer: ConsumerOptions,
    pub engine: EngineOptions,
    pub retry: RetrySettings,
    pub consumers: Vec<ConsumerSettings>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Exponential backoff base, in seconds per power
    pub backoff_base: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }
}

/// One configured consumer, bound by catalog names
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConsumerSettings {
    pub event: String,
    pub consumer: String,
    /// Registered message name; defaults to the consumer's own message type
    #[serde(default)]
    pub message: Option<String>,
    #[serde(flatten)]
    pub overrides: ConsumerOverrides,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConsumerOverrides {
    pub max_concurrency: Option<usize>,
    pub polling_interval_ms: Option<u64>,
    pub consume_timeout_ms: Option<u64>,
    pub queue_max_receive_count: Option<usize>,
}

impl ConsumerOverrides {
    pub fn apply(&self, defaults: &ConsumerOptions) -> ConsumerOptions {
        let mut options = defaults.clone();
        if let Some(max_concurrency) = self.max_concurrency {
            options.max_concurrency = max_concurrency;
        }
        if let Some(ms) = self.polling_interval_ms {
            options.polling_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.consume_timeout_ms {
            options.consume_timeout = Duration::from_millis(ms);
        }
        if let Some(count) = self.queue_max_receive_count {
            options.queue_max_receive_count = count;
        }
        options
    }
}

impl Settings {
    /// Load `path` (if given and present) and apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        builder
            .add_source(environment())
            .build()?
            .try_deserialize()
    }

    /// Parse TOML text, then apply environment overrides
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .add_source(environment())
            .build()?
            .try_deserialize()
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
}
