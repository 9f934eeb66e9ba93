// Operational options for consumers, resources and the engine
//
// Durations are (de)serialized as milliseconds so that file and
// environment configuration stay plain numbers.

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound of a single receive call
pub const MAX_RECEIVE_BATCH: usize = 10;

/// Range a broker accepts for a redrive policy's max receive count
pub const MAX_RECEIVES_BEFORE_DEAD_LETTER: u32 = 1000;

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Per-descriptor consumption parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerOptions {
    /// Worker count and dispatch channel capacity
    pub max_concurrency: usize,
    #[serde(rename = "polling_interval_ms", with = "millis")]
    pub polling_interval: Duration,
    #[serde(rename = "consume_timeout_ms", with = "millis")]
    pub consume_timeout: Duration,
    /// Messages fetched per receive call
    pub queue_max_receive_count: usize,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            polling_interval: Duration::from_millis(100),
            consume_timeout: Duration::from_secs(30),
            queue_max_receive_count: MAX_RECEIVE_BATCH,
        }
    }
}

impl ConsumerOptions {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_concurrency == 0 {
            return Err(ConfigurationError::invalid_option(
                "MaxConcurrency",
                "must be at least 1",
            ));
        }
        if self.consume_timeout.is_zero() {
            return Err(ConfigurationError::invalid_option(
                "ConsumeTimeout",
                "must be greater than zero",
            ));
        }
        if !(1..=MAX_RECEIVE_BATCH).contains(&self.queue_max_receive_count) {
            return Err(ConfigurationError::invalid_option(
                "QueueMaxReceiveCount",
                format!("must be between 1 and {MAX_RECEIVE_BATCH}"),
            ));
        }
        Ok(())
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_polling_interval(mut self, polling_interval: Duration) -> Self {
        self.polling_interval = polling_interval;
        self
    }

    pub fn with_consume_timeout(mut self, consume_timeout: Duration) -> Self {
        self.consume_timeout = consume_timeout;
        self
    }
}

/// Resource bootstrap parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceOptions {
    pub auto_create_new_topic: bool,
    /// Becomes the redrive policy's max receive count
    pub retries_before_dead_letter: u32,
    #[serde(rename = "visibility_timeout_ms", with = "millis")]
    pub visibility_timeout: Duration,
    #[serde(rename = "message_retention_ms", with = "millis")]
    pub message_retention: Duration,
    #[serde(rename = "dead_letter_retention_ms", with = "millis")]
    pub dead_letter_retention: Duration,
    /// Alias of the encryption key for topics and queues; none = unencrypted
    pub key_alias: Option<String>,
}

impl Default for ResourceOptions {
    fn default() -> Self {
        Self {
            auto_create_new_topic: true,
            retries_before_dead_letter: 3,
            visibility_timeout: Duration::from_secs(30),
            message_retention: Duration::from_secs(4 * 24 * 60 * 60),
            dead_letter_retention: Duration::from_secs(14 * 24 * 60 * 60),
            key_alias: None,
        }
    }
}

impl ResourceOptions {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(1..=MAX_RECEIVES_BEFORE_DEAD_LETTER).contains(&self.retries_before_dead_letter) {
            return Err(ConfigurationError::invalid_option(
                "RetriesBeforeDeadLetter",
                format!("must be between 1 and {MAX_RECEIVES_BEFORE_DEAD_LETTER}"),
            ));
        }
        if self.visibility_timeout.is_zero() {
            return Err(ConfigurationError::invalid_option(
                "VisibilityTimeout",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Engine-wide switches
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Propagate worker-boundary faults and stop everything
    pub rethrow_exceptions: bool,
}
