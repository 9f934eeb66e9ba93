// Domain Error Types

use thiserror::Error;

/// Topic naming failures, surfaced synchronously at the call site
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NamingError {
    #[error("Invalid topic name '{0}': must start with a letter and contain at least 6 letters, digits or underscores")]
    InvalidTopicName(String),

    #[error("Missing source: neither a source nor an application identity is configured")]
    MissingSource,
}

/// Failure of a single consumption attempt
///
/// Every variant is handled the same way by the pipeline: release with
/// backoff, optional error hook, log. None of them deletes the message.
#[derive(Error, Debug)]
pub enum ConsumeError {
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Payload decompression failed: {0}")]
    Decompression(String),

    #[error("Deserialization failed: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("Deserialized payload is null")]
    NullPayload,

    #[error("Consumer failed: {0:#}")]
    Handler(anyhow::Error),

    #[error("Consumer panicked: {0}")]
    Panicked(String),

    #[error("Consume timeout of {0}ms exceeded")]
    TimedOut(u128),

    #[error("Consumption cancelled")]
    Cancelled,
}

impl ConsumeError {
    /// True when the attempt was cut short rather than failing on its own
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ConsumeError::TimedOut(_) | ConsumeError::Cancelled)
    }
}
