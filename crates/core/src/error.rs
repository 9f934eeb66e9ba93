// Central Error Types for the Application

use thiserror::Error;

/// Startup configuration problems; the host must not proceed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Duplicate consumer registration for topic '{0}'")]
    DuplicateTopic(String),

    #[error("Invalid consumer definition '{type_name}': {reason}")]
    InvalidConsumerDefinition { type_name: String, reason: String },

    #[error("Invalid option {option}: {reason}")]
    InvalidOption { option: &'static str, reason: String },
}

impl ConfigurationError {
    pub fn invalid_consumer(type_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConsumerDefinition {
            type_name: type_name.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_option(option: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            option,
            reason: reason.into(),
        }
    }
}

/// Resource bootstrap failures, fatal to the attempting operation only
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("Topic not found and auto-create is disabled: {0}")]
    TopicNotFound(String),

    #[error("Encryption key alias not found: {0}")]
    KeyAliasNotFound(String),

    #[error("Queue {0} has no ARN; cannot wire redrive or subscription")]
    MissingQueueArn(String),
}

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Naming error: {0}")]
    Naming(#[from] crate::domain::NamingError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("Service error: {0}")]
    Service(#[from] crate::port::ServiceError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Worker task failed: {0}")]
    Join(String),

    #[error("Panic at worker boundary: {0}")]
    Panicked(String),
}

impl AppError {
    /// Errors after which the process should not keep running
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::Configuration(_) | AppError::Naming(_))
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
