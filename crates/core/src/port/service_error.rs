// Service Error - failures reported by external capability adapters

use thiserror::Error;

/// Error returned by a queue/topic/rule/key adapter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Network or throttling failure; the call may succeed later
    #[error("{operation} unavailable: {message}")]
    Unavailable {
        operation: &'static str,
        message: String,
    },

    #[error("{operation} rejected: {message}")]
    Rejected {
        operation: &'static str,
        message: String,
    },

    #[error("{operation}: resource not found: {resource}")]
    NotFound {
        operation: &'static str,
        resource: String,
    },
}

impl ServiceError {
    pub fn unavailable(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Unavailable {
            operation,
            message: message.into(),
        }
    }

    pub fn rejected(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Rejected {
            operation,
            message: message.into(),
        }
    }

    pub fn not_found(operation: &'static str, resource: impl Into<String>) -> Self {
        Self::NotFound {
            operation,
            resource: resource.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}
