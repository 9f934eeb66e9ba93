// Queue Domain Model

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Handle to an existing queue as returned by the queue service
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueRef {
    pub name: String,
    /// Service-specific address used for receive/delete/visibility calls
    pub url: String,
    pub arn: Option<String>,
}

impl QueueRef {
    pub fn new(name: impl Into<String>, url: impl Into<String>, arn: Option<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            arn,
        }
    }
}

/// Move messages to `dead_letter_target_arn` once received `max_receive_count` times
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedrivePolicy {
    pub dead_letter_target_arn: String,
    pub max_receive_count: u32,
}

/// Attributes applied when a queue is created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueAttributes {
    pub visibility_timeout: Duration,
    pub message_retention: Duration,
    pub redrive_policy: Option<RedrivePolicy>,
    pub kms_key_id: Option<String>,
}

impl QueueAttributes {
    pub fn new(visibility_timeout: Duration, message_retention: Duration) -> Self {
        Self {
            visibility_timeout,
            message_retention,
            redrive_policy: None,
            kms_key_id: None,
        }
    }

    pub fn with_redrive(mut self, policy: RedrivePolicy) -> Self {
        self.redrive_policy = Some(policy);
        self
    }

    pub fn with_kms_key(mut self, key_id: Option<String>) -> Self {
        self.kms_key_id = key_id;
        self
    }
}
