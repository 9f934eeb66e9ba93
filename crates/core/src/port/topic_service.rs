// Topic Service Port (pub-sub fan-out)

use super::ServiceError;
use async_trait::async_trait;

/// Fan-out topic capability
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TopicService: Send + Sync {
    /// Create a topic (idempotent) and return its ARN
    ///
    /// `kms_key_id` enables server-side encryption when present.
    async fn create_topic(
        &self,
        name: &str,
        kms_key_id: Option<String>,
    ) -> Result<String, ServiceError>;

    /// Deliver everything published to `topic_arn` into `queue_arn`
    async fn subscribe(&self, topic_arn: &str, queue_arn: &str) -> Result<(), ServiceError>;
}
