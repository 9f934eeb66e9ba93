// Rule Service Port (event-bus routing rules)

use super::ServiceError;
use async_trait::async_trait;

/// Routing-rule capability: events published on the bus are matched by
/// rule (one rule per topic name) and forwarded to the rule's targets.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RuleService: Send + Sync {
    /// True if an enabled rule named `topic_name` exists
    async fn rule_exists(&self, topic_name: &str) -> Result<bool, ServiceError>;

    /// Create (or update) the rule and return its ARN
    async fn create_rule(
        &self,
        topic_name: &str,
        event_pattern: &str,
    ) -> Result<String, ServiceError>;

    /// Route matches of `rule_name` to `target_arn`
    async fn put_target(&self, rule_name: &str, target_arn: &str) -> Result<(), ServiceError>;

    /// Publish one event whose detail type is `topic_name`
    async fn put_event(&self, topic_name: &str, detail: &str) -> Result<(), ServiceError>;
}
