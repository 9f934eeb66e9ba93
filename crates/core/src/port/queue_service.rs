// Queue Service Port (durable queue with visibility timeout and redrive)

use super::ServiceError;
use crate::domain::{QueueAttributes, QueueRef, ReceivedMessage};
use async_trait::async_trait;
use std::time::Duration;

/// Durable queue capability
///
/// Implementations: any broker with receive/delete/change-visibility
/// semantics (e.g. SQS). Creation must be idempotent for equal attributes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueService: Send + Sync {
    /// Create a queue, or return the existing one with the same name
    async fn create_queue(
        &self,
        name: &str,
        attributes: &QueueAttributes,
    ) -> Result<QueueRef, ServiceError>;

    /// Look up a queue by name
    async fn get_queue(&self, name: &str) -> Result<Option<QueueRef>, ServiceError>;

    /// Fetch up to `max_batch` visible messages; an empty batch is normal
    async fn receive(
        &self,
        queue: &QueueRef,
        max_batch: usize,
    ) -> Result<Vec<ReceivedMessage>, ServiceError>;

    /// Permanently remove a delivered message
    async fn delete_message(&self, queue: &QueueRef, receipt_handle: &str)
        -> Result<(), ServiceError>;

    /// Make a delivered message visible again after `delay`
    async fn change_visibility(
        &self,
        queue: &QueueRef,
        receipt_handle: &str,
        delay: Duration,
    ) -> Result<(), ServiceError>;
}
