// Consumption pipeline - one attempt for one message
//
// resolve consumer -> decode payload -> invoke -> delete on success,
// release with backoff on any failure (including cancellation).

use crate::application::attempt::AttemptToken;
use crate::application::descriptor::ConsumerDescriptor;
use crate::application::retry::RetryStrategy;
use crate::domain::{ConsumeError, MessageHandle};
use crate::error::Result;
use crate::port::{ConsumeFailure, PayloadCompression, QueueService};
use futures::FutureExt;
use std::borrow::Cow;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Terminal action taken for a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Deleted,
    Released { delay: Duration },
}

pub struct ConsumptionPipeline {
    queues: Arc<dyn QueueService>,
    retry_strategy: Arc<dyn RetryStrategy>,
    compression: Option<Arc<dyn PayloadCompression>>,
}

impl ConsumptionPipeline {
    pub fn new(queues: Arc<dyn QueueService>, retry_strategy: Arc<dyn RetryStrategy>) -> Self {
        Self {
            queues,
            retry_strategy,
            compression: None,
        }
    }

    pub fn with_compression(mut self, compression: Arc<dyn PayloadCompression>) -> Self {
        self.compression = Some(compression);
        self
    }

    /// Process one message in a fresh consumer scope
    ///
    /// Consumption failures are handled here and reported as
    /// `Outcome::Released`; only delete/release failures are returned as
    /// errors.
    pub async fn consume_scoped(
        &self,
        descriptor: &ConsumerDescriptor,
        message: MessageHandle,
        attempt: &AttemptToken,
    ) -> Result<Outcome> {
        if attempt.is_expired() {
            return self.abandon(descriptor, message, attempt.reason()).await;
        }

        match self.attempt(descriptor, &message, attempt).await {
            Ok(()) => {
                let (topic, id) = (descriptor.event().to_string(), message.id.clone());
                self.delete(message).await?;
                debug!(topic = %topic, message_id = %id, "Message consumed");
                Ok(Outcome::Deleted)
            }
            Err(error) => self.fail(descriptor, message, error).await,
        }
    }

    /// Fail an attempt without invoking the consumer
    pub async fn abandon(
        &self,
        descriptor: &ConsumerDescriptor,
        message: MessageHandle,
        error: ConsumeError,
    ) -> Result<Outcome> {
        self.fail(descriptor, message, error).await
    }

    async fn attempt(
        &self,
        descriptor: &ConsumerDescriptor,
        message: &MessageHandle,
        attempt: &AttemptToken,
    ) -> std::result::Result<(), ConsumeError> {
        if let Some(reason) = message.malformed() {
            return Err(ConsumeError::MalformedEnvelope(reason.to_string()));
        }

        let body = self.payload(message)?;
        let ctx = attempt.token();
        let invocation = AssertUnwindSafe(async {
            let consumer = descriptor.instantiate();
            consumer.invoke(&body, ctx).await
        })
        .catch_unwind();

        tokio::select! {
            result = invocation => match result {
                Ok(outcome) => outcome,
                Err(panic) => Err(ConsumeError::Panicked(panic_message(panic.as_ref()))),
            },
            _ = attempt.cancelled() => Err(attempt.reason()),
        }
    }

    fn payload<'a>(
        &self,
        message: &'a MessageHandle,
    ) -> std::result::Result<Cow<'a, str>, ConsumeError> {
        if !message.compressed {
            return Ok(Cow::Borrowed(message.body.as_str()));
        }
        let compression = self.compression.as_ref().ok_or_else(|| {
            ConsumeError::Decompression("payload is compressed but no compression is configured".to_string())
        })?;
        compression
            .decompress(&message.body)
            .map(Cow::Owned)
            .map_err(ConsumeError::Decompression)
    }

    /// Release with backoff and notify the error hook concurrently
    ///
    /// The retry strategy and the hook are user code; a panic in either is
    /// logged and never prevents the release.
    async fn fail(
        &self,
        descriptor: &ConsumerDescriptor,
        message: MessageHandle,
        error: ConsumeError,
    ) -> Result<Outcome> {
        let delay = self.retry_delay(descriptor, &message);
        let failure = ConsumeFailure {
            topic: descriptor.event().to_string(),
            message_id: message.id.clone(),
            correlation_id: message.correlation_id.clone(),
            retry_number: message.retry_number,
            retry_delay: delay,
            error,
        };

        warn!(
            topic = %failure.topic,
            message_id = %failure.message_id,
            retry_number = failure.retry_number,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %failure.error,
            "Message consumption failed, releasing with backoff"
        );

        let notify = async {
            let Some(handler) = descriptor.error_handler() else {
                return;
            };
            if let Err(panic) = AssertUnwindSafe(handler.on_error(&failure)).catch_unwind().await {
                error!(
                    critical = true,
                    topic = %failure.topic,
                    message_id = %failure.message_id,
                    panic_msg = %panic_message(panic.as_ref()),
                    "Error handler panicked"
                );
            }
        };
        let (released, ()) = tokio::join!(self.release(message, delay), notify);
        released?;

        Ok(Outcome::Released { delay })
    }

    /// Strategy delay, or zero when the strategy panics
    fn retry_delay(&self, descriptor: &ConsumerDescriptor, message: &MessageHandle) -> Duration {
        let retry_number = message.retry_number;
        match std::panic::catch_unwind(AssertUnwindSafe(|| self.retry_strategy.delay(retry_number))) {
            Ok(delay) => delay,
            Err(panic) => {
                error!(
                    critical = true,
                    topic = %descriptor.event(),
                    message_id = %message.id,
                    panic_msg = %panic_message(panic.as_ref()),
                    "Retry strategy panicked, releasing immediately"
                );
                Duration::ZERO
            }
        }
    }

    async fn delete(&self, message: MessageHandle) -> Result<()> {
        self.queues
            .delete_message(&message.queue, message.receipt_handle())
            .await?;
        Ok(())
    }

    async fn release(&self, message: MessageHandle, delay: Duration) -> Result<()> {
        self.queues
            .change_visibility(&message.queue, message.receipt_handle(), delay)
            .await?;
        Ok(())
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
