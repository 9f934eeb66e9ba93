// Consumer Port - the capability user code implements

use crate::domain::{ConsumeError, Message};
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Consume capability for one message type
///
/// A fresh instance is created for every attempt. `ctx` is cancelled when
/// the engine stops or the per-message timeout fires; the attempt is
/// abandoned either way, so long-running consumers should watch it.
#[async_trait]
pub trait Consumer: Send + Sync + 'static {
    type Message: Message;

    async fn consume(&self, message: Self::Message, ctx: CancellationToken) -> anyhow::Result<()>;
}

/// What the error hook sees about a failed attempt
#[derive(Debug)]
pub struct ConsumeFailure {
    pub topic: String,
    pub message_id: String,
    pub correlation_id: Option<String>,
    pub retry_number: u32,
    /// Delay the message was released with
    pub retry_delay: Duration,
    pub error: ConsumeError,
}

/// Optional hook invoked after each failed attempt
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn on_error(&self, failure: &ConsumeFailure);
}

#[async_trait]
impl<F> ErrorHandler for F
where
    F: Fn(&ConsumeFailure) + Send + Sync,
{
    async fn on_error(&self, failure: &ConsumeFailure) {
        self(failure)
    }
}
