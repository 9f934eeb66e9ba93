// Attempt token - per-message cancellation linked to the engine stop token

use crate::domain::ConsumeError;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation scope of one consumption attempt
///
/// Child of the engine stop token, additionally cancelled by a timer once
/// the consume timeout has elapsed. The clock starts when the message is
/// fetched, so time spent waiting in the dispatch channel counts.
/// Dropping the token cancels it, which also ends its timer.
#[derive(Debug)]
pub struct AttemptToken {
    token: CancellationToken,
    deadline: Instant,
    timeout: Duration,
}

impl AttemptToken {
    /// Must be called from within a tokio runtime
    pub fn start(stop: &CancellationToken, timeout: Duration) -> Self {
        let token = stop.child_token();
        let deadline = Instant::now() + timeout;

        let timer = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => timer.cancel(),
                _ = timer.cancelled() => {}
            }
        });

        Self {
            token,
            deadline,
            timeout,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.token.is_cancelled() || Instant::now() >= self.deadline
    }

    /// Token handed to the consumer
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Why the attempt was cut short
    pub fn reason(&self) -> ConsumeError {
        if Instant::now() >= self.deadline {
            ConsumeError::TimedOut(self.timeout.as_millis())
        } else {
            ConsumeError::Cancelled
        }
    }
}

impl Drop for AttemptToken {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
