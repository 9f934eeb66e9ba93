//! Concurrent consumption engine
//!
//! Per descriptor: one polling task and `max_concurrency` workers joined by
//! a bounded channel of the same capacity.
//!
//! ```text
//! queue --receive--> poller --(message, attempt token)--> [bounded channel] --> worker x N --> pipeline
//! ```
//!
//! - The poller reserves channel capacity before fetching, so a full
//!   channel stops fetching (backpressure) and no more than the free
//!   capacity is ever fetched.
//! - Channel capacity plus worker count bound in-flight work; there is no
//!   separate semaphore.
//! - Stopping cancels the poller, which closes the channel; workers drain
//!   what is left. Drained messages carry cancelled attempt tokens and
//!   are released without invoking the consumer. A batch whose receive
//!   was in flight when stop fired is released immediately.
//! - A panic escaping the pipeline is caught per message and handled like
//!   any other worker-boundary fault, so workers never die silently.
//!
//! States: `Idle -> PollingAndDispatching -> Draining -> Stopped`.

pub mod constants;

use crate::application::attempt::AttemptToken;
use crate::application::descriptor::ConsumerDescriptor;
use crate::application::options::EngineOptions;
use crate::application::pipeline::{panic_message, ConsumptionPipeline};
use crate::domain::{MessageHandle, QueueRef, ReceivedMessage};
use crate::error::{AppError, Result};
use crate::port::QueueService;
use constants::{FETCH_ERROR_BACKOFF, MIN_POLLING_INTERVAL};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Lifecycle of one descriptor's engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    PollingAndDispatching,
    Draining,
    Stopped,
}

/// Unit of work handed from the poller to a worker
struct Dispatch {
    message: MessageHandle,
    attempt: AttemptToken,
}

type DispatchReceiver = Arc<Mutex<mpsc::Receiver<Dispatch>>>;

/// Starts polling/worker pools for descriptors
pub struct ConsumptionEngine {
    queues: Arc<dyn QueueService>,
    pipeline: Arc<ConsumptionPipeline>,
    options: EngineOptions,
}

impl ConsumptionEngine {
    pub fn new(
        queues: Arc<dyn QueueService>,
        pipeline: Arc<ConsumptionPipeline>,
        options: EngineOptions,
    ) -> Self {
        Self {
            queues,
            pipeline,
            options,
        }
    }

    /// Start consuming `queue` for `descriptor` until `stop` is cancelled
    ///
    /// With `rethrow_exceptions` on, a worker-boundary fault cancels `stop`
    /// (stopping every engine sharing it) and is returned from
    /// [`EngineHandle::join`].
    pub fn start(
        &self,
        descriptor: Arc<ConsumerDescriptor>,
        queue: QueueRef,
        stop: CancellationToken,
    ) -> EngineHandle {
        let topic = descriptor.event().to_string();
        let capacity = descriptor.options().max_concurrency;
        let (tx, rx) = mpsc::channel::<Dispatch>(capacity);
        let receiver: DispatchReceiver = Arc::new(Mutex::new(rx));
        let (state_tx, state_rx) = watch::channel(EngineState::Idle);
        let state_tx = Arc::new(state_tx);

        let mut tasks = JoinSet::new();
        tasks.spawn(run_poller(
            descriptor.clone(),
            self.queues.clone(),
            queue,
            tx,
            stop.clone(),
            state_tx.clone(),
        ));
        for worker_id in 0..capacity {
            tasks.spawn(run_worker(
                worker_id,
                descriptor.clone(),
                self.pipeline.clone(),
                receiver.clone(),
                stop.clone(),
                self.options.rethrow_exceptions,
            ));
        }

        info!(topic = %topic, workers = capacity, "Consumption engine started");

        let supervisor = tokio::spawn(supervise(
            tasks,
            state_tx,
            topic.clone(),
            stop,
            self.options.rethrow_exceptions,
        ));

        EngineHandle {
            topic,
            state: state_rx,
            supervisor,
        }
    }
}

/// Handle to a running engine
pub struct EngineHandle {
    topic: String,
    state: watch::Receiver<EngineState>,
    supervisor: JoinHandle<Result<()>>,
}

impl EngineHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state.clone()
    }

    /// Wait until all workers have drained
    pub async fn join(self) -> Result<()> {
        self.supervisor
            .await
            .map_err(|e| AppError::Join(e.to_string()))?
    }
}

async fn run_poller(
    descriptor: Arc<ConsumerDescriptor>,
    queues: Arc<dyn QueueService>,
    queue: QueueRef,
    tx: mpsc::Sender<Dispatch>,
    stop: CancellationToken,
    state: Arc<watch::Sender<EngineState>>,
) -> Result<()> {
    let options = descriptor.options();
    let mut ticker = interval(options.polling_interval.max(MIN_POLLING_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    state.send_replace(EngineState::PollingAndDispatching);

    'polling: loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // Backpressure: no fetch while the channel is full
        let permit = tokio::select! {
            _ = stop.cancelled() => break,
            permit = tx.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let batch_size = (tx.capacity() + 1).min(options.queue_max_receive_count);

        // An in-flight receive is allowed to finish so its batch can be released
        let received = queues.receive(&queue, batch_size).await;
        if stop.is_cancelled() {
            if let Ok(messages) = received {
                release_unclaimed(queues.as_ref(), &queue, messages).await;
            }
            break;
        }
        let messages = match received {
            Ok(messages) => messages,
            Err(e) => {
                error!(
                    critical = true,
                    topic = %descriptor.event(),
                    queue = %queue.name,
                    error = %e,
                    "Failed to fetch messages"
                );
                drop(permit);
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = sleep(FETCH_ERROR_BACKOFF) => continue,
                }
            }
        };

        if !messages.is_empty() {
            debug!(topic = %descriptor.event(), count = messages.len(), "Fetched messages");
        }

        let mut permit = Some(permit);
        for received in messages {
            let dispatch = Dispatch {
                message: MessageHandle::from_received(received, queue.clone()),
                attempt: AttemptToken::start(&stop, options.consume_timeout),
            };
            match permit.take() {
                Some(permit) => permit.send(dispatch),
                None => {
                    if tx.send(dispatch).await.is_err() {
                        break 'polling;
                    }
                }
            }
        }
    }

    state.send_replace(EngineState::Draining);
    info!(topic = %descriptor.event(), "Polling stopped, draining workers");
    Ok(())
}

/// Return a batch fetched after stop to the queue without delay
async fn release_unclaimed(
    queues: &dyn QueueService,
    queue: &QueueRef,
    messages: Vec<ReceivedMessage>,
) {
    for message in messages {
        if let Err(e) = queues
            .change_visibility(queue, &message.receipt_handle, Duration::ZERO)
            .await
        {
            error!(
                queue = %queue.name,
                message_id = %message.message_id,
                error = %e,
                "Failed to release message fetched during shutdown"
            );
        }
    }
}

async fn run_worker(
    worker_id: usize,
    descriptor: Arc<ConsumerDescriptor>,
    pipeline: Arc<ConsumptionPipeline>,
    receiver: DispatchReceiver,
    stop: CancellationToken,
    rethrow: bool,
) -> Result<()> {
    loop {
        let next = {
            let mut rx = receiver.lock().await;
            rx.recv().await
        };
        let Some(Dispatch { message, attempt }) = next else {
            break;
        };

        let message_id = message.id.clone();
        let processed = AssertUnwindSafe(async {
            if attempt.is_expired() {
                pipeline.abandon(&descriptor, message, attempt.reason()).await
            } else {
                pipeline.consume_scoped(&descriptor, message, &attempt).await
            }
        })
        .catch_unwind()
        .await;
        drop(attempt);
        let result = processed
            .unwrap_or_else(|panic| Err(AppError::Panicked(panic_message(panic.as_ref()))));

        if let Err(e) = result {
            error!(
                critical = true,
                topic = %descriptor.event(),
                message_id = %message_id,
                worker_id,
                error = %e,
                "Unexpected fault at worker boundary"
            );
            if rethrow {
                stop.cancel();
                return Err(e);
            }
        }
    }

    debug!(topic = %descriptor.event(), worker_id, "Worker stopped");
    Ok(())
}

async fn supervise(
    mut tasks: JoinSet<Result<()>>,
    state: Arc<watch::Sender<EngineState>>,
    topic: String,
    stop: CancellationToken,
    rethrow: bool,
) -> Result<()> {
    let mut first_error = None;

    while let Some(joined) = tasks.join_next().await {
        let result = match joined {
            Ok(result) => result,
            Err(e) => {
                error!(critical = true, topic = %topic, error = %e, "Engine task aborted");
                if rethrow {
                    stop.cancel();
                }
                Err(AppError::Join(e.to_string()))
            }
        };
        if let Err(e) = result {
            first_error.get_or_insert(e);
        }
    }

    state.send_replace(EngineState::Stopped);
    info!(topic = %topic, "Consumption engine stopped");

    match first_error {
        Some(e) if rethrow => Err(e),
        _ => Ok(()),
    }
}
