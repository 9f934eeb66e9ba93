//! In-memory broker for integration tests
//!
//! Implements all four service ports over one shared state:
//! - queues with visibility timeouts, receive counts and redrive: a visible
//!   message already received `max_receive_count` times is moved to the
//!   dead-letter queue instead of being delivered again
//! - topics fanning out to subscribed queues (raw delivery)
//! - routing rules forwarding `put_event` to their target topics
//! - key aliases
//!
//! Every mutating call is appended to a call log for ordering assertions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relaybus_core::domain::{QueueAttributes, QueueRef, ReceivedMessage};
use relaybus_core::port::{KeyService, QueueService, RuleService, ServiceError, TopicService};
use relaybus_host::Services;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

struct StoredMessage {
    message_id: String,
    body: String,
    sent_at: DateTime<Utc>,
    receive_count: u32,
    visible_at: Instant,
    receipt_handle: Option<String>,
}

impl StoredMessage {
    fn new(body: String) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            body,
            sent_at: Utc::now(),
            receive_count: 0,
            visible_at: Instant::now(),
            receipt_handle: None,
        }
    }
}

struct MemoryQueue {
    queue: QueueRef,
    attributes: QueueAttributes,
    messages: VecDeque<StoredMessage>,
}

struct MemoryTopic {
    arn: String,
    kms_key_id: Option<String>,
    subscriptions: Vec<String>,
}

struct MemoryRule {
    event_pattern: String,
    targets: Vec<String>,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, MemoryQueue>,
    topics: HashMap<String, MemoryTopic>,
    rules: HashMap<String, MemoryRule>,
    keys: HashMap<String, String>,
    calls: Vec<String>,
    failing_receives: usize,
}

impl BrokerState {
    fn queue_name_by_arn(&self, arn: &str) -> Option<String> {
        self.queues
            .values()
            .find(|q| q.queue.arn.as_deref() == Some(arn))
            .map(|q| q.queue.name.clone())
    }

    fn topic_by_arn(&self, arn: &str) -> Option<&MemoryTopic> {
        self.topics.values().find(|t| t.arn == arn)
    }

    fn queue_mut(&mut self, queue: &QueueRef, operation: &'static str) -> Result<&mut MemoryQueue, ServiceError> {
        self.queues
            .get_mut(&queue.name)
            .ok_or_else(|| ServiceError::not_found(operation, queue.name.clone()))
    }

    fn enqueue_by_arn(&mut self, queue_arn: &str, body: String) {
        if let Some(name) = self.queue_name_by_arn(queue_arn) {
            if let Some(queue) = self.queues.get_mut(&name) {
                queue.messages.push_back(StoredMessage::new(body));
            }
        }
    }
}

/// Shared in-memory broker; clones see the same state
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a key alias
    pub fn with_key(self, alias: &str, key_id: &str) -> Self {
        self.lock().keys.insert(alias.to_string(), key_id.to_string());
        self
    }

    /// The broker behind all four service ports
    pub fn services(&self) -> Services {
        let broker = Arc::new(self.clone());
        Services {
            queues: broker.clone(),
            topics: broker.clone(),
            rules: broker.clone(),
            keys: broker,
        }
    }

    /// Mutating calls in order, e.g. `CreateQueue:billing_orders_created`
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Position of the first call equal to `call`
    pub fn call_index(&self, call: &str) -> Option<usize> {
        self.lock().calls.iter().position(|c| c == call)
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.lock().calls.iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Fail the next `count` receive calls
    pub fn fail_next_receives(&self, count: usize) {
        self.lock().failing_receives = count;
    }

    /// Messages stored in `queue_name`, visible or not
    pub fn depth(&self, queue_name: &str) -> usize {
        self.lock()
            .queues
            .get(queue_name)
            .map_or(0, |q| q.messages.len())
    }

    pub fn queue_attributes(&self, queue_name: &str) -> Option<QueueAttributes> {
        self.lock()
            .queues
            .get(queue_name)
            .map(|q| q.attributes.clone())
    }

    pub fn topic_key(&self, topic_name: &str) -> Option<String> {
        self.lock()
            .topics
            .get(topic_name)
            .and_then(|t| t.kms_key_id.clone())
    }

    pub fn rule_pattern(&self, rule_name: &str) -> Option<String> {
        self.lock()
            .rules
            .get(rule_name)
            .map(|r| r.event_pattern.clone())
    }

    /// Put a raw body straight into a queue, bypassing topics
    pub fn send_raw(&self, queue_name: &str, body: &str) {
        if let Some(queue) = self.lock().queues.get_mut(queue_name) {
            queue.messages.push_back(StoredMessage::new(body.to_string()));
        }
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(state: &mut BrokerState, operation: &str, target: &str) {
        state.calls.push(format!("{operation}:{target}"));
    }
}

#[async_trait]
impl QueueService for MemoryBroker {
    async fn create_queue(&self, name: &str, attributes: &QueueAttributes) -> Result<QueueRef, ServiceError> {
        let mut state = self.lock();
        Self::record(&mut state, "CreateQueue", name);

        let queue = state
            .queues
            .entry(name.to_string())
            .or_insert_with(|| MemoryQueue {
                queue: QueueRef::new(
                    name,
                    format!("memory://queue/{name}"),
                    Some(format!("arn:memory:queue:{name}")),
                ),
                attributes: attributes.clone(),
                messages: VecDeque::new(),
            });
        Ok(queue.queue.clone())
    }

    async fn get_queue(&self, name: &str) -> Result<Option<QueueRef>, ServiceError> {
        Ok(self.lock().queues.get(name).map(|q| q.queue.clone()))
    }

    async fn receive(&self, queue: &QueueRef, max_batch: usize) -> Result<Vec<ReceivedMessage>, ServiceError> {
        let mut state = self.lock();
        if state.failing_receives > 0 {
            state.failing_receives -= 1;
            return Err(ServiceError::unavailable("ReceiveMessage", "injected failure"));
        }

        let now = Instant::now();
        let memory = state.queue_mut(queue, "ReceiveMessage")?;
        let visibility = memory.attributes.visibility_timeout;
        let redrive = memory.attributes.redrive_policy.clone();

        let mut delivered = Vec::new();
        let mut dead_lettered = Vec::new();
        let mut index = 0;
        while index < memory.messages.len() && delivered.len() < max_batch {
            let message = &mut memory.messages[index];
            if message.visible_at > now {
                index += 1;
                continue;
            }
            if let Some(policy) = &redrive {
                if message.receive_count >= policy.max_receive_count {
                    if let Some(expired) = memory.messages.remove(index) {
                        dead_lettered.push((policy.dead_letter_target_arn.clone(), expired.body));
                    }
                    continue;
                }
            }

            let receipt = Uuid::new_v4().to_string();
            message.receive_count += 1;
            message.visible_at = now + visibility;
            message.receipt_handle = Some(receipt.clone());
            delivered.push(ReceivedMessage {
                message_id: message.message_id.clone(),
                receipt_handle: receipt,
                body: message.body.clone(),
                receive_count: message.receive_count,
                sent_at: message.sent_at,
            });
            index += 1;
        }

        for (dead_letter_arn, body) in dead_lettered {
            state.enqueue_by_arn(&dead_letter_arn, body);
        }
        Ok(delivered)
    }

    async fn delete_message(&self, queue: &QueueRef, receipt_handle: &str) -> Result<(), ServiceError> {
        let mut state = self.lock();
        let memory = state.queue_mut(queue, "DeleteMessage")?;
        let position = memory
            .messages
            .iter()
            .position(|m| m.receipt_handle.as_deref() == Some(receipt_handle))
            .ok_or_else(|| ServiceError::not_found("DeleteMessage", receipt_handle))?;
        memory.messages.remove(position);
        Ok(())
    }

    async fn change_visibility(
        &self,
        queue: &QueueRef,
        receipt_handle: &str,
        delay: Duration,
    ) -> Result<(), ServiceError> {
        let mut state = self.lock();
        let memory = state.queue_mut(queue, "ChangeMessageVisibility")?;
        let message = memory
            .messages
            .iter_mut()
            .find(|m| m.receipt_handle.as_deref() == Some(receipt_handle))
            .ok_or_else(|| ServiceError::not_found("ChangeMessageVisibility", receipt_handle))?;
        message.visible_at = Instant::now() + delay;
        Ok(())
    }
}

#[async_trait]
impl TopicService for MemoryBroker {
    async fn create_topic(&self, name: &str, kms_key_id: Option<String>) -> Result<String, ServiceError> {
        let mut state = self.lock();
        Self::record(&mut state, "CreateTopic", name);

        let topic = state
            .topics
            .entry(name.to_string())
            .or_insert_with(|| MemoryTopic {
                arn: format!("arn:memory:topic:{name}"),
                kms_key_id,
                subscriptions: Vec::new(),
            });
        Ok(topic.arn.clone())
    }

    async fn subscribe(&self, topic_arn: &str, queue_arn: &str) -> Result<(), ServiceError> {
        let mut state = self.lock();
        let queue_name = state
            .queue_name_by_arn(queue_arn)
            .ok_or_else(|| ServiceError::not_found("Subscribe", queue_arn))?;
        Self::record(&mut state, "Subscribe", &queue_name);

        let topic = state
            .topics
            .values_mut()
            .find(|t| t.arn == topic_arn)
            .ok_or_else(|| ServiceError::not_found("Subscribe", topic_arn))?;
        if !topic.subscriptions.iter().any(|s| s == queue_arn) {
            topic.subscriptions.push(queue_arn.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl RuleService for MemoryBroker {
    async fn rule_exists(&self, topic_name: &str) -> Result<bool, ServiceError> {
        Ok(self.lock().rules.contains_key(topic_name))
    }

    async fn create_rule(&self, topic_name: &str, event_pattern: &str) -> Result<String, ServiceError> {
        let mut state = self.lock();
        Self::record(&mut state, "CreateRule", topic_name);

        state
            .rules
            .entry(topic_name.to_string())
            .or_insert_with(|| MemoryRule {
                event_pattern: event_pattern.to_string(),
                targets: Vec::new(),
            })
            .event_pattern = event_pattern.to_string();
        Ok(format!("arn:memory:rule:{topic_name}"))
    }

    async fn put_target(&self, rule_name: &str, target_arn: &str) -> Result<(), ServiceError> {
        let mut state = self.lock();
        Self::record(&mut state, "PutTarget", rule_name);

        let rule = state
            .rules
            .get_mut(rule_name)
            .ok_or_else(|| ServiceError::not_found("PutTargets", rule_name))?;
        if !rule.targets.iter().any(|t| t == target_arn) {
            rule.targets.push(target_arn.to_string());
        }
        Ok(())
    }

    async fn put_event(&self, topic_name: &str, detail: &str) -> Result<(), ServiceError> {
        let mut state = self.lock();
        Self::record(&mut state, "PutEvent", topic_name);

        let targets = state
            .rules
            .get(topic_name)
            .map(|rule| rule.targets.clone())
            .unwrap_or_default();
        let subscribers: Vec<String> = targets
            .iter()
            .filter_map(|arn| state.topic_by_arn(arn))
            .flat_map(|topic| topic.subscriptions.iter().cloned())
            .collect();

        for queue_arn in subscribers {
            state.enqueue_by_arn(&queue_arn, detail.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl KeyService for MemoryBroker {
    async fn get_key_by_alias(&self, alias: &str) -> Result<Option<String>, ServiceError> {
        let mut state = self.lock();
        Self::record(&mut state, "GetKey", alias);
        Ok(state.keys.get(alias).cloned())
    }
}
