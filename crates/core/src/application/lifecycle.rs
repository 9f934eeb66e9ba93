// Resource Lifecycle Manager
//
// Idempotently bootstraps the broker resources behind one event:
//
//   routing rule --target--> topic --subscription--> primary queue --redrive--> dead-letter queue
//
// Concurrent calls for the same event are serialized by a per-resource
// lock; different events proceed in parallel.

use crate::application::options::ResourceOptions;
use crate::domain::topic::topic_name;
use crate::domain::{NamingOptions, QueueAttributes, QueueRef, RedrivePolicy, TopicIdentity};
use crate::error::{ResourceError, Result};
use crate::port::{KeyService, QueueService, RuleService, TopicService};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

pub struct ResourceLifecycleManager {
    queues: Arc<dyn QueueService>,
    topics: Arc<dyn TopicService>,
    rules: Arc<dyn RuleService>,
    keys: Arc<dyn KeyService>,
    naming: NamingOptions,
    options: ResourceOptions,
    /// Resolved once per manager; `None` when no alias is configured
    key_id: OnceCell<Option<String>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    topic_arns: DashMap<String, String>,
}

impl ResourceLifecycleManager {
    pub fn new(
        queues: Arc<dyn QueueService>,
        topics: Arc<dyn TopicService>,
        rules: Arc<dyn RuleService>,
        keys: Arc<dyn KeyService>,
        naming: NamingOptions,
        options: ResourceOptions,
    ) -> Self {
        Self {
            queues,
            topics,
            rules,
            keys,
            naming,
            options,
            key_id: OnceCell::new(),
            locks: DashMap::new(),
            topic_arns: DashMap::new(),
        }
    }

    pub fn naming(&self) -> &NamingOptions {
        &self.naming
    }

    /// Make sure the routing rule and topic for `event` exist
    ///
    /// An existing rule is taken as proof that the topic is wired.
    /// Returns the topic name.
    pub async fn ensure_topic_exists(&self, event: &str) -> Result<String> {
        let topic = topic_name(event, &self.naming)?;
        let lock = self.lock_for(&format!("topic:{topic}"));
        let _guard = lock.lock().await;

        if self.rules.rule_exists(&topic).await? {
            debug!(topic = %topic, "Routing rule already exists");
            return Ok(topic);
        }
        if !self.options.auto_create_new_topic {
            return Err(ResourceError::TopicNotFound(topic).into());
        }

        let pattern = serde_json::json!({ "detail-type": [topic] }).to_string();
        let rule_arn = self.rules.create_rule(&topic, &pattern).await?;
        let topic_arn = self.create_topic(&topic).await?;
        self.rules.put_target(&topic, &topic_arn).await?;

        info!(
            topic = %topic,
            rule_arn = %rule_arn,
            topic_arn = %topic_arn,
            "Created routing rule and topic"
        );
        Ok(topic)
    }

    /// Make sure the primary queue for `event` exists and is subscribed
    ///
    /// Creates the topic, the dead-letter queue, then the primary queue with
    /// a redrive policy to it, and finally the subscription.
    pub async fn ensure_queue_exists(&self, event: &str) -> Result<QueueRef> {
        let identity = TopicIdentity::build(event, &self.naming)?;
        let lock = self.lock_for(&format!("queue:{}", identity.queue_name));
        let _guard = lock.lock().await;

        if let Some(queue) = self.queues.get_queue(&identity.queue_name).await? {
            debug!(queue = %queue.name, "Queue already exists");
            return Ok(queue);
        }

        self.ensure_topic_exists(event).await?;
        let key_id = self.key_id().await?;

        let dead_letter_name = identity.dead_letter_queue_name();
        let dead_letter_attributes = QueueAttributes::new(
            self.options.visibility_timeout,
            self.options.dead_letter_retention,
        )
        .with_kms_key(key_id.clone());
        let dead_letter = self
            .queues
            .create_queue(&dead_letter_name, &dead_letter_attributes)
            .await?;
        let dead_letter_arn = dead_letter
            .arn
            .clone()
            .ok_or_else(|| ResourceError::MissingQueueArn(dead_letter.name.clone()))?;

        let attributes = QueueAttributes::new(
            self.options.visibility_timeout,
            self.options.message_retention,
        )
        .with_redrive(RedrivePolicy {
            dead_letter_target_arn: dead_letter_arn,
            max_receive_count: self.options.retries_before_dead_letter,
        })
        .with_kms_key(key_id);
        let queue = self
            .queues
            .create_queue(&identity.queue_name, &attributes)
            .await?;
        let queue_arn = queue
            .arn
            .clone()
            .ok_or_else(|| ResourceError::MissingQueueArn(queue.name.clone()))?;

        let cached = self
            .topic_arns
            .get(&identity.topic_name)
            .map(|arn| arn.value().clone());
        let topic_arn = match cached {
            Some(arn) => arn,
            None => self.create_topic(&identity.topic_name).await?,
        };
        self.topics.subscribe(&topic_arn, &queue_arn).await?;

        info!(
            queue = %queue.name,
            dead_letter_queue = %dead_letter.name,
            topic_arn = %topic_arn,
            max_receive_count = self.options.retries_before_dead_letter,
            "Created queue with dead-letter redrive"
        );
        Ok(queue)
    }

    /// Create (idempotently) the topic and remember its ARN
    async fn create_topic(&self, topic: &str) -> Result<String> {
        let key_id = self.key_id().await?;
        let arn = self.topics.create_topic(topic, key_id).await?;
        self.topic_arns.insert(topic.to_string(), arn.clone());
        Ok(arn)
    }

    async fn key_id(&self) -> Result<Option<String>> {
        let key_id = self.key_id.get_or_try_init(|| self.resolve_key_id()).await?;
        Ok(key_id.clone())
    }

    async fn resolve_key_id(&self) -> Result<Option<String>> {
        let Some(alias) = self.options.key_alias.as_deref() else {
            return Ok(None);
        };
        match self.keys.get_key_by_alias(alias).await? {
            Some(id) => {
                debug!(alias = %alias, "Resolved encryption key");
                Ok(Some(id))
            }
            None => Err(ResourceError::KeyAliasNotFound(alias.to_string()).into()),
        }
    }

    fn lock_for(&self, resource: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(resource.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
