// Publisher - wraps payloads in envelopes and emits them on the event bus

use crate::application::lifecycle::ResourceLifecycleManager;
use crate::domain::Envelope;
use crate::error::{AppError, Result};
use crate::port::{PayloadCompression, RuleService};
use serde::Serialize;
use std::any::Any;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub struct Publisher {
    resources: Arc<ResourceLifecycleManager>,
    rules: Arc<dyn RuleService>,
    compression: Option<Arc<dyn PayloadCompression>>,
}

impl Publisher {
    pub fn new(resources: Arc<ResourceLifecycleManager>, rules: Arc<dyn RuleService>) -> Self {
        Self {
            resources,
            rules,
            compression: None,
        }
    }

    /// Compress every payload before it is enveloped
    pub fn with_compression(mut self, compression: Arc<dyn PayloadCompression>) -> Self {
        self.compression = Some(compression);
        self
    }

    /// Publish `message` as `event`; returns the envelope's message id
    ///
    /// A `String` message is sent as-is; anything else is serialized to JSON.
    pub async fn publish<M>(
        &self,
        event: &str,
        message: &M,
        correlation_id: Option<Uuid>,
    ) -> Result<Uuid>
    where
        M: Serialize + Any,
    {
        let topic = self.resources.ensure_topic_exists(event).await?;

        let payload = match (message as &dyn Any).downcast_ref::<String>() {
            Some(raw) => raw.clone(),
            None => serde_json::to_string(message)?,
        };
        let (payload, compressed) = match &self.compression {
            Some(compression) => (
                compression.compress(&payload).map_err(AppError::Compression)?,
                true,
            ),
            None => (payload, false),
        };

        let envelope = Envelope::new(event, payload, correlation_id).compressed(compressed);
        self.rules.put_event(&topic, &envelope.to_json()?).await?;

        debug!(
            topic = %topic,
            message_id = %envelope.message_id,
            compressed,
            "Published event"
        );
        Ok(envelope.message_id)
    }
}
