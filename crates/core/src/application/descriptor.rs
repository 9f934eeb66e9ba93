//! Consumer descriptors - validated bindings between a topic and a consumer
//!
//! A consumer is stored type-erased next to an invoker built while its
//! concrete type is still known, so dispatch never downcasts:
//!
//! ```text
//! ConsumerType::of(|| OrderProjector::new())   // typed factory -> erased invoker
//!     -> ConsumerDescriptor::create("orders_created", consumer, MessageType::of::<OrderCreated>(), options)
//!     -> ConsumerRegistry::register(descriptor)  // fails fast on duplicate topics
//! ```

use crate::application::options::ConsumerOptions;
use crate::domain::topic::{pascal_case, snake_case, validate_event};
use crate::domain::{ConsumeError, Message, TypeTag};
use crate::error::ConfigurationError;
use crate::port::{Consumer, ErrorHandler};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Consumer instance with its message type erased
#[async_trait]
pub trait ErasedConsumer: Send + Sync {
    /// Decode `body` into the consumer's message type and consume it
    async fn invoke(&self, body: &str, ctx: CancellationToken) -> Result<(), ConsumeError>;
}

struct TypedInvoker<C>(C);

#[async_trait]
impl<C: Consumer> ErasedConsumer for TypedInvoker<C> {
    async fn invoke(&self, body: &str, ctx: CancellationToken) -> Result<(), ConsumeError> {
        let message = C::Message::decode(body)?;
        self.0
            .consume(message, ctx)
            .await
            .map_err(ConsumeError::Handler)
    }
}

type ConsumerFactory = Arc<dyn Fn() -> Box<dyn ErasedConsumer> + Send + Sync>;

/// A consumer capability: its name, declared message type, and constructor
///
/// A type declared without a constructor is abstract and cannot back a
/// descriptor.
#[derive(Clone)]
pub struct ConsumerType {
    name: &'static str,
    accepts: TypeTag,
    factory: Option<ConsumerFactory>,
}

impl ConsumerType {
    /// Concrete consumer; `factory` runs once per attempt
    pub fn of<C, F>(factory: F) -> Self
    where
        C: Consumer,
        F: Fn() -> C + Send + Sync + 'static,
    {
        let factory: ConsumerFactory =
            Arc::new(move || Box::new(TypedInvoker(factory())) as Box<dyn ErasedConsumer>);
        Self {
            name: std::any::type_name::<C>(),
            accepts: TypeTag::of::<C::Message>(),
            factory: Some(factory),
        }
    }

    /// Abstract declaration of a consumer type
    pub fn declared<C: Consumer>() -> Self {
        Self {
            name: std::any::type_name::<C>(),
            accepts: TypeTag::of::<C::Message>(),
            factory: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Message type the consumer declares
    pub fn accepts(&self) -> TypeTag {
        self.accepts
    }

    pub fn is_abstract(&self) -> bool {
        self.factory.is_none()
    }
}

impl fmt::Debug for ConsumerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerType")
            .field("name", &self.name)
            .field("accepts", &self.accepts.name())
            .field("abstract", &self.is_abstract())
            .finish()
    }
}

/// Runtime description of a message type and its declared supertypes
#[derive(Debug, Clone)]
pub struct MessageType {
    tag: TypeTag,
    supertypes: Vec<TypeTag>,
}

impl MessageType {
    pub fn of<M: Message>() -> Self {
        Self {
            tag: M::type_tag(),
            supertypes: M::supertypes(),
        }
    }

    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    /// Covariant check: a consumer declared for `declared` accepts this type
    /// if `declared` is this type or one of its supertypes
    pub fn is_consumable_as(&self, declared: TypeTag) -> bool {
        declared == self.tag || self.supertypes.contains(&declared)
    }
}

/// Immutable binding of a topic to a consumer plus its operational options
pub struct ConsumerDescriptor {
    event: String,
    consumer: ConsumerType,
    message: MessageType,
    options: ConsumerOptions,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    factory: ConsumerFactory,
}

impl ConsumerDescriptor {
    /// Validate and build a descriptor
    ///
    /// # Errors
    /// - `InvalidConsumerDefinition` if the event violates the topic grammar,
    ///   the consumer is abstract, or its declared message type does not
    ///   accept `message`
    /// - `InvalidOption` if `options` are out of range
    pub fn create(
        event: &str,
        consumer: ConsumerType,
        message: MessageType,
        options: ConsumerOptions,
    ) -> Result<Self, ConfigurationError> {
        validate_event(event)
            .map_err(|e| ConfigurationError::invalid_consumer(consumer.name(), e.to_string()))?;

        let factory = consumer.factory.clone().ok_or_else(|| {
            ConfigurationError::invalid_consumer(consumer.name(), "abstract consumer type cannot be instantiated")
        })?;

        if !message.is_consumable_as(consumer.accepts()) {
            return Err(ConfigurationError::invalid_consumer(
                consumer.name(),
                format!(
                    "declared message type {} does not accept {}",
                    consumer.accepts(),
                    message.tag()
                ),
            ));
        }

        options.validate()?;

        Ok(Self {
            event: event.to_string(),
            consumer,
            message,
            options,
            error_handler: None,
            factory,
        })
    }

    /// Descriptor bound to the consumer's own message type
    pub fn for_consumer<C, F>(
        event: &str,
        factory: F,
        options: ConsumerOptions,
    ) -> Result<Self, ConfigurationError>
    where
        C: Consumer,
        F: Fn() -> C + Send + Sync + 'static,
    {
        Self::create(
            event,
            ConsumerType::of(factory),
            MessageType::of::<C::Message>(),
            options,
        )
    }

    pub fn with_error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn consumer_type(&self) -> &ConsumerType {
        &self.consumer
    }

    pub fn message_type(&self) -> &MessageType {
        &self.message
    }

    pub fn options(&self) -> &ConsumerOptions {
        &self.options
    }

    pub fn error_handler(&self) -> Option<&Arc<dyn ErrorHandler>> {
        self.error_handler.as_ref()
    }

    /// Fresh consumer instance for one attempt
    pub fn instantiate(&self) -> Box<dyn ErasedConsumer> {
        (self.factory)()
    }
}

impl fmt::Debug for ConsumerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerDescriptor")
            .field("event", &self.event)
            .field("consumer", &self.consumer)
            .field("message", &self.message.tag().name())
            .field("options", &self.options)
            .field("error_handler", &self.error_handler.is_some())
            .finish()
    }
}

/// Startup registry enforcing one consumer per topic
///
/// Events are compared by their normalized topic and queue forms, so
/// `OrdersCreated` and `orders_created` collide.
#[derive(Debug, Default)]
pub struct ConsumerRegistry {
    descriptors: Vec<Arc<ConsumerDescriptor>>,
    by_topic: HashMap<String, String>,
    by_queue: HashMap<String, String>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every descriptor, failing on the first duplicate
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = ConsumerDescriptor>,
    ) -> Result<Self, ConfigurationError> {
        let mut registry = Self::new();
        for descriptor in descriptors {
            registry.register(descriptor)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, descriptor: ConsumerDescriptor) -> Result<(), ConfigurationError> {
        let topic_key = pascal_case(descriptor.event());
        let queue_key = snake_case(descriptor.event());

        if self.by_topic.contains_key(&topic_key) || self.by_queue.contains_key(&queue_key) {
            return Err(ConfigurationError::DuplicateTopic(descriptor.event().to_string()));
        }

        self.by_topic.insert(topic_key, descriptor.event().to_string());
        self.by_queue.insert(queue_key, descriptor.event().to_string());
        self.descriptors.push(Arc::new(descriptor));
        Ok(())
    }

    pub fn descriptors(&self) -> &[Arc<ConsumerDescriptor>] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct OrderEvent {
        id: u64,
    }
    impl Message for OrderEvent {}

    #[derive(Debug, Deserialize)]
    struct OrderCreated {
        #[allow(dead_code)]
        id: u64,
    }
    impl Message for OrderCreated {
        fn supertypes() -> Vec<TypeTag> {
            vec![TypeTag::of::<OrderEvent>()]
        }
    }

    struct OrderEventConsumer;

    #[async_trait]
    impl Consumer for OrderEventConsumer {
        type Message = OrderEvent;

        async fn consume(&self, message: OrderEvent, _ctx: CancellationToken) -> anyhow::Result<()> {
            anyhow::ensure!(message.id > 0, "order id must be positive");
            Ok(())
        }
    }

    struct OrderCreatedConsumer;

    #[async_trait]
    impl Consumer for OrderCreatedConsumer {
        type Message = OrderCreated;

        async fn consume(&self, _message: OrderCreated, _ctx: CancellationToken) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn descriptor(event: &str) -> ConsumerDescriptor {
        ConsumerDescriptor::for_consumer(event, || OrderEventConsumer, ConsumerOptions::default())
            .unwrap()
    }

    #[test]
    fn test_covariant_binding_accepted() {
        // handler for the base type, registered subtype
        let result = ConsumerDescriptor::create(
            "orders_created",
            ConsumerType::of(|| OrderEventConsumer),
            MessageType::of::<OrderCreated>(),
            ConsumerOptions::default(),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_contravariant_binding_rejected() {
        // handler for the subtype, registered base type
        let err = ConsumerDescriptor::create(
            "orders_created",
            ConsumerType::of(|| OrderCreatedConsumer),
            MessageType::of::<OrderEvent>(),
            ConsumerOptions::default(),
        )
        .unwrap_err();

        match err {
            ConfigurationError::InvalidConsumerDefinition { type_name, .. } => {
                assert!(type_name.contains("OrderCreatedConsumer"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_abstract_consumer_rejected() {
        let err = ConsumerDescriptor::create(
            "orders_created",
            ConsumerType::declared::<OrderEventConsumer>(),
            MessageType::of::<OrderEvent>(),
            ConsumerOptions::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("abstract"));
    }

    #[test]
    fn test_invalid_topic_rejected() {
        let err = ConsumerDescriptor::for_consumer("bad", || OrderEventConsumer, ConsumerOptions::default())
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidConsumerDefinition { .. }));
    }

    #[test]
    fn test_invalid_options_rejected() {
        let err = ConsumerDescriptor::for_consumer(
            "orders_created",
            || OrderEventConsumer,
            ConsumerOptions::default().with_max_concurrency(0),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidOption { .. }));
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let mut registry = ConsumerRegistry::new();
        registry.register(descriptor("orders_created")).unwrap();

        assert_eq!(
            registry.register(descriptor("orders_created")).unwrap_err(),
            ConfigurationError::DuplicateTopic("orders_created".to_string())
        );
        // same topic and queue after normalization
        assert!(registry.register(descriptor("OrdersCreated")).is_err());
        registry.register(descriptor("orders_shipped")).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_invoker_decodes_and_consumes() {
        let descriptor = descriptor("orders_created");

        let consumer = descriptor.instantiate();
        assert!(consumer.invoke("{\"id\":5}", CancellationToken::new()).await.is_ok());

        let consumer = descriptor.instantiate();
        let err = consumer.invoke("{\"id\":0}", CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ConsumeError::Handler(_)));

        let consumer = descriptor.instantiate();
        let err = consumer.invoke("null", CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ConsumeError::NullPayload));
    }
}
