//! Name-based consumer catalog
//!
//! Settings refer to consumers and message types by name; the catalog maps
//! those names to registered types and turns `[[consumers]]` entries into
//! validated descriptors.

use crate::settings::ConsumerSettings;
use relaybus_core::application::{ConsumerDescriptor, ConsumerOptions, ConsumerType, MessageType};
use relaybus_core::domain::Message;
use relaybus_core::port::Consumer;
use relaybus_core::ConfigurationError;
use std::collections::HashMap;

struct CatalogEntry {
    consumer: ConsumerType,
    /// The consumer's own message type, used when settings name none
    message: MessageType,
}

#[derive(Default)]
pub struct ConsumerCatalog {
    consumers: HashMap<String, CatalogEntry>,
    messages: HashMap<String, MessageType>,
}

impl ConsumerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a concrete consumer under `name`
    pub fn consumer<C, F>(mut self, name: &str, factory: F) -> Self
    where
        C: Consumer,
        F: Fn() -> C + Send + Sync + 'static,
    {
        self.consumers.insert(
            name.to_string(),
            CatalogEntry {
                consumer: ConsumerType::of(factory),
                message: MessageType::of::<C::Message>(),
            },
        );
        self
    }

    /// Declare a consumer type without a constructor
    pub fn declare<C: Consumer>(mut self, name: &str) -> Self {
        self.consumers.insert(
            name.to_string(),
            CatalogEntry {
                consumer: ConsumerType::declared::<C>(),
                message: MessageType::of::<C::Message>(),
            },
        );
        self
    }

    pub fn message<M: Message>(mut self, name: &str) -> Self {
        self.messages.insert(name.to_string(), MessageType::of::<M>());
        self
    }

    /// Build the descriptor for one settings entry
    ///
    /// # Errors
    /// `InvalidConsumerDefinition` if a name is not registered, plus every
    /// error of [`ConsumerDescriptor::create`]
    pub fn resolve(
        &self,
        entry: &ConsumerSettings,
        defaults: &ConsumerOptions,
    ) -> Result<ConsumerDescriptor, ConfigurationError> {
        let registered = self.consumers.get(&entry.consumer).ok_or_else(|| {
            ConfigurationError::invalid_consumer(
                &entry.consumer,
                "not a registered consumer; it does not implement the consume capability",
            )
        })?;

        let message = match &entry.message {
            Some(name) => self.messages.get(name).cloned().ok_or_else(|| {
                ConfigurationError::invalid_consumer(name, "not a registered message type")
            })?,
            None => registered.message.clone(),
        };

        ConsumerDescriptor::create(
            &entry.event,
            registered.consumer.clone(),
            message,
            entry.overrides.apply(defaults),
        )
    }

    pub fn resolve_all(
        &self,
        entries: &[ConsumerSettings],
        defaults: &ConsumerOptions,
    ) -> Result<Vec<ConsumerDescriptor>, ConfigurationError> {
        entries
            .iter()
            .map(|entry| self.resolve(entry, defaults))
            .collect()
    }
}
