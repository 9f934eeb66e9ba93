//! Hosted orchestrator: bootstrap resources, then start one engine per descriptor

use crate::catalog::ConsumerCatalog;
use crate::settings::Settings;
use relaybus_core::application::{
    ConsumerDescriptor, ConsumerRegistry, ConsumptionEngine, ConsumptionPipeline, EngineHandle,
    EngineState, ExponentialBackoff, Publisher, ResourceLifecycleManager, RetryStrategy,
};
use relaybus_core::port::{
    ErrorHandler, KeyService, PayloadCompression, QueueService, RuleService, TopicService,
};
use relaybus_core::{AppError, Result};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// The four external capabilities
#[derive(Clone)]
pub struct Services {
    pub queues: Arc<dyn QueueService>,
    pub topics: Arc<dyn TopicService>,
    pub rules: Arc<dyn RuleService>,
    pub keys: Arc<dyn KeyService>,
}

pub struct OrchestratorBuilder {
    services: Services,
    settings: Settings,
    descriptors: Vec<ConsumerDescriptor>,
    retry_strategy: Option<Arc<dyn RetryStrategy>>,
    compression: Option<Arc<dyn PayloadCompression>>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
}

impl OrchestratorBuilder {
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Add a descriptor built in code
    pub fn consumer(mut self, descriptor: ConsumerDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Replace the exponential backoff configured in settings
    pub fn retry_strategy(mut self, strategy: Arc<dyn RetryStrategy>) -> Self {
        self.retry_strategy = Some(strategy);
        self
    }

    pub fn compression(mut self, compression: Arc<dyn PayloadCompression>) -> Self {
        self.compression = Some(compression);
        self
    }

    /// Error hook for descriptors that have none of their own
    pub fn error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// Resolve configured consumers against `catalog` and validate everything
    ///
    /// # Errors
    /// Any `ConfigurationError` (unknown names, invalid definitions,
    /// duplicate topics); the host must not proceed.
    pub fn build(self, catalog: &ConsumerCatalog) -> Result<HostedOrchestrator> {
        let Self {
            services,
            settings,
            mut descriptors,
            retry_strategy,
            compression,
            error_handler,
        } = self;

        settings.resources.validate()?;
        descriptors.extend(catalog.resolve_all(&settings.consumers, &settings.consumer)?);
        if let Some(handler) = error_handler {
            descriptors = descriptors
                .into_iter()
                .map(|d| {
                    if d.error_handler().is_some() {
                        d
                    } else {
                        d.with_error_handler(handler.clone())
                    }
                })
                .collect();
        }
        let registry = ConsumerRegistry::from_descriptors(descriptors)?;

        let retry_strategy: Arc<dyn RetryStrategy> = match retry_strategy {
            Some(strategy) => strategy,
            None => Arc::new(ExponentialBackoff::new(settings.retry.backoff_base)?),
        };
        let mut pipeline = ConsumptionPipeline::new(services.queues.clone(), retry_strategy);
        if let Some(compression) = &compression {
            pipeline = pipeline.with_compression(compression.clone());
        }

        let resources = Arc::new(ResourceLifecycleManager::new(
            services.queues.clone(),
            services.topics.clone(),
            services.rules.clone(),
            services.keys.clone(),
            settings.naming.clone(),
            settings.resources.clone(),
        ));
        let mut publisher = Publisher::new(resources.clone(), services.rules.clone());
        if let Some(compression) = compression {
            publisher = publisher.with_compression(compression);
        }

        let engine = ConsumptionEngine::new(
            services.queues.clone(),
            Arc::new(pipeline),
            settings.engine.clone(),
        );

        Ok(HostedOrchestrator {
            registry,
            resources,
            publisher: Arc::new(publisher),
            engine,
            stop: CancellationToken::new(),
            handles: Vec::new(),
        })
    }
}

pub struct HostedOrchestrator {
    registry: ConsumerRegistry,
    resources: Arc<ResourceLifecycleManager>,
    publisher: Arc<Publisher>,
    engine: ConsumptionEngine,
    stop: CancellationToken,
    handles: Vec<EngineHandle>,
}

impl HostedOrchestrator {
    pub fn builder(services: Services) -> OrchestratorBuilder {
        OrchestratorBuilder {
            services,
            settings: Settings::default(),
            descriptors: Vec::new(),
            retry_strategy: None,
            compression: None,
            error_handler: None,
        }
    }

    /// Publisher sharing this orchestrator's naming and resources
    pub fn publisher(&self) -> Arc<Publisher> {
        self.publisher.clone()
    }

    pub fn resources(&self) -> Arc<ResourceLifecycleManager> {
        self.resources.clone()
    }

    /// Cancelling this token stops every engine
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn states(&self) -> Vec<(String, EngineState)> {
        self.handles
            .iter()
            .map(|h| (h.topic().to_string(), h.state()))
            .collect()
    }

    /// Bootstrap each descriptor's queue, then start its engine
    ///
    /// A bootstrap failure stops the engines already started and is returned.
    pub async fn start(&mut self) -> Result<()> {
        let descriptors = self.registry.descriptors().to_vec();
        for descriptor in descriptors {
            let queue = match self.resources.ensure_queue_exists(descriptor.event()).await {
                Ok(queue) => queue,
                Err(e) => {
                    error!(topic = %descriptor.event(), error = %e, "Resource bootstrap failed");
                    self.stop.cancel();
                    if let Err(join_error) = self.join_all().await {
                        error!(error = %join_error, "Engines stopped with error after bootstrap failure");
                    }
                    return Err(e);
                }
            };
            let handle = self
                .engine
                .start(descriptor, queue, self.stop.clone());
            self.handles.push(handle);
        }

        info!(consumers = self.handles.len(), "Orchestrator started");
        Ok(())
    }

    /// Stop polling and wait for every worker to drain
    pub async fn stop(&mut self) -> Result<()> {
        self.stop.cancel();
        self.join_all().await
    }

    /// Start, wait for `shutdown` (or a fail-fast stop), then drain
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        info!("Relaybus ready, waiting for messages");

        let stop = self.stop.clone();
        tokio::select! {
            _ = shutdown => info!("Shutdown signal received, draining"),
            _ = stop.cancelled() => info!("Engine stop requested, draining"),
        }

        self.stop().await?;
        info!("Shutdown complete");
        Ok(())
    }

    async fn join_all(&mut self) -> Result<()> {
        let mut first_error: Option<AppError> = None;
        for handle in self.handles.drain(..) {
            let topic = handle.topic().to_string();
            if let Err(e) = handle.join().await {
                error!(critical = true, topic = %topic, error = %e, "Engine terminated with error");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
