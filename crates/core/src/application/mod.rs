// Application Layer - Use Cases and Orchestration Logic

pub mod attempt;
pub mod descriptor;
pub mod engine;
pub mod lifecycle;
pub mod options;
pub mod pipeline;
pub mod publisher;
pub mod retry;

// Re-exports
pub use attempt::AttemptToken;
pub use descriptor::{ConsumerDescriptor, ConsumerRegistry, ConsumerType, MessageType};
pub use engine::{ConsumptionEngine, EngineHandle, EngineState};
pub use lifecycle::ResourceLifecycleManager;
pub use options::{ConsumerOptions, EngineOptions, ResourceOptions};
pub use pipeline::{ConsumptionPipeline, Outcome};
pub use publisher::Publisher;
pub use retry::{ExponentialBackoff, FixedDelay, RetryStrategy};
