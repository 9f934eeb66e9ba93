// Port Layer - Interfaces for external capabilities

pub mod compression;
pub mod consumer;
pub mod key_service;
pub mod queue_service;
pub mod rule_service;
pub mod service_error;
pub mod topic_service;

// Re-exports
pub use compression::PayloadCompression;
pub use consumer::{ConsumeFailure, Consumer, ErrorHandler};
pub use key_service::KeyService;
pub use queue_service::QueueService;
pub use rule_service::RuleService;
pub use service_error::ServiceError;
pub use topic_service::TopicService;
