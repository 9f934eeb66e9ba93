// Domain Layer - Pure naming, wire format and message model

pub mod envelope;
pub mod error;
pub mod message;
pub mod queue;
pub mod topic;

// Re-exports
pub use envelope::Envelope;
pub use error::{ConsumeError, NamingError};
pub use message::{Message, MessageHandle, ReceivedMessage, TypeTag};
pub use queue::{QueueAttributes, QueueRef, RedrivePolicy};
pub use topic::{NamingOptions, TopicIdentity};
