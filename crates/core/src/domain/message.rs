// Message Domain Model
//
// A received message is owned by exactly one worker for one attempt.
// Terminal actions (delete/release) consume the handle, so it cannot be
// touched again once ownership is back with the queue service.

use super::envelope::Envelope;
use super::error::ConsumeError;
use super::queue::QueueRef;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::any::TypeId;
use std::fmt;

/// Runtime identity of a message type
#[derive(Debug, Clone, Copy)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
}

impl TypeTag {
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeTag {}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A type that can be carried as a message payload
///
/// `supertypes` lists the types a consumer may declare instead of `Self`:
/// a consumer of a base type can be bound to any of its subtypes.
pub trait Message: DeserializeOwned + Send + 'static {
    fn supertypes() -> Vec<TypeTag> {
        Vec::new()
    }

    /// Decode a payload; a JSON `null` is rejected
    fn decode(body: &str) -> Result<Self, ConsumeError> {
        let value: serde_json::Value = serde_json::from_str(body)?;
        if value.is_null() {
            return Err(ConsumeError::NullPayload);
        }
        Ok(serde_json::from_value(value)?)
    }

    fn type_tag() -> TypeTag {
        TypeTag::of::<Self>()
    }
}

/// Raw payloads are handed over untouched
impl Message for String {
    fn decode(body: &str) -> Result<Self, ConsumeError> {
        Ok(body.to_string())
    }
}

impl Message for serde_json::Value {}

/// Message exactly as returned by a queue receive call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Broker-assigned id
    pub message_id: String,
    /// Token for delete/visibility calls on this delivery
    pub receipt_handle: String,
    pub body: String,
    /// Approximate number of deliveries, including this one
    pub receive_count: u32,
    pub sent_at: DateTime<Utc>,
}

/// One delivery of one message, decoded from its envelope
#[derive(Debug)]
pub struct MessageHandle {
    pub id: String,
    pub correlation_id: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub event: Option<String>,
    pub body: String,
    pub compressed: bool,
    pub retry_number: u32,
    pub queue: QueueRef,
    receipt_handle: String,
    malformed: Option<String>,
}

impl MessageHandle {
    /// Decode the envelope of a received message
    ///
    /// Never fails: an undecodable body produces a handle flagged as
    /// malformed, which then goes through the regular failure path.
    pub fn from_received(received: ReceivedMessage, queue: QueueRef) -> Self {
        let retry_number = received.receive_count.saturating_sub(1);

        match Envelope::from_json(&received.body) {
            Ok(envelope) => Self {
                id: envelope.message_id.to_string(),
                correlation_id: envelope.correlation_id.map(|id| id.to_string()),
                enqueued_at: envelope.datetime,
                event: Some(envelope.event),
                body: envelope.payload,
                compressed: envelope.compressed,
                retry_number,
                queue,
                receipt_handle: received.receipt_handle,
                malformed: None,
            },
            Err(e) => Self {
                id: received.message_id,
                correlation_id: None,
                enqueued_at: received.sent_at,
                event: None,
                body: received.body,
                compressed: false,
                retry_number,
                queue,
                receipt_handle: received.receipt_handle,
                malformed: Some(e.to_string()),
            },
        }
    }

    pub fn receipt_handle(&self) -> &str {
        &self.receipt_handle
    }

    /// Envelope decoding error, if the body was not a valid envelope
    pub fn malformed(&self) -> Option<&str> {
        self.malformed.as_deref()
    }
}
