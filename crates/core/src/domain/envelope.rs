// Message Envelope - wire format shared with every publisher

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JSON envelope carried as the queue message body
///
/// Field names are snake_case on the wire. An absent `compressed`
/// field means the payload is plain text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    pub datetime: DateTime<Utc>,
    pub payload: String,
    pub message_id: Uuid,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub compressed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

impl Envelope {
    /// Wrap an already serialized payload with a fresh id and timestamp
    pub fn new(event: impl Into<String>, payload: String, correlation_id: Option<Uuid>) -> Self {
        Self {
            event: event.into(),
            datetime: Utc::now(),
            payload,
            message_id: Uuid::new_v4(),
            compressed: false,
            correlation_id,
        }
    }

    pub fn compressed(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }
}
