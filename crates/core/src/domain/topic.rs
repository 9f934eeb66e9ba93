// Topic Identity - deterministic topic/queue naming
//
// TopicName  = Pascal(prefix) + Pascal(event) + Pascal(suffix)
// QueueName  = snake(prefix)_snake(source)_snake(event)_snake(suffix), empty segments dropped
// DLQ name   = "dead_letter_" + QueueName
//
// These names must stay bit-exact: existing deployments look resources up by them.

use super::error::NamingError;
use serde::{Deserialize, Serialize};

/// Minimum event length accepted by the topic grammar
pub const MIN_EVENT_LENGTH: usize = 6;

/// Prefix of every dead-letter queue name
pub const DEAD_LETTER_PREFIX: &str = "dead_letter_";

/// Naming configuration shared by publishers and consumers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingOptions {
    pub prefix: String,
    pub suffix: String,
    /// Owning service of the queues; falls back to `application`
    pub source: Option<String>,
    pub application: Option<String>,
}

impl NamingOptions {
    fn resolved_source(&self) -> Option<&str> {
        self.source
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.application.as_deref().filter(|s| !s.trim().is_empty()))
    }
}

/// Resolved names for one event
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicIdentity {
    pub event: String,
    pub prefix: String,
    pub suffix: String,
    pub source: String,
    pub topic_name: String,
    pub queue_name: String,
}

impl TopicIdentity {
    /// Build the identity for `event` under `options`
    ///
    /// # Errors
    /// - `NamingError::InvalidTopicName` if `event` violates the grammar
    /// - `NamingError::MissingSource` if no source or application is configured
    pub fn build(event: &str, options: &NamingOptions) -> Result<Self, NamingError> {
        validate_event(event)?;
        let source = options
            .resolved_source()
            .ok_or(NamingError::MissingSource)?
            .to_string();

        let topic_name = topic_name(event, options)?;

        let queue_name = [
            options.prefix.as_str(),
            source.as_str(),
            event,
            options.suffix.as_str(),
        ]
        .iter()
        .map(|segment| snake_case(segment))
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("_")
        .trim_matches('_')
        .to_string();

        Ok(Self {
            event: event.to_string(),
            prefix: options.prefix.clone(),
            suffix: options.suffix.clone(),
            source,
            topic_name,
            queue_name,
        })
    }

    pub fn dead_letter_queue_name(&self) -> String {
        format!("{}{}", DEAD_LETTER_PREFIX, self.queue_name)
    }
}

/// Topic name alone; unlike [`TopicIdentity::build`] this needs no source
pub fn topic_name(event: &str, options: &NamingOptions) -> Result<String, NamingError> {
    validate_event(event)?;
    Ok(format!(
        "{}{}{}",
        pascal_case(&options.prefix),
        pascal_case(event),
        pascal_case(&options.suffix)
    ))
}

/// Check `event` against `^[A-Za-z][A-Za-z0-9_]{5,}$`
pub fn validate_event(event: &str) -> Result<(), NamingError> {
    let starts_with_letter = event
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic());
    let allowed = event.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    if starts_with_letter && allowed && event.len() >= MIN_EVENT_LENGTH {
        Ok(())
    } else {
        Err(NamingError::InvalidTopicName(event.to_string()))
    }
}

/// Split into words on separators and case boundaries ("HTTPServer" -> HTTP, Server)
fn words(input: &str) -> Vec<String> {
    let chars: Vec<char> = input.chars().collect();
    let mut words = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }

        if c.is_uppercase() && !current.is_empty() {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase() || prev.is_numeric() || (prev.is_uppercase() && next_is_lower) {
                words.push(std::mem::take(&mut current));
            }
        }
        current.push(c);
    }

    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// "orders_created" -> "OrdersCreated"; the tail of each word keeps its case
pub fn pascal_case(input: &str) -> String {
    words(input)
        .iter()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// "OrdersCreated" -> "orders_created"
pub fn snake_case(input: &str) -> String {
    words(input)
        .iter()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join("_")
}
