//! Event-type model.
//!
//! An event type is a named logical stream backed 1:1 by a topic. How event
//! types are persisted is not this crate's concern; [`EventTypeRegistry`] is
//! the seam the streaming controller resolves names through.

use serde::{Deserialize, Serialize};

/// A named logical stream and the topic backing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventType {
    /// Public name of the event type.
    pub name: String,
    /// Backing topic id.
    pub topic: String,
    /// Scopes a client must hold to read from this event type.
    #[serde(default)]
    pub read_scopes: Vec<String>,
}

impl EventType {
    /// Create an event type with no read-scope restrictions.
    pub fn new(name: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            topic: topic.into(),
            read_scopes: Vec::new(),
        }
    }

    /// Restrict reads to clients holding any of `scopes`.
    #[must_use]
    pub fn with_read_scopes(mut self, scopes: Vec<String>) -> Self {
        self.read_scopes = scopes;
        self
    }
}

/// Lookup seam for event-type metadata.
pub trait EventTypeRegistry: Send + Sync {
    /// Resolve an event type by name.
    fn get(&self, name: &str) -> Option<EventType>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scopes_default_to_open() {
        let event_type = EventType::new("orders", "5bc98391-6e07-4a0f-a9be-9e4b6b859d0d");
        assert!(event_type.read_scopes.is_empty());
    }

    #[test]
    fn deserializes_without_scopes_field() {
        let parsed: EventType = serde_json::from_str(
            "{\"name\":\"orders\",\"topic\":\"t\"}",
        )
        .expect("valid event type json");
        assert!(parsed.read_scopes.is_empty());
    }
}
