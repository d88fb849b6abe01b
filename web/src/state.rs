//! Application state for Axum handlers.
//!
//! [`AppState`] wires the controller to its collaborators: the topic
//! repository, the event-type registry, the connection-slot limiter and the
//! admission blacklist. Feature toggling and stream defaults live here too.

use crate::limiter::ConsumerLimiter;
use crate::stream::EventStreamConfig;
use eventgate_core::event_type::EventTypeRegistry;
use eventgate_core::repository::TopicRepository;
use std::collections::HashSet;
use std::sync::Arc;

/// Feature toggles honored by the controller.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureFlags {
    /// When enabled, streams must acquire one connection slot per partition.
    pub limit_consumers_number: bool,
}

/// Denylist consulted before any other admission step.
#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    clients: HashSet<String>,
    event_types: HashSet<String>,
}

impl Blacklist {
    /// Create an empty blacklist.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Block a client id.
    #[must_use]
    pub fn with_client(mut self, client_id: impl Into<String>) -> Self {
        self.clients.insert(client_id.into());
        self
    }

    /// Block consumption of an event type.
    #[must_use]
    pub fn with_event_type(mut self, name: impl Into<String>) -> Self {
        self.event_types.insert(name.into());
        self
    }

    /// Whether `client_id` may not consume `event_type`.
    #[must_use]
    pub fn is_blocked(&self, client_id: &str, event_type: &str) -> bool {
        self.clients.contains(client_id) || self.event_types.contains(event_type)
    }
}

/// Application state shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Door to the partitioned log store.
    pub repository: Arc<dyn TopicRepository>,
    /// Event-type metadata lookup.
    pub event_types: Arc<dyn EventTypeRegistry>,
    /// Connection-slot admission.
    pub limiter: Arc<ConsumerLimiter>,
    /// Admission denylist.
    pub blacklist: Arc<Blacklist>,
    /// Feature toggles.
    pub features: FeatureFlags,
    /// Defaults applied when a request omits stream parameters.
    pub stream_defaults: EventStreamConfig,
}

impl AppState {
    /// Create a state with default limiter, empty blacklist, features off
    /// and stock stream defaults.
    #[must_use]
    pub fn new(
        repository: Arc<dyn TopicRepository>,
        event_types: Arc<dyn EventTypeRegistry>,
    ) -> Self {
        Self {
            repository,
            event_types,
            limiter: Arc::new(ConsumerLimiter::new(5)),
            blacklist: Arc::new(Blacklist::new()),
            features: FeatureFlags::default(),
            stream_defaults: EventStreamConfig::default(),
        }
    }

    /// Replace the connection-slot limiter.
    #[must_use]
    pub fn with_limiter(mut self, limiter: Arc<ConsumerLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    /// Replace the blacklist.
    #[must_use]
    pub fn with_blacklist(mut self, blacklist: Blacklist) -> Self {
        self.blacklist = Arc::new(blacklist);
        self
    }

    /// Set the feature toggles.
    #[must_use]
    pub const fn with_features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Replace the stream parameter defaults.
    #[must_use]
    pub fn with_stream_defaults(mut self, defaults: EventStreamConfig) -> Self {
        self.stream_defaults = defaults;
        self
    }
}
