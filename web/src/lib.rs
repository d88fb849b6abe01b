//! Axum streaming controller for the Eventgate event broker.
//!
//! This crate is the HTTP face of the consume path:
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │           Streaming controller           │  ← admission, cursors, slots
//! │  GET /event-types/{name}/events          │  ← problem+json errors
//! ├──────────────────────────────────────────┤
//! │             EventStream                  │  ← framed batches, keep-alives
//! ├──────────────────────────────────────────┤
//! │        TopicRepository (seam)            │  ← validation, consumers
//! └──────────────────────────────────────────┘
//! ```
//!
//! # Request flow
//!
//! 1. Blacklist admission, event-type resolution, scope check
//! 2. Starting cursors from the `X-nakadi-cursors` header (or newest)
//! 3. Connection-slot acquisition per partition (feature gated)
//! 4. 200 with `application/x-json-stream`, batches until a limit is met or
//!    the client disconnects
//! 5. Cleanup on every path: slots released, gauge decremented

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod limiter;
pub mod state;
pub mod stream;
pub mod watcher;

use axum::Router;
use axum::routing::get;

pub use error::Problem;
pub use extractors::Client;
pub use limiter::{ConnectionSlot, ConsumerLimiter, NoConnectionSlots};
pub use state::{AppState, Blacklist, FeatureFlags};
pub use stream::{EventStream, EventStreamConfig};
pub use watcher::ConnectionReady;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, Problem>;

/// Build the consumption router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/event-types/:name/events", get(handlers::events::stream_events))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
