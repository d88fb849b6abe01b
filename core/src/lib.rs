//! # Eventgate Core
//!
//! Core traits and value types for the Eventgate event-broker frontend.
//!
//! Eventgate sits between HTTP clients and a topic-partitioned append-only
//! log store. This crate defines the vocabulary both sides share:
//!
//! - the cursor model ([`cursor`]): user-facing `(partition, offset)` string
//!   pairs and their normalized internal form;
//! - the publish batch model ([`batch`]): per-item state with monotonic
//!   status upgrades, mutated from delivery callbacks;
//! - the consumption model ([`consumer`]): positioned consumers yielding
//!   events together with the cursor to resume after them;
//! - the event-type model ([`event_type`]): named streams backed 1:1 by
//!   topics;
//! - the repository seam ([`repository`]): topic lifecycle, position
//!   queries, cursor validation, batched publish and consumer creation.
//!
//! Implementations of the seams live in `eventgate-kafka` (production) and
//! `eventgate-testing` (in-memory doubles).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod batch;
pub mod consumer;
pub mod cursor;
pub mod event_type;
pub mod repository;

pub use batch::{BatchItem, ItemResponse, PublishingStep, SubmissionStatus};
pub use consumer::{ConsumedEvent, ConsumerError, EventConsumer};
pub use cursor::{BEGIN_OFFSET, Boundary, CursorError, InternalCursor, TopicPosition};
pub use event_type::{EventType, EventTypeRegistry};
pub use repository::{
    CursorRejection, RejectionReason, RepositoryError, TopicRepository,
};
