//! Consumer abstraction for long-lived streaming reads.
//!
//! An [`EventConsumer`] is created by the topic repository, seeded with a set
//! of validated cursors, and then drained by the event stream writer. The
//! trait uses explicit `Pin<Box<dyn Future>>` returns so consumers can be
//! passed around as `Box<dyn EventConsumer>`.

use crate::cursor::TopicPosition;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// One event read from the log store.
///
/// `next_position` is the cursor to commit in order to resume after this
/// event (read-after semantics: the record's own offset).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedEvent {
    /// The opaque event payload.
    pub payload: String,
    /// Cursor to commit to resume after this event.
    pub next_position: TopicPosition,
}

impl ConsumedEvent {
    /// Create a consumed event.
    pub fn new(payload: impl Into<String>, next_position: TopicPosition) -> Self {
        Self {
            payload: payload.into(),
            next_position,
        }
    }
}

/// Errors surfaced while reading from the log store.
#[derive(Error, Debug, Clone)]
pub enum ConsumerError {
    /// The underlying poll failed.
    #[error("failed to read from the log store: {0}")]
    ReadFailed(String),

    /// A record arrived without a payload.
    #[error("record at partition {partition} offset {offset} has no payload")]
    EmptyRecord {
        /// Partition of the offending record.
        partition: i32,
        /// Offset of the offending record.
        offset: i64,
    },
}

/// A positioned consumer over one topic's partitions.
///
/// `read_event` blocks for at most the configured poll timeout and returns
/// `None` when the interval passed without a record; the streaming loop uses
/// those gaps to flush batches and emit keep-alives.
pub trait EventConsumer: Send {
    /// Read the next event, or `None` after an empty poll interval.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::ReadFailed`] when the underlying fetch fails.
    fn read_event(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ConsumedEvent>, ConsumerError>> + Send + '_>>;

    /// Current read-after positions, one per assigned partition.
    fn positions(&self) -> Vec<TopicPosition>;
}
