//! Topic repository abstraction.
//!
//! The [`TopicRepository`] trait is the frontend's only door to the
//! partitioned log store: topic lifecycle, partition position queries,
//! cursor validation, synchronous batch publication and consumer creation.
//! Implementations live elsewhere (`eventgate-kafka` for the real store,
//! `eventgate-testing` for an in-memory double).
//!
//! The trait uses explicit `Pin<Box<dyn Future>>` returns so repositories
//! can be shared as `Arc<dyn TopicRepository>` across request handlers.

use crate::batch::BatchItem;
use crate::consumer::EventConsumer;
use crate::cursor::{Boundary, CursorError, TopicPosition};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Why a cursor was rejected during validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    /// The cursor carries no partition.
    NullPartition,
    /// The cursor carries no offset.
    NullOffset,
    /// Partition or offset is not a decimal integer.
    InvalidFormat,
    /// The partition does not exist in the topic.
    PartitionNotFound,
    /// The offset lies outside the retained window.
    Unavailable,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Self::NullPartition => "NULL_PARTITION",
            Self::NullOffset => "NULL_OFFSET",
            Self::InvalidFormat => "INVALID_FORMAT",
            Self::PartitionNotFound => "PARTITION_NOT_FOUND",
            Self::Unavailable => "UNAVAILABLE",
        };
        f.write_str(code)
    }
}

impl From<CursorError> for RejectionReason {
    fn from(error: CursorError) -> Self {
        match error {
            CursorError::NullPartition => Self::NullPartition,
            CursorError::NullOffset => Self::NullOffset,
            CursorError::InvalidFormat => Self::InvalidFormat,
        }
    }
}

/// A cursor that failed validation, with the offending position.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cursor {reason}")]
pub struct CursorRejection {
    /// Why the cursor was rejected.
    pub reason: RejectionReason,
    /// The cursor that was rejected.
    pub position: TopicPosition,
}

impl CursorRejection {
    /// Create a rejection for `position`.
    pub const fn new(reason: RejectionReason, position: TopicPosition) -> Self {
        Self { reason, position }
    }
}

/// Errors surfaced by repository operations.
#[derive(Error, Debug, Clone)]
pub enum RepositoryError {
    /// Topic creation failed, including "topic already exists".
    #[error("failed to create topic: {reason}")]
    TopicCreation {
        /// The reason for failure.
        reason: String,
    },

    /// Topic deletion could not be issued.
    #[error("failed to delete topic '{topic}': {reason}")]
    TopicDeletion {
        /// The topic whose deletion failed.
        topic: String,
        /// The reason for failure.
        reason: String,
    },

    /// The log store or coordination service is unreachable.
    #[error("service unavailable: {reason}")]
    ServiceUnavailable {
        /// The reason for failure.
        reason: String,
    },

    /// A cursor failed validation.
    #[error(transparent)]
    InvalidCursor(#[from] CursorRejection),

    /// One or more items of a publish batch were not submitted.
    ///
    /// The caller inspects the per-item `(status, detail)` pairs on the
    /// batch it passed in for precise reporting.
    #[error("one or more events could not be published")]
    EventPublishing,
}

/// Frontend door to the partitioned log store.
///
/// Position semantics: `load_newest_positions` returns next-to-be-written
/// offsets (one past the last committed record). `load_oldest_positions`
/// returns before-oldest offsets when `position_on_existing` is false, and
/// first-existing-record offsets (exactly one higher) when true.
pub trait TopicRepository: Send + Sync {
    /// Create a topic with `partition_count` partitions and the given
    /// retention, returning the generated topic id.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::TopicCreation`] when the topic already exists
    /// (including pending deletion) or on any coordination-service failure.
    fn create_topic(
        &self,
        partition_count: i32,
        retention: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<String, RepositoryError>> + Send + '_>>;

    /// Request asynchronous deletion of `topic`.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::TopicDeletion`] when the request cannot be issued.
    fn delete_topic(
        &self,
        topic: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + '_>>;

    /// Whether `topic` currently exists, by listing.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::ServiceUnavailable`] on coordination-service error.
    fn topic_exists(
        &self,
        topic: &str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, RepositoryError>> + Send + '_>>;

    /// Next-to-be-written position for every partition of every given topic.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::ServiceUnavailable`] on any underlying error.
    fn load_newest_positions(
        &self,
        topics: &[String],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<TopicPosition>, RepositoryError>> + Send + '_>>;

    /// Oldest available position for every partition of every given topic.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::ServiceUnavailable`] on any underlying error.
    fn load_oldest_positions(
        &self,
        topics: &[String],
        position_on_existing: bool,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<TopicPosition>, RepositoryError>> + Send + '_>>;

    /// Per-partition offsets at the given boundary of `topic`, suitable for
    /// initializing subscriptions.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::ServiceUnavailable`] on any underlying error.
    fn materialize_positions(
        &self,
        topic: &str,
        boundary: Boundary,
    ) -> Pin<Box<dyn Future<Output = Result<HashMap<i32, i64>, RepositoryError>> + Send + '_>>;

    /// Validate a cursor set against current partition bounds.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::InvalidCursor`] carrying the first rejection, or
    /// [`RepositoryError::ServiceUnavailable`] when bounds cannot be loaded.
    fn validate_cursors<'a>(
        &'a self,
        cursors: &'a [TopicPosition],
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + 'a>>;

    /// Validate a commit cursor: partition existence and format only. The
    /// offset is deliberately not checked against the retained window;
    /// commits may refer to records that have aged out.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::InvalidCursor`] or
    /// [`RepositoryError::ServiceUnavailable`].
    fn validate_commit_cursor<'a>(
        &'a self,
        cursor: &'a TopicPosition,
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + 'a>>;

    /// Synchronously publish a batch, reporting per-item outcomes on the
    /// items themselves.
    ///
    /// An empty batch is a no-op. On return every item is either submitted
    /// or failed with a non-empty detail.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::EventPublishing`] when any item failed; the batch
    /// carries the per-item details.
    fn sync_post_batch<'a>(
        &'a self,
        topic_id: &'a str,
        batch: &'a [BatchItem],
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + 'a>>;

    /// Validate `cursors` and build a consumer seeded with them.
    ///
    /// # Errors
    ///
    /// Same as [`TopicRepository::validate_cursors`].
    fn create_event_consumer<'a>(
        &'a self,
        cursors: &'a [TopicPosition],
    ) -> Pin<
        Box<dyn Future<Output = Result<Box<dyn EventConsumer>, RepositoryError>> + Send + 'a>,
    >;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_reasons_render_as_wire_codes() {
        assert_eq!(RejectionReason::NullPartition.to_string(), "NULL_PARTITION");
        assert_eq!(RejectionReason::Unavailable.to_string(), "UNAVAILABLE");
        assert_eq!(
            RejectionReason::PartitionNotFound.to_string(),
            "PARTITION_NOT_FOUND"
        );
    }

    #[test]
    fn rejection_display_matches_problem_detail() {
        let rejection = CursorRejection::new(
            RejectionReason::Unavailable,
            TopicPosition::new("t", "0", Some("999999")),
        );
        assert_eq!(rejection.to_string(), "cursor UNAVAILABLE");
    }

    #[test]
    fn cursor_errors_map_to_rejection_reasons() {
        assert_eq!(
            RejectionReason::from(CursorError::NullOffset),
            RejectionReason::NullOffset
        );
        assert_eq!(
            RejectionReason::from(CursorError::InvalidFormat),
            RejectionReason::InvalidFormat
        );
    }
}
