//! Cursor value types for the partitioned-log position model.
//!
//! A cursor names a position inside one partition of a topic. Two forms exist:
//!
//! - [`TopicPosition`]: the user-facing form carried on the wire. Partition
//!   and offset are decimal strings; the offset may also be the sentinel
//!   [`BEGIN_OFFSET`] ("before the oldest available record") or absent when a
//!   client asks to start from the newest position.
//! - [`InternalCursor`]: the normalized form used everywhere past the
//!   boundary: `i32` partition, `i64` offset, totally ordered within a
//!   partition.
//!
//! Offsets follow read-after semantics: a cursor's offset is the offset of
//! the last consumed record, and streaming resumes at `offset + 1`.
//!
//! # Example
//!
//! ```
//! use eventgate_core::cursor::{InternalCursor, TopicPosition};
//!
//! let position = TopicPosition::new("t", "0", Some("41"));
//! let cursor = InternalCursor::from_position(&position)?;
//! assert_eq!(cursor.partition, 0);
//! assert_eq!(cursor.offset, 41);
//! assert_eq!(cursor.to_position(), position);
//! # Ok::<(), eventgate_core::cursor::CursorError>(())
//! ```

use std::cmp::Ordering;
use thiserror::Error;

/// Sentinel offset meaning "before the oldest available record".
///
/// Matched case-insensitively on the wire.
pub const BEGIN_OFFSET: &str = "BEGIN";

/// Returns true when `offset` is the [`BEGIN_OFFSET`] sentinel.
#[must_use]
pub fn is_begin(offset: &str) -> bool {
    offset.eq_ignore_ascii_case(BEGIN_OFFSET)
}

/// Errors produced while normalizing a user-provided cursor.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorError {
    /// The cursor carries no partition.
    #[error("cursor partition is missing")]
    NullPartition,

    /// The cursor carries no offset.
    #[error("cursor offset is missing")]
    NullOffset,

    /// Partition or offset is not a decimal integer.
    #[error("cursor partition or offset has invalid format")]
    InvalidFormat,
}

/// User-facing position: `(topic, partition, offset)` with string fields.
///
/// Immutable. `offset` is `None` only when a client requests "from newest";
/// every position produced by the repository carries a concrete offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPosition {
    /// Topic backing the event type.
    pub topic: String,
    /// Partition as a decimal string.
    pub partition: String,
    /// Offset as a decimal string, or the `BEGIN` sentinel, or absent.
    pub offset: Option<String>,
}

impl TopicPosition {
    /// Create a position from string parts.
    pub fn new(
        topic: impl Into<String>,
        partition: impl Into<String>,
        offset: Option<impl Into<String>>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition: partition.into(),
            offset: offset.map(Into::into),
        }
    }
}

/// Normalized cursor: `i32` partition, `i64` offset.
///
/// Ordering compares partitions first (orderings are only meaningful between
/// cursors of the same partition), then offsets as signed integers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InternalCursor {
    /// Topic the cursor points into.
    pub topic: String,
    /// Partition index.
    pub partition: i32,
    /// Offset of the last consumed record.
    pub offset: i64,
}

impl InternalCursor {
    /// Create a cursor from normalized parts.
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }

    /// Normalize a user-facing position.
    ///
    /// # Errors
    ///
    /// - [`CursorError::NullOffset`] when the position has no offset.
    /// - [`CursorError::InvalidFormat`] when partition or offset does not
    ///   parse as a decimal integer (the `BEGIN` sentinel is not accepted
    ///   here; it must be materialized before normalization).
    pub fn from_position(position: &TopicPosition) -> Result<Self, CursorError> {
        let offset = position.offset.as_deref().ok_or(CursorError::NullOffset)?;
        let partition: i32 = position
            .partition
            .parse()
            .map_err(|_| CursorError::InvalidFormat)?;
        let offset: i64 = offset.parse().map_err(|_| CursorError::InvalidFormat)?;
        Ok(Self {
            topic: position.topic.clone(),
            partition,
            offset,
        })
    }

    /// Convert back to the user-facing string form.
    #[must_use]
    pub fn to_position(&self) -> TopicPosition {
        TopicPosition {
            topic: self.topic.clone(),
            partition: self.partition.to_string(),
            offset: Some(self.offset.to_string()),
        }
    }
}

impl PartialOrd for InternalCursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InternalCursor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.partition
            .cmp(&other.partition)
            .then_with(|| self.offset.cmp(&other.offset))
            .then_with(|| self.topic.cmp(&other.topic))
    }
}

/// Logical boundary of a partition, used when materializing subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// The oldest boundary (before the oldest available record).
    Begin,
    /// The newest boundary (next-to-be-written position).
    End,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn begin_sentinel_is_case_insensitive() {
        assert!(is_begin("BEGIN"));
        assert!(is_begin("begin"));
        assert!(is_begin("Begin"));
        assert!(!is_begin("BEGINNING"));
        assert!(!is_begin("0"));
    }

    #[test]
    fn from_position_rejects_missing_offset() {
        let position = TopicPosition::new("t", "0", None::<String>);
        assert_eq!(
            InternalCursor::from_position(&position),
            Err(CursorError::NullOffset)
        );
    }

    #[test]
    fn from_position_rejects_non_numeric_fields() {
        let bad_offset = TopicPosition::new("t", "0", Some("twelve"));
        assert_eq!(
            InternalCursor::from_position(&bad_offset),
            Err(CursorError::InvalidFormat)
        );

        let bad_partition = TopicPosition::new("t", "p0", Some("12"));
        assert_eq!(
            InternalCursor::from_position(&bad_partition),
            Err(CursorError::InvalidFormat)
        );

        // The sentinel must be materialized before normalization.
        let begin = TopicPosition::new("t", "0", Some("BEGIN"));
        assert_eq!(
            InternalCursor::from_position(&begin),
            Err(CursorError::InvalidFormat)
        );
    }

    #[test]
    fn order_is_partition_first_then_offset() {
        let a = InternalCursor::new("t", 0, 100);
        let b = InternalCursor::new("t", 1, 5);
        let c = InternalCursor::new("t", 1, 6);

        assert!(a < b);
        assert!(b < c);
        assert_eq!(b.cmp(&b.clone()), Ordering::Equal);
    }

    #[test]
    fn negative_offsets_order_as_signed_integers() {
        // The before-oldest position of an empty partition is -1.
        let before = InternalCursor::new("t", 0, -1);
        let first = InternalCursor::new("t", 0, 0);
        assert!(before < first);
    }

    proptest! {
        #[test]
        fn round_trip_is_identity(partition in any::<i32>(), offset in any::<i64>()) {
            let cursor = InternalCursor::new("topic", partition, offset);
            let back = InternalCursor::from_position(&cursor.to_position());
            prop_assert_eq!(back, Ok(cursor));
        }

        #[test]
        fn order_on_one_partition_matches_integer_order(
            partition in any::<i32>(),
            a in any::<i64>(),
            b in any::<i64>(),
        ) {
            let ca = InternalCursor::new("topic", partition, a);
            let cb = InternalCursor::new("topic", partition, b);
            prop_assert_eq!(ca.cmp(&cb), a.cmp(&b));
        }
    }
}
