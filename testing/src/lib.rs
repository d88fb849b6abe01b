//! # Eventgate Testing
//!
//! Testing doubles for the Eventgate event broker.
//!
//! This crate provides:
//! - [`InMemoryTopicRepository`]: a scripted, broker-free [`TopicRepository`]
//! - [`ScriptedConsumer`]: an [`EventConsumer`] draining a prepared queue
//! - [`StaticEventTypes`]: a fixed [`EventTypeRegistry`]
//!
//! ## Example
//!
//! ```
//! use eventgate_testing::InMemoryTopicRepository;
//! use eventgate_core::repository::TopicRepository;
//!
//! # async fn example() {
//! let repository = InMemoryTopicRepository::new()
//!     .with_partition("T", 0, 5, 100);
//!
//! let newest = repository
//!     .load_newest_positions(&["T".to_string()])
//!     .await
//!     .expect("load positions");
//! assert_eq!(newest[0].offset.as_deref(), Some("100"));
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use eventgate_core::batch::BatchItem;
use eventgate_core::consumer::{ConsumedEvent, ConsumerError, EventConsumer};
use eventgate_core::cursor::{Boundary, InternalCursor, TopicPosition};
use eventgate_core::event_type::{EventType, EventTypeRegistry};
use eventgate_core::repository::{
    CursorRejection, RejectionReason, RepositoryError, TopicRepository,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Retained-range of one in-memory partition.
#[derive(Debug, Clone, Copy)]
struct PartitionState {
    /// Offset of the oldest retained record.
    low: i64,
    /// Next-to-be-written offset.
    high: i64,
}

/// One record captured by the in-memory publish path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedRecord {
    /// Target topic.
    pub topic: String,
    /// Target partition, string form.
    pub partition: String,
    /// The opaque payload.
    pub payload: String,
}

#[derive(Debug, Default)]
struct Inner {
    topics: HashMap<String, BTreeMap<i32, PartitionState>>,
    published: Vec<PublishedRecord>,
    scripted_events: VecDeque<ConsumedEvent>,
    next_topic: usize,
    fail_publishes: bool,
    unavailable: bool,
}

/// Broker-free [`TopicRepository`] with scripted partition bounds.
///
/// Windows follow the production semantics: a partition retaining records
/// `[low, high)` accepts read-after cursors in `[low - 1, high]`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTopicRepository {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryTopicRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a partition retaining offsets `[low, high)`.
    #[must_use]
    pub fn with_partition(self, topic: &str, partition: i32, low: i64, high: i64) -> Self {
        self.lock()
            .topics
            .entry(topic.to_string())
            .or_default()
            .insert(partition, PartitionState { low, high });
        self
    }

    /// Queue events for consumers created later, in order.
    #[must_use]
    pub fn with_scripted_events(self, events: Vec<ConsumedEvent>) -> Self {
        self.lock().scripted_events.extend(events);
        self
    }

    /// Make every publish fail its items with "internal error".
    #[must_use]
    pub fn failing_publishes(self) -> Self {
        self.lock().fail_publishes = true;
        self
    }

    /// Make every operation fail with [`RepositoryError::ServiceUnavailable`].
    #[must_use]
    pub fn unavailable(self) -> Self {
        self.lock().unavailable = true;
        self
    }

    /// Records captured by `sync_post_batch`, in submission order.
    #[must_use]
    pub fn published(&self) -> Vec<PublishedRecord> {
        self.lock().published.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn guard_available(inner: &Inner) -> Result<(), RepositoryError> {
        if inner.unavailable {
            return Err(RepositoryError::ServiceUnavailable {
                reason: "scripted outage".to_string(),
            });
        }
        Ok(())
    }

    fn positions_by(
        &self,
        topics: &[String],
        pick: fn(PartitionState) -> i64,
    ) -> Result<Vec<TopicPosition>, RepositoryError> {
        let inner = self.lock();
        Self::guard_available(&inner)?;
        let mut positions = Vec::new();
        for topic in topics {
            let Some(partitions) = inner.topics.get(topic) else {
                return Err(RepositoryError::ServiceUnavailable {
                    reason: format!("unknown topic '{topic}'"),
                });
            };
            for (partition, state) in partitions {
                positions.push(TopicPosition::new(
                    topic.clone(),
                    partition.to_string(),
                    Some(pick(*state).to_string()),
                ));
            }
        }
        Ok(positions)
    }

    fn check_cursors(
        inner: &Inner,
        cursors: &[TopicPosition],
    ) -> Result<(), RepositoryError> {
        for cursor in cursors {
            let internal = InternalCursor::from_position(cursor)
                .map_err(|e| CursorRejection::new(e.into(), cursor.clone()))?;
            let state = inner
                .topics
                .get(&internal.topic)
                .and_then(|partitions| partitions.get(&internal.partition))
                .ok_or_else(|| {
                    CursorRejection::new(RejectionReason::PartitionNotFound, cursor.clone())
                })?;
            if internal.offset < state.low - 1 || internal.offset > state.high {
                return Err(
                    CursorRejection::new(RejectionReason::Unavailable, cursor.clone()).into(),
                );
            }
        }
        Ok(())
    }
}

impl TopicRepository for InMemoryTopicRepository {
    fn create_topic(
        &self,
        partition_count: i32,
        _retention: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<String, RepositoryError>> + Send + '_>> {
        Box::pin(async move {
            let mut inner = self.lock();
            Self::guard_available(&inner)?;
            inner.next_topic += 1;
            let topic_id = format!("topic-{}", inner.next_topic);
            let partitions = (0..partition_count)
                .map(|p| (p, PartitionState { low: 0, high: 0 }))
                .collect();
            inner.topics.insert(topic_id.clone(), partitions);
            Ok(topic_id)
        })
    }

    fn delete_topic(
        &self,
        topic: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            let mut inner = self.lock();
            if inner.topics.remove(&topic).is_none() {
                return Err(RepositoryError::TopicDeletion {
                    topic,
                    reason: "unknown topic".to_string(),
                });
            }
            Ok(())
        })
    }

    fn topic_exists(
        &self,
        topic: &str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, RepositoryError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            let inner = self.lock();
            Self::guard_available(&inner)?;
            Ok(inner.topics.contains_key(&topic))
        })
    }

    fn load_newest_positions(
        &self,
        topics: &[String],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<TopicPosition>, RepositoryError>> + Send + '_>>
    {
        let topics = topics.to_vec();
        Box::pin(async move { self.positions_by(&topics, |state| state.high) })
    }

    fn load_oldest_positions(
        &self,
        topics: &[String],
        position_on_existing: bool,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<TopicPosition>, RepositoryError>> + Send + '_>>
    {
        let topics = topics.to_vec();
        let pick: fn(PartitionState) -> i64 = if position_on_existing {
            |state| state.low
        } else {
            |state| state.low - 1
        };
        Box::pin(async move { self.positions_by(&topics, pick) })
    }

    fn materialize_positions(
        &self,
        topic: &str,
        boundary: Boundary,
    ) -> Pin<Box<dyn Future<Output = Result<HashMap<i32, i64>, RepositoryError>> + Send + '_>>
    {
        let topic = topic.to_string();
        Box::pin(async move {
            let inner = self.lock();
            Self::guard_available(&inner)?;
            let Some(partitions) = inner.topics.get(&topic) else {
                return Err(RepositoryError::ServiceUnavailable {
                    reason: format!("unknown topic '{topic}'"),
                });
            };
            Ok(partitions
                .iter()
                .map(|(partition, state)| {
                    let offset = match boundary {
                        Boundary::Begin => state.low - 1,
                        Boundary::End => state.high,
                    };
                    (*partition, offset)
                })
                .collect())
        })
    }

    fn validate_cursors<'a>(
        &'a self,
        cursors: &'a [TopicPosition],
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + 'a>> {
        Box::pin(async move {
            let inner = self.lock();
            Self::guard_available(&inner)?;
            Self::check_cursors(&inner, cursors)
        })
    }

    fn validate_commit_cursor<'a>(
        &'a self,
        cursor: &'a TopicPosition,
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + 'a>> {
        Box::pin(async move {
            let internal = InternalCursor::from_position(cursor)
                .map_err(|e| CursorRejection::new(e.into(), cursor.clone()))?;
            let inner = self.lock();
            Self::guard_available(&inner)?;
            let known = inner
                .topics
                .get(&internal.topic)
                .is_some_and(|partitions| partitions.contains_key(&internal.partition));
            if known {
                Ok(())
            } else {
                Err(CursorRejection::new(
                    RejectionReason::PartitionNotFound,
                    cursor.clone(),
                )
                .into())
            }
        })
    }

    fn sync_post_batch<'a>(
        &'a self,
        topic_id: &'a str,
        batch: &'a [BatchItem],
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + 'a>> {
        Box::pin(async move {
            if batch.is_empty() {
                return Ok(());
            }
            let mut inner = self.lock();
            Self::guard_available(&inner)?;
            let failing = inner.fail_publishes;
            for item in batch {
                item.begin_publishing();
                item.assign_broker("0");
                if failing {
                    item.mark_failed("internal error");
                    continue;
                }
                item.mark_submitted();
                inner.published.push(PublishedRecord {
                    topic: topic_id.to_string(),
                    partition: item.partition().to_string(),
                    payload: item.payload().to_string(),
                });
                if let Ok(partition) = item.partition().parse::<i32>() {
                    if let Some(state) = inner
                        .topics
                        .get_mut(topic_id)
                        .and_then(|partitions| partitions.get_mut(&partition))
                    {
                        state.high += 1;
                    }
                }
            }
            if failing {
                return Err(RepositoryError::EventPublishing);
            }
            Ok(())
        })
    }

    fn create_event_consumer<'a>(
        &'a self,
        cursors: &'a [TopicPosition],
    ) -> Pin<
        Box<
            dyn Future<Output = Result<Box<dyn EventConsumer>, RepositoryError>> + Send + 'a,
        >,
    > {
        Box::pin(async move {
            let mut inner = self.lock();
            Self::guard_available(&inner)?;
            Self::check_cursors(&inner, cursors)?;
            let events = std::mem::take(&mut inner.scripted_events);
            let consumer = ScriptedConsumer::with_start(cursors, events);
            Ok(Box::new(consumer) as Box<dyn EventConsumer>)
        })
    }
}

/// [`EventConsumer`] draining a prepared event queue.
///
/// `read_event` yields the queued events in order, then `None` forever, as
/// if every further poll interval passed idle.
#[derive(Debug, Default)]
pub struct ScriptedConsumer {
    events: VecDeque<ConsumedEvent>,
    positions: HashMap<(String, String), TopicPosition>,
    fail_after_drain: Option<ConsumerError>,
}

impl ScriptedConsumer {
    /// Create a consumer yielding `events` in order.
    #[must_use]
    pub fn new(events: Vec<ConsumedEvent>) -> Self {
        Self {
            events: events.into(),
            positions: HashMap::new(),
            fail_after_drain: None,
        }
    }

    fn with_start(cursors: &[TopicPosition], events: VecDeque<ConsumedEvent>) -> Self {
        let positions = cursors
            .iter()
            .map(|c| ((c.topic.clone(), c.partition.clone()), c.clone()))
            .collect();
        Self {
            events,
            positions,
            fail_after_drain: None,
        }
    }

    /// Fail with `error` once the queue is drained, instead of idling.
    #[must_use]
    pub fn failing_after_drain(mut self, error: ConsumerError) -> Self {
        self.fail_after_drain = Some(error);
        self
    }
}

impl EventConsumer for ScriptedConsumer {
    fn read_event(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ConsumedEvent>, ConsumerError>> + Send + '_>>
    {
        Box::pin(async move {
            match self.events.pop_front() {
                Some(event) => {
                    let position = &event.next_position;
                    self.positions.insert(
                        (position.topic.clone(), position.partition.clone()),
                        position.clone(),
                    );
                    Ok(Some(event))
                }
                None => match self.fail_after_drain.take() {
                    Some(error) => Err(error),
                    None => {
                        // Let the caller's timers make progress between
                        // simulated idle polls.
                        tokio::task::yield_now().await;
                        Ok(None)
                    }
                },
            }
        })
    }

    fn positions(&self) -> Vec<TopicPosition> {
        let mut positions: Vec<TopicPosition> = self.positions.values().cloned().collect();
        positions.sort_by(|a, b| (&a.topic, &a.partition).cmp(&(&b.topic, &b.partition)));
        positions
    }
}

/// Fixed [`EventTypeRegistry`].
#[derive(Debug, Clone, Default)]
pub struct StaticEventTypes {
    types: HashMap<String, EventType>,
}

impl StaticEventTypes {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an event type.
    #[must_use]
    pub fn with(mut self, event_type: EventType) -> Self {
        self.types.insert(event_type.name.clone(), event_type);
        self
    }
}

impl EventTypeRegistry for StaticEventTypes {
    fn get(&self, name: &str) -> Option<EventType> {
        self.types.get(name).cloned()
    }
}
