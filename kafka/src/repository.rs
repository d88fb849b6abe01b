//! Kafka-backed topic repository.
//!
//! Implements the [`TopicRepository`] seam on top of rdkafka: topic
//! lifecycle through the admin client, partition bounds through watermark
//! queries on a short-lived consumer, synchronous batch publication through
//! pooled producers gated by per-broker circuit breakers, and consumer
//! creation for the streaming path.

use crate::classify;
use crate::config::KafkaSettings;
use crate::consumer::{ConsumerSeed, KafkaEventConsumer};
use crate::pool::ProducerPool;
use eventgate_core::batch::{BatchItem, SubmissionStatus};
use eventgate_core::consumer::EventConsumer;
use eventgate_core::cursor::{Boundary, InternalCursor, TopicPosition};
use eventgate_core::repository::{
    CursorRejection, RejectionReason, RepositoryError, TopicRepository,
};
use eventgate_runtime::circuit_breaker::{BreakerRegistry, CircuitBreaker, CircuitBreakerConfig};
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::producer::future_producer::OwnedDeliveryResult;
use rdkafka::producer::FutureRecord;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// Inclusive validity window of one partition, as read-after offsets:
/// `(before-oldest, next-to-be-written)`.
type PartitionWindows = HashMap<(String, i32), (i64, i64)>;

/// Topic repository backed by a Kafka-compatible log store.
#[derive(Debug)]
pub struct KafkaTopicRepository {
    settings: KafkaSettings,
    pool: ProducerPool,
    breakers: BreakerRegistry,
}

impl KafkaTopicRepository {
    /// Create a repository over `settings`, with per-broker breakers
    /// configured by `breaker_config`.
    #[must_use]
    pub fn new(settings: KafkaSettings, breaker_config: CircuitBreakerConfig) -> Self {
        let pool = ProducerPool::new(settings.clone());
        Self {
            settings,
            pool,
            breakers: BreakerRegistry::new(breaker_config),
        }
    }

    async fn create_topic_inner(
        &self,
        partition_count: i32,
        retention: Duration,
    ) -> Result<String, RepositoryError> {
        let topic_id = Uuid::new_v4().to_string();
        let admin: AdminClient<DefaultClientContext> =
            self.settings.admin_config().create().map_err(|e| {
                RepositoryError::TopicCreation {
                    reason: format!("failed to create admin client: {e}"),
                }
            })?;

        let retention_ms = retention.as_millis().to_string();
        let segment_ms = self.settings.segment_rotation().as_millis().to_string();
        let topic = NewTopic::new(
            &topic_id,
            partition_count,
            TopicReplication::Fixed(self.settings.replication_factor()),
        )
        .set("retention.ms", &retention_ms)
        .set("segment.ms", &segment_ms);

        let options = AdminOptions::new().operation_timeout(Some(self.settings.admin_timeout()));
        let results = admin.create_topics([&topic], &options).await.map_err(|e| {
            RepositoryError::TopicCreation {
                reason: e.to_string(),
            }
        })?;
        for result in results {
            if let Err((name, code)) = result {
                // Covers "already exists", which includes pending deletion.
                return Err(RepositoryError::TopicCreation {
                    reason: format!("{name}: {code}"),
                });
            }
        }

        tracing::info!(
            topic = %topic_id,
            partitions = partition_count,
            retention_ms = %retention_ms,
            "topic created"
        );
        Ok(topic_id)
    }

    async fn delete_topic_inner(&self, topic: String) -> Result<(), RepositoryError> {
        let admin: AdminClient<DefaultClientContext> =
            self.settings.admin_config().create().map_err(|e| {
                RepositoryError::TopicDeletion {
                    topic: topic.clone(),
                    reason: format!("failed to create admin client: {e}"),
                }
            })?;

        let options = AdminOptions::new().operation_timeout(Some(self.settings.admin_timeout()));
        let results = admin
            .delete_topics(&[topic.as_str()], &options)
            .await
            .map_err(|e| RepositoryError::TopicDeletion {
                topic: topic.clone(),
                reason: e.to_string(),
            })?;
        for result in results {
            if let Err((name, code)) = result {
                return Err(RepositoryError::TopicDeletion {
                    topic: name,
                    reason: code.to_string(),
                });
            }
        }

        tracing::info!(topic = %topic, "topic deletion requested");
        Ok(())
    }

    async fn topic_exists_inner(&self, topic: String) -> Result<bool, RepositoryError> {
        let settings = self.settings.clone();
        run_blocking(move || {
            let consumer: BaseConsumer = settings
                .consumer_config()
                .create()
                .map_err(service_unavailable)?;
            let metadata = consumer
                .fetch_metadata(None, settings.admin_timeout())
                .map_err(service_unavailable)?;
            Ok(metadata.topics().iter().any(|t| t.name() == topic))
        })
        .await
    }

    /// Low/high watermarks for every partition of every given topic, as
    /// read-after offsets: `(low - 1, high)`.
    async fn load_windows(&self, topics: Vec<String>) -> Result<PartitionWindows, RepositoryError> {
        let settings = self.settings.clone();
        run_blocking(move || {
            let consumer: BaseConsumer = settings
                .consumer_config()
                .create()
                .map_err(service_unavailable)?;
            let timeout = settings.admin_timeout();
            let mut windows = PartitionWindows::new();
            for topic in &topics {
                let metadata = consumer
                    .fetch_metadata(Some(topic), timeout)
                    .map_err(service_unavailable)?;
                let Some(topic_metadata) = metadata.topics().first() else {
                    return Err(RepositoryError::ServiceUnavailable {
                        reason: format!("no metadata returned for topic '{topic}'"),
                    });
                };
                for partition in topic_metadata.partitions() {
                    let (low, high) = consumer
                        .fetch_watermarks(topic, partition.id(), timeout)
                        .map_err(service_unavailable)?;
                    windows.insert((topic.clone(), partition.id()), (low - 1, high));
                }
            }
            Ok(windows)
        })
        .await
    }

    async fn load_positions(
        &self,
        topics: Vec<String>,
        pick: fn((i64, i64)) -> i64,
    ) -> Result<Vec<TopicPosition>, RepositoryError> {
        let windows = self.load_windows(topics).await?;
        let mut positions: Vec<TopicPosition> = windows
            .into_iter()
            .map(|((topic, partition), window)| {
                TopicPosition::new(topic, partition.to_string(), Some(pick(window).to_string()))
            })
            .collect();
        positions.sort_by(|a, b| (&a.topic, &a.partition).cmp(&(&b.topic, &b.partition)));
        Ok(positions)
    }

    /// Load the windows the given cursors refer to and validate every
    /// cursor against them, returning the windows for reuse.
    async fn validated_windows(
        &self,
        cursors: &[TopicPosition],
    ) -> Result<PartitionWindows, RepositoryError> {
        let mut topics: Vec<String> = cursors.iter().map(|c| c.topic.clone()).collect();
        topics.sort();
        topics.dedup();

        let windows = self.load_windows(topics).await?;
        for cursor in cursors {
            check_cursor(cursor, &windows)?;
        }
        Ok(windows)
    }

    async fn validate_commit_cursor_inner(
        &self,
        cursor: &TopicPosition,
    ) -> Result<(), RepositoryError> {
        let internal = InternalCursor::from_position(cursor)
            .map_err(|e| CursorRejection::new(e.into(), cursor.clone()))?;
        let windows = self.load_windows(vec![internal.topic.clone()]).await?;
        if !windows.contains_key(&(internal.topic.clone(), internal.partition)) {
            return Err(CursorRejection::new(
                RejectionReason::PartitionNotFound,
                cursor.clone(),
            )
            .into());
        }
        // The offset is deliberately not checked against the retained
        // window; commits may refer to records that have aged out.
        Ok(())
    }

    async fn partition_leaders(
        &self,
        topic: String,
    ) -> Result<HashMap<String, String>, RepositoryError> {
        let settings = self.settings.clone();
        run_blocking(move || {
            let consumer: BaseConsumer = settings
                .consumer_config()
                .create()
                .map_err(service_unavailable)?;
            let metadata = consumer
                .fetch_metadata(Some(&topic), settings.admin_timeout())
                .map_err(service_unavailable)?;
            let Some(topic_metadata) = metadata.topics().first() else {
                return Err(RepositoryError::ServiceUnavailable {
                    reason: format!("no metadata returned for topic '{topic}'"),
                });
            };
            Ok(topic_metadata
                .partitions()
                .iter()
                .map(|p| (p.id().to_string(), p.leader().to_string()))
                .collect())
        })
        .await
    }

    #[allow(clippy::cognitive_complexity)] // The publish algorithm is one unit
    async fn sync_post_batch_inner(
        &self,
        topic_id: &str,
        batch: &[BatchItem],
    ) -> Result<(), RepositoryError> {
        if batch.is_empty() {
            return Ok(());
        }

        let guard = self
            .pool
            .take()
            .map_err(|e| RepositoryError::ServiceUnavailable {
                reason: format!("no producer available: {e}"),
            })?;
        let leaders = self.partition_leaders(topic_id.to_string()).await?;

        let producer_poisoned = AtomicBool::new(false);
        let mut in_flight = Vec::new();

        for item in batch {
            item.begin_publishing();

            let Ok(partition) = item.partition().parse::<i32>() else {
                debug_assert!(false, "batch item with non-numeric partition");
                item.mark_failed("internal error");
                continue;
            };
            let Some(broker_id) = leaders.get(item.partition()) else {
                item.mark_failed("internal error");
                continue;
            };
            item.assign_broker(broker_id.clone());

            let breaker = self.breakers.breaker_for(broker_id).await;
            if !gate_item(item, &breaker).await {
                continue;
            }

            let record = FutureRecord::<(), _>::to(topic_id)
                .partition(partition)
                .payload(item.payload());
            match guard.producer().send_result(record) {
                Ok(delivery) => {
                    in_flight.push(settle_delivery(
                        item,
                        breaker,
                        delivery,
                        &producer_poisoned,
                    ));
                }
                Err((error, _record)) => {
                    item.mark_failed("internal error");
                    if classify::needs_reset(&error) {
                        producer_poisoned.store(true, Ordering::Relaxed);
                    }
                    mark_outcome(&breaker, &error).await;
                }
            }
        }

        let deadline = self.settings.send_timeout() + self.settings.request_timeout();
        let waited =
            tokio::time::timeout(deadline, futures::future::join_all(in_flight)).await;
        if waited.is_err() {
            tracing::warn!(topic = %topic_id, "publish batch timed out");
            sweep(batch, "timed out");
            drop(guard);
            return Err(RepositoryError::EventPublishing);
        }

        if producer_poisoned.load(Ordering::Relaxed) {
            guard.terminate();
        } else {
            drop(guard);
        }

        let any_failed = batch.iter().any(|item| {
            item.response()
                .is_none_or(|r| r.status != SubmissionStatus::Submitted)
        });
        if any_failed {
            sweep(batch, "internal error");
            return Err(RepositoryError::EventPublishing);
        }
        Ok(())
    }

    async fn create_event_consumer_inner(
        &self,
        cursors: &[TopicPosition],
    ) -> Result<Box<dyn EventConsumer>, RepositoryError> {
        let windows = self.validated_windows(cursors).await?;

        let mut seeds = Vec::with_capacity(cursors.len());
        for cursor in cursors {
            // Validation above guarantees the parse and the window entry.
            let internal = InternalCursor::from_position(cursor)
                .map_err(|e| CursorRejection::new(e.into(), cursor.clone()))?;
            let (_, newest) = windows
                .get(&(internal.topic.clone(), internal.partition))
                .copied()
                .ok_or_else(|| {
                    CursorRejection::new(RejectionReason::PartitionNotFound, cursor.clone())
                })?;
            seeds.push(ConsumerSeed {
                topic: internal.topic.clone(),
                partition: internal.partition,
                start_offset: seed_offset(internal.offset, newest),
                committed_offset: internal.offset,
            });
        }

        let consumer =
            KafkaEventConsumer::new(&self.settings, seeds).map_err(service_unavailable)?;
        Ok(Box::new(consumer))
    }
}

impl TopicRepository for KafkaTopicRepository {
    fn create_topic(
        &self,
        partition_count: i32,
        retention: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<String, RepositoryError>> + Send + '_>> {
        Box::pin(self.create_topic_inner(partition_count, retention))
    }

    fn delete_topic(
        &self,
        topic: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move { self.delete_topic_inner(topic).await })
    }

    fn topic_exists(
        &self,
        topic: &str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, RepositoryError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move { self.topic_exists_inner(topic).await })
    }

    fn load_newest_positions(
        &self,
        topics: &[String],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<TopicPosition>, RepositoryError>> + Send + '_>>
    {
        let topics = topics.to_vec();
        Box::pin(async move { self.load_positions(topics, |(_, newest)| newest).await })
    }

    fn load_oldest_positions(
        &self,
        topics: &[String],
        position_on_existing: bool,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<TopicPosition>, RepositoryError>> + Send + '_>>
    {
        let topics = topics.to_vec();
        let pick: fn((i64, i64)) -> i64 = if position_on_existing {
            |(oldest, _)| oldest + 1
        } else {
            |(oldest, _)| oldest
        };
        Box::pin(async move { self.load_positions(topics, pick).await })
    }

    fn materialize_positions(
        &self,
        topic: &str,
        boundary: Boundary,
    ) -> Pin<Box<dyn Future<Output = Result<HashMap<i32, i64>, RepositoryError>> + Send + '_>>
    {
        let topic = topic.to_string();
        Box::pin(async move {
            let windows = self.load_windows(vec![topic]).await?;
            Ok(windows
                .into_iter()
                .map(|((_, partition), (oldest, newest))| {
                    let offset = match boundary {
                        Boundary::Begin => oldest,
                        Boundary::End => newest,
                    };
                    (partition, offset)
                })
                .collect())
        })
    }

    fn validate_cursors<'a>(
        &'a self,
        cursors: &'a [TopicPosition],
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + 'a>> {
        Box::pin(async move {
            self.validated_windows(cursors).await?;
            Ok(())
        })
    }

    fn validate_commit_cursor<'a>(
        &'a self,
        cursor: &'a TopicPosition,
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + 'a>> {
        Box::pin(self.validate_commit_cursor_inner(cursor))
    }

    fn sync_post_batch<'a>(
        &'a self,
        topic_id: &'a str,
        batch: &'a [BatchItem],
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + 'a>> {
        Box::pin(self.sync_post_batch_inner(topic_id, batch))
    }

    fn create_event_consumer<'a>(
        &'a self,
        cursors: &'a [TopicPosition],
    ) -> Pin<
        Box<dyn Future<Output = Result<Box<dyn EventConsumer>, RepositoryError>> + Send + 'a>,
    > {
        Box::pin(self.create_event_consumer_inner(cursors))
    }
}

/// Consult the broker's breaker before sending. A refused item is failed as
/// "short circuited" and never handed to the producer.
async fn gate_item(item: &BatchItem, breaker: &CircuitBreaker) -> bool {
    if breaker.allow_request().await {
        breaker.mark_start();
        true
    } else {
        item.mark_failed("short circuited");
        false
    }
}

/// Settle one delivery future: record the item outcome and feed the broker's
/// circuit breaker.
async fn settle_delivery(
    item: &BatchItem,
    breaker: CircuitBreaker,
    delivery: impl Future<Output = Result<OwnedDeliveryResult, futures::channel::oneshot::Canceled>>,
    producer_poisoned: &AtomicBool,
) {
    match delivery.await {
        Ok(Ok((partition, offset))) => {
            tracing::trace!(partition, offset, "record submitted");
            item.mark_submitted();
            breaker.mark_successfully().await;
        }
        Ok(Err((error, _message))) => {
            tracing::debug!(error = %error, "record delivery failed");
            item.mark_failed("internal error");
            if classify::needs_reset(&error) {
                producer_poisoned.store(true, Ordering::Relaxed);
            }
            mark_outcome(&breaker, &error).await;
        }
        Err(_cancelled) => {
            // The producer dropped the delivery channel; treat as a
            // connection-class failure.
            item.mark_failed("internal error");
            breaker.mark_failure().await;
        }
    }
}

/// Only connection-class failures count against the breaker; a broker that
/// answered with a per-record rejection is healthy.
async fn mark_outcome(breaker: &CircuitBreaker, error: &rdkafka::error::KafkaError) {
    if classify::is_connection_error(error) {
        breaker.mark_failure().await;
    } else {
        breaker.mark_successfully().await;
    }
}

/// Give every unresolved item a terminal failure with `detail`. Submitted
/// items and items that already carry a detail are left untouched.
fn sweep(batch: &[BatchItem], detail: &str) {
    for item in batch {
        item.mark_failed(detail);
    }
}

/// Check one cursor against the loaded partition windows.
fn check_cursor(
    cursor: &TopicPosition,
    windows: &PartitionWindows,
) -> Result<(), CursorRejection> {
    let internal = InternalCursor::from_position(cursor)
        .map_err(|e| CursorRejection::new(e.into(), cursor.clone()))?;
    let Some((oldest, newest)) = windows
        .get(&(internal.topic.clone(), internal.partition))
        .copied()
    else {
        return Err(CursorRejection::new(
            RejectionReason::PartitionNotFound,
            cursor.clone(),
        ));
    };
    if internal.offset < oldest || internal.offset > newest {
        return Err(CursorRejection::new(
            RejectionReason::Unavailable,
            cursor.clone(),
        ));
    }
    Ok(())
}

/// First offset to fetch for a cursor, clamped so a tail cursor parks the
/// consumer at the end of the partition and waits for the next record.
const fn seed_offset(committed: i64, newest: i64) -> i64 {
    let next = committed + 1;
    if next > newest { newest } else { next }
}

fn service_unavailable(error: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::ServiceUnavailable {
        reason: error.to_string(),
    }
}

async fn run_blocking<T, F>(task: F) -> Result<T, RepositoryError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, RepositoryError> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(service_unavailable)?
}
