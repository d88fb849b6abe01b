//! Streaming consumer over a fixed partition assignment.
//!
//! Created by the repository after cursor validation. The assignment is
//! explicit (no consumer-group rebalancing); each partition starts at the
//! seeded offset and the consumer tracks read-after positions as records
//! arrive.

use crate::config::KafkaSettings;
use eventgate_core::consumer::{ConsumedEvent, ConsumerError, EventConsumer};
use eventgate_core::cursor::TopicPosition;
use rdkafka::Offset;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::topic_partition_list::TopicPartitionList;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Starting state for one assigned partition.
#[derive(Debug, Clone)]
pub struct ConsumerSeed {
    /// Topic to read from.
    pub topic: String,
    /// Partition index.
    pub partition: i32,
    /// First offset to fetch.
    pub start_offset: i64,
    /// Read-after offset reported until the first record arrives.
    pub committed_offset: i64,
}

/// Kafka-backed [`EventConsumer`].
pub struct KafkaEventConsumer {
    consumer: StreamConsumer,
    poll_timeout: Duration,
    positions: HashMap<(String, i32), i64>,
}

impl KafkaEventConsumer {
    /// Create a consumer assigned to the seeded partitions.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`KafkaError`] when the consumer cannot be
    /// configured or the assignment is rejected.
    pub fn new(settings: &KafkaSettings, seeds: Vec<ConsumerSeed>) -> Result<Self, KafkaError> {
        let consumer: StreamConsumer = settings.consumer_config().create()?;

        let mut assignment = TopicPartitionList::with_capacity(seeds.len());
        for seed in &seeds {
            assignment.add_partition_offset(
                &seed.topic,
                seed.partition,
                Offset::Offset(seed.start_offset),
            )?;
        }
        consumer.assign(&assignment)?;

        tracing::debug!(partitions = seeds.len(), "event consumer assigned");

        let positions = seeds
            .into_iter()
            .map(|seed| ((seed.topic, seed.partition), seed.committed_offset))
            .collect();
        Ok(Self {
            consumer,
            poll_timeout: settings.poll_timeout(),
            positions,
        })
    }
}

impl EventConsumer for KafkaEventConsumer {
    fn read_event(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ConsumedEvent>, ConsumerError>> + Send + '_>>
    {
        Box::pin(async move {
            let message = match tokio::time::timeout(self.poll_timeout, self.consumer.recv()).await
            {
                Err(_elapsed) => return Ok(None),
                Ok(Err(error)) => return Err(ConsumerError::ReadFailed(error.to_string())),
                Ok(Ok(message)) => message,
            };

            let partition = message.partition();
            let offset = message.offset();
            let Some(payload) = message.payload() else {
                return Err(ConsumerError::EmptyRecord { partition, offset });
            };
            let payload = String::from_utf8_lossy(payload).into_owned();
            let topic = message.topic().to_string();

            self.positions.insert((topic.clone(), partition), offset);
            let next_position =
                TopicPosition::new(topic, partition.to_string(), Some(offset.to_string()));
            Ok(Some(ConsumedEvent::new(payload, next_position)))
        })
    }

    fn positions(&self) -> Vec<TopicPosition> {
        let mut positions: Vec<TopicPosition> = self
            .positions
            .iter()
            .map(|((topic, partition), offset)| {
                TopicPosition::new(
                    topic.clone(),
                    partition.to_string(),
                    Some(offset.to_string()),
                )
            })
            .collect();
        positions.sort_by(|a, b| (&a.topic, &a.partition).cmp(&(&b.topic, &b.partition)));
        positions
    }
}
