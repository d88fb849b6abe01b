//! Producer pool for the publish path.
//!
//! Producers are expensive to create and internally threaded, so publishes
//! borrow one from a free-list instead of creating their own. The borrow is
//! a guard: dropping it returns the producer, [`PooledProducer::terminate`]
//! disposes of it so the next take builds a fresh one. Both work on every
//! exit path, including a publish future dropped mid-wait.

use crate::config::KafkaSettings;
use rdkafka::error::KafkaError;
use rdkafka::producer::FutureProducer;
use std::sync::Mutex;

/// Free-list of Kafka producers.
pub struct ProducerPool {
    settings: KafkaSettings,
    idle: Mutex<Vec<FutureProducer>>,
}

impl std::fmt::Debug for ProducerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerPool")
            .field("settings", &self.settings)
            .field("idle_count", &self.lock_idle().len())
            .finish()
    }
}

impl ProducerPool {
    /// Create an empty pool; producers are built on demand.
    #[must_use]
    pub fn new(settings: KafkaSettings) -> Self {
        Self {
            settings,
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Borrow a producer, creating one when the free-list is empty.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`KafkaError`] when a new producer cannot be
    /// configured.
    pub fn take(&self) -> Result<PooledProducer<'_>, KafkaError> {
        let reused = self.lock_idle().pop();
        let producer = match reused {
            Some(producer) => producer,
            None => {
                tracing::debug!(
                    brokers = %self.settings.bootstrap_servers(),
                    "creating producer for the pool"
                );
                self.settings.producer_config().create()?
            }
        };
        Ok(PooledProducer {
            pool: self,
            producer: Some(producer),
        })
    }

    /// Idle producers currently pooled.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.lock_idle().len()
    }

    fn give_back(&self, producer: FutureProducer) {
        let mut idle = self.lock_idle();
        if idle.len() < self.settings.pool_size() {
            idle.push(producer);
        }
        // Beyond the bound the producer is simply dropped.
    }

    fn lock_idle(&self) -> std::sync::MutexGuard<'_, Vec<FutureProducer>> {
        self.idle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// A producer borrowed from the pool.
///
/// Dropping the guard releases the producer back; [`Self::terminate`]
/// disposes of it instead.
pub struct PooledProducer<'a> {
    pool: &'a ProducerPool,
    producer: Option<FutureProducer>,
}

impl std::fmt::Debug for PooledProducer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledProducer")
            .field("pool", &self.pool)
            .field("producer", &self.producer.is_some())
            .finish()
    }
}

impl PooledProducer<'_> {
    /// The borrowed producer.
    ///
    /// # Panics
    ///
    /// Never panics: the slot is only emptied by `terminate` and `Drop`,
    /// both of which consume the guard.
    #[must_use]
    pub fn producer(&self) -> &FutureProducer {
        #[allow(clippy::expect_used)] // Slot is only emptied on consume
        self.producer.as_ref().expect("producer present until guard is consumed")
    }

    /// Dispose of the producer instead of returning it to the pool.
    ///
    /// Used after delivery errors that indicate stale broker state; the
    /// next take builds a fresh producer with fresh metadata.
    pub fn terminate(mut self) {
        if let Some(producer) = self.producer.take() {
            tracing::warn!("terminating pooled producer");
            drop(producer);
        }
    }
}

impl Drop for PooledProducer<'_> {
    fn drop(&mut self) {
        if let Some(producer) = self.producer.take() {
            self.pool.give_back(producer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> ProducerPool {
        // Producer creation validates configuration locally; no broker
        // connection is made until a send is attempted.
        ProducerPool::new(KafkaSettings::builder("localhost:9092").pool_size(2).build())
    }

    #[test]
    fn released_producer_is_reused() {
        let pool = pool();
        assert_eq!(pool.idle_count(), 0);

        let guard = pool.take().expect("create producer");
        drop(guard);
        assert_eq!(pool.idle_count(), 1);

        let _guard = pool.take().expect("reuse producer");
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn terminated_producer_is_not_pooled() {
        let pool = pool();
        let guard = pool.take().expect("create producer");
        guard.terminate();
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn idle_list_is_bounded() {
        let pool = pool();
        let first = pool.take().expect("create producer");
        let second = pool.take().expect("create producer");
        let third = pool.take().expect("create producer");
        drop(first);
        drop(second);
        drop(third);
        assert_eq!(pool.idle_count(), 2);
    }
}
