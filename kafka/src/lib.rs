//! # Eventgate Kafka
//!
//! Kafka-backed implementation of the Eventgate topic repository.
//!
//! This crate owns every rdkafka touchpoint of the broker frontend:
//!
//! - [`KafkaTopicRepository`]: topic lifecycle via the admin client,
//!   partition bounds via watermark queries, cursor validation, the
//!   synchronous batch publish path and consumer creation;
//! - [`ProducerPool`]: bounded free-list of producers with guard-based
//!   release and termination of poisoned instances;
//! - [`KafkaEventConsumer`]: streaming consumer over a fixed, seeded
//!   partition assignment;
//! - [`classify`]: the error taxonomy the publish path feeds the
//!   per-broker circuit breakers with.
//!
//! # Example
//!
//! ```no_run
//! use eventgate_kafka::{KafkaSettings, KafkaTopicRepository};
//! use eventgate_runtime::circuit_breaker::CircuitBreakerConfig;
//!
//! let settings = KafkaSettings::builder("localhost:9092").build();
//! let repository = KafkaTopicRepository::new(settings, CircuitBreakerConfig::default());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod classify;
pub mod config;
pub mod consumer;
pub mod pool;
pub mod repository;

pub use config::{KafkaSettings, KafkaSettingsBuilder};
pub use consumer::{ConsumerSeed, KafkaEventConsumer};
pub use pool::{PooledProducer, ProducerPool};
pub use repository::KafkaTopicRepository;
