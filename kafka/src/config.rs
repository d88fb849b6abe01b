//! Kafka connection settings and derived client configurations.
//!
//! One [`KafkaSettings`] value feeds every client the repository creates:
//! pooled producers, short-lived position consumers, streaming consumers and
//! the admin client used for topic lifecycle. Admin operations deliberately
//! get their own client configuration with a short timeout instead of
//! borrowing a pooled producer connection.

use rdkafka::config::ClientConfig;
use std::time::Duration;

/// Settings for every Kafka client the repository creates.
///
/// # Example
///
/// ```
/// use eventgate_kafka::KafkaSettings;
/// use std::time::Duration;
///
/// let settings = KafkaSettings::builder("localhost:9092")
///     .send_timeout(Duration::from_secs(5))
///     .replication_factor(3)
///     .build();
/// assert_eq!(settings.bootstrap_servers(), "localhost:9092");
/// ```
#[derive(Debug, Clone)]
pub struct KafkaSettings {
    bootstrap_servers: String,
    request_timeout: Duration,
    send_timeout: Duration,
    poll_timeout: Duration,
    session_timeout: Duration,
    admin_timeout: Duration,
    replication_factor: i32,
    segment_rotation: Duration,
    default_retention: Duration,
    pool_size: usize,
    acks: String,
}

impl KafkaSettings {
    /// Start building settings for the given comma-separated broker list.
    #[must_use]
    pub fn builder(bootstrap_servers: impl Into<String>) -> KafkaSettingsBuilder {
        KafkaSettingsBuilder {
            bootstrap_servers: bootstrap_servers.into(),
            request_timeout: None,
            send_timeout: None,
            poll_timeout: None,
            session_timeout: None,
            admin_timeout: None,
            replication_factor: None,
            segment_rotation: None,
            default_retention: None,
            pool_size: None,
            acks: None,
        }
    }

    /// Comma-separated broker addresses.
    #[must_use]
    pub fn bootstrap_servers(&self) -> &str {
        &self.bootstrap_servers
    }

    /// Broker-side request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Local delivery timeout for one produced record.
    #[must_use]
    pub const fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// How long a streaming consumer waits for one record.
    #[must_use]
    pub const fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    /// Timeout for admin operations (topic create/delete, metadata).
    #[must_use]
    pub const fn admin_timeout(&self) -> Duration {
        self.admin_timeout
    }

    /// Replication factor for created topics.
    #[must_use]
    pub const fn replication_factor(&self) -> i32 {
        self.replication_factor
    }

    /// Segment rotation period applied to created topics.
    #[must_use]
    pub const fn segment_rotation(&self) -> Duration {
        self.segment_rotation
    }

    /// Retention applied when the caller does not supply one.
    #[must_use]
    pub const fn default_retention(&self) -> Duration {
        self.default_retention
    }

    /// Upper bound on idle pooled producers.
    #[must_use]
    pub const fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Producer configuration for the publish path.
    #[must_use]
    pub fn producer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.bootstrap_servers)
            .set(
                "message.timeout.ms",
                self.send_timeout.as_millis().to_string(),
            )
            .set(
                "request.timeout.ms",
                self.request_timeout.as_millis().to_string(),
            )
            .set("acks", &self.acks);
        config
    }

    /// Consumer configuration for position queries and streaming reads.
    ///
    /// Consumers here never join a consumer group for load balancing;
    /// assignments are explicit. Offsets are managed by the clients, so
    /// auto-commit stays off.
    #[must_use]
    pub fn consumer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.bootstrap_servers)
            .set("group.id", "eventgate-reader")
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set(
                "session.timeout.ms",
                self.session_timeout.as_millis().to_string(),
            )
            .set("enable.partition.eof", "false");
        config
    }

    /// Admin client configuration, isolated from the producer pool.
    #[must_use]
    pub fn admin_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.bootstrap_servers)
            .set(
                "request.timeout.ms",
                self.admin_timeout.as_millis().to_string(),
            );
        config
    }
}

/// Builder for [`KafkaSettings`].
#[derive(Debug, Clone)]
pub struct KafkaSettingsBuilder {
    bootstrap_servers: String,
    request_timeout: Option<Duration>,
    send_timeout: Option<Duration>,
    poll_timeout: Option<Duration>,
    session_timeout: Option<Duration>,
    admin_timeout: Option<Duration>,
    replication_factor: Option<i32>,
    segment_rotation: Option<Duration>,
    default_retention: Option<Duration>,
    pool_size: Option<usize>,
    acks: Option<String>,
}

impl KafkaSettingsBuilder {
    /// Set the broker-side request timeout.
    ///
    /// Default: 30 seconds
    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the local delivery timeout for one produced record.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    /// Set the streaming poll timeout.
    ///
    /// Default: 500 milliseconds
    #[must_use]
    pub const fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = Some(timeout);
        self
    }

    /// Set the consumer session timeout.
    ///
    /// Default: 6 seconds
    #[must_use]
    pub const fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = Some(timeout);
        self
    }

    /// Set the admin operation timeout.
    ///
    /// Default: 10 seconds
    #[must_use]
    pub const fn admin_timeout(mut self, timeout: Duration) -> Self {
        self.admin_timeout = Some(timeout);
        self
    }

    /// Set the replication factor for created topics.
    ///
    /// Default: 1
    #[must_use]
    pub const fn replication_factor(mut self, factor: i32) -> Self {
        self.replication_factor = Some(factor);
        self
    }

    /// Set the segment rotation period for created topics.
    ///
    /// Default: 1 hour
    #[must_use]
    pub const fn segment_rotation(mut self, period: Duration) -> Self {
        self.segment_rotation = Some(period);
        self
    }

    /// Set the retention used when the caller supplies none.
    ///
    /// Default: 24 hours
    #[must_use]
    pub const fn default_retention(mut self, retention: Duration) -> Self {
        self.default_retention = Some(retention);
        self
    }

    /// Set the idle producer pool bound.
    ///
    /// Default: 4
    #[must_use]
    pub const fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = Some(size);
        self
    }

    /// Set the producer acknowledgment mode ("0", "1" or "all").
    ///
    /// Default: "1"
    #[must_use]
    pub fn acks(mut self, acks: impl Into<String>) -> Self {
        self.acks = Some(acks.into());
        self
    }

    /// Build the settings.
    #[must_use]
    pub fn build(self) -> KafkaSettings {
        KafkaSettings {
            bootstrap_servers: self.bootstrap_servers,
            request_timeout: self.request_timeout.unwrap_or(Duration::from_secs(30)),
            send_timeout: self.send_timeout.unwrap_or(Duration::from_secs(5)),
            poll_timeout: self.poll_timeout.unwrap_or(Duration::from_millis(500)),
            session_timeout: self.session_timeout.unwrap_or(Duration::from_secs(6)),
            admin_timeout: self.admin_timeout.unwrap_or(Duration::from_secs(10)),
            replication_factor: self.replication_factor.unwrap_or(1),
            segment_rotation: self.segment_rotation.unwrap_or(Duration::from_secs(3600)),
            default_retention: self
                .default_retention
                .unwrap_or(Duration::from_secs(24 * 3600)),
            pool_size: self.pool_size.unwrap_or(4),
            acks: self.acks.unwrap_or_else(|| "1".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_applied() {
        let settings = KafkaSettings::builder("localhost:9092").build();
        assert_eq!(settings.send_timeout(), Duration::from_secs(5));
        assert_eq!(settings.replication_factor(), 1);
        assert_eq!(settings.pool_size(), 4);
    }

    #[test]
    fn publish_deadline_components_are_exposed() {
        let settings = KafkaSettings::builder("localhost:9092")
            .send_timeout(Duration::from_secs(2))
            .request_timeout(Duration::from_secs(3))
            .build();
        let deadline = settings.send_timeout() + settings.request_timeout();
        assert_eq!(deadline, Duration::from_secs(5));
    }
}
