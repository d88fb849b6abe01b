//! Kafka error classification for the publish path.
//!
//! Two orthogonal questions are asked about every delivery error:
//!
//! - Is it **connection-class** (timeout, transport, unknown server error)?
//!   Only these count against the broker's circuit breaker; anything else
//!   means the broker answered and the individual record was refused.
//! - Does it signal **stale producer state** (leadership moved, topic gone)?
//!   Those poison the producer, which is terminated so the pool replaces it.

use rdkafka::error::{KafkaError, RDKafkaErrorCode};

/// Whether `error` indicates the broker connection itself is unhealthy.
#[must_use]
pub fn is_connection_error(error: &KafkaError) -> bool {
    matches!(
        code_of(error),
        Some(
            RDKafkaErrorCode::MessageTimedOut
                | RDKafkaErrorCode::RequestTimedOut
                | RDKafkaErrorCode::OperationTimedOut
                | RDKafkaErrorCode::BrokerTransportFailure
                | RDKafkaErrorCode::AllBrokersDown
                | RDKafkaErrorCode::NetworkException
                | RDKafkaErrorCode::Unknown
        )
    )
}

/// Whether `error` means the producer's view of the cluster is stale.
#[must_use]
pub fn needs_reset(error: &KafkaError) -> bool {
    matches!(
        code_of(error),
        Some(
            RDKafkaErrorCode::LeaderNotAvailable
                | RDKafkaErrorCode::NotLeaderForPartition
                | RDKafkaErrorCode::UnknownTopicOrPartition
        )
    )
}

fn code_of(error: &KafkaError) -> Option<RDKafkaErrorCode> {
    match error {
        KafkaError::AdminOp(code)
        | KafkaError::ConsumerCommit(code)
        | KafkaError::Global(code)
        | KafkaError::GroupListFetch(code)
        | KafkaError::MessageConsumption(code)
        | KafkaError::MessageProduction(code)
        | KafkaError::MetadataFetch(code)
        | KafkaError::OffsetFetch(code)
        | KafkaError::SetPartitionOffset(code)
        | KafkaError::StoreOffset(code) => Some(*code),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_and_transport_count_against_the_breaker() {
        let timed_out = KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut);
        let transport = KafkaError::MessageProduction(RDKafkaErrorCode::BrokerTransportFailure);
        assert!(is_connection_error(&timed_out));
        assert!(is_connection_error(&transport));
        assert!(!needs_reset(&timed_out));
    }

    #[test]
    fn record_level_rejections_do_not() {
        let too_large = KafkaError::MessageProduction(RDKafkaErrorCode::MessageSizeTooLarge);
        let invalid = KafkaError::MessageProduction(RDKafkaErrorCode::InvalidMessage);
        assert!(!is_connection_error(&too_large));
        assert!(!is_connection_error(&invalid));
    }

    #[test]
    fn leadership_errors_poison_the_producer() {
        let moved = KafkaError::MessageProduction(RDKafkaErrorCode::NotLeaderForPartition);
        let missing = KafkaError::MessageProduction(RDKafkaErrorCode::UnknownTopicOrPartition);
        let unavailable = KafkaError::MessageProduction(RDKafkaErrorCode::LeaderNotAvailable);
        assert!(needs_reset(&moved));
        assert!(needs_reset(&missing));
        assert!(needs_reset(&unavailable));
        assert!(!is_connection_error(&moved));
    }
}
