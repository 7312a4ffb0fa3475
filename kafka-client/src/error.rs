use std::path::PathBuf;

use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KafkaClientError {
    #[error("invalid file {}: not a regular file", path.display())]
    InvalidFile { path: PathBuf },

    #[error("undefined key: {0}")]
    UndefinedKey(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("rebalance: unknown error-code: {0}")]
    UnknownRebalance(String),

    #[error(
        "committed messages cannot be deleted directly, they are removed by the log retention policy; \
         set retention.ms or retention.bytes on the topic"
    )]
    RetentionPolicy,

    #[error("manual fetches need a concrete partition for topic {topic}")]
    PartitionRequired { topic: String },

    #[error("partition {partition} of topic {topic} holds no messages")]
    PartitionEmpty { topic: String, partition: i32 },

    #[error("invalid offset {0}: explicit offsets are non-negative and below i64::MAX")]
    InvalidOffset(i64),

    #[error("broker reported low watermark {low} above high watermark {high}")]
    InvalidWatermarks { low: i64, high: i64 },

    #[error("message of {size} bytes rejected as too large")]
    MessageTooLarge { size: usize },

    #[error("failed to deliver message to {topic}: {source}")]
    Delivery {
        topic: String,
        #[source]
        source: KafkaError,
    },

    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl KafkaClientError {
    /// Tag used in log fields.
    pub fn error_type(&self) -> &'static str {
        match self {
            KafkaClientError::InvalidFile { .. } => "invalid_file",
            KafkaClientError::UndefinedKey(_) => "undefined_key",
            KafkaClientError::InvalidConfig(_) => "invalid_config",
            KafkaClientError::UnknownRebalance(_) => "unknown_rebalance",
            KafkaClientError::RetentionPolicy => "retention_policy",
            KafkaClientError::PartitionRequired { .. } => "partition_required",
            KafkaClientError::PartitionEmpty { .. } => "partition_empty",
            KafkaClientError::InvalidOffset(_) => "invalid_offset",
            KafkaClientError::InvalidWatermarks { .. } => "invalid_watermarks",
            KafkaClientError::MessageTooLarge { .. } => "message_too_large",
            KafkaClientError::Delivery { .. } => "delivery",
            KafkaClientError::Kafka(_) => "kafka_error",
            KafkaClientError::Io(_) => "io_error",
        }
    }

    /// True when a broker call ran out of time. Callers own any retry policy.
    pub fn is_timeout(&self) -> bool {
        match self {
            KafkaClientError::Kafka(e) | KafkaClientError::Delivery { source: e, .. } => {
                is_timeout_error(e)
            }
            _ => false,
        }
    }
}

// io::Error is not Clone; it is rebuilt from its kind and message.
impl Clone for KafkaClientError {
    fn clone(&self) -> Self {
        match self {
            KafkaClientError::InvalidFile { path } => {
                KafkaClientError::InvalidFile { path: path.clone() }
            }
            KafkaClientError::UndefinedKey(key) => KafkaClientError::UndefinedKey(key.clone()),
            KafkaClientError::InvalidConfig(msg) => KafkaClientError::InvalidConfig(msg.clone()),
            KafkaClientError::UnknownRebalance(code) => {
                KafkaClientError::UnknownRebalance(code.clone())
            }
            KafkaClientError::RetentionPolicy => KafkaClientError::RetentionPolicy,
            KafkaClientError::PartitionRequired { topic } => KafkaClientError::PartitionRequired {
                topic: topic.clone(),
            },
            KafkaClientError::PartitionEmpty { topic, partition } => {
                KafkaClientError::PartitionEmpty {
                    topic: topic.clone(),
                    partition: *partition,
                }
            }
            KafkaClientError::InvalidOffset(offset) => KafkaClientError::InvalidOffset(*offset),
            KafkaClientError::InvalidWatermarks { low, high } => {
                KafkaClientError::InvalidWatermarks {
                    low: *low,
                    high: *high,
                }
            }
            KafkaClientError::MessageTooLarge { size } => {
                KafkaClientError::MessageTooLarge { size: *size }
            }
            KafkaClientError::Delivery { topic, source } => KafkaClientError::Delivery {
                topic: topic.clone(),
                source: source.clone(),
            },
            KafkaClientError::Kafka(e) => KafkaClientError::Kafka(e.clone()),
            KafkaClientError::Io(e) => {
                KafkaClientError::Io(std::io::Error::new(e.kind(), e.to_string()))
            }
        }
    }
}

pub(crate) fn is_timeout_error(e: &KafkaError) -> bool {
    matches!(
        e.rdkafka_error_code(),
        Some(
            RDKafkaErrorCode::RequestTimedOut
                | RDKafkaErrorCode::OperationTimedOut
                | RDKafkaErrorCode::MessageTimedOut
        )
    )
}

pub(crate) fn is_message_too_large(e: &KafkaError) -> bool {
    matches!(
        e.rdkafka_error_code(),
        Some(RDKafkaErrorCode::MessageSizeTooLarge)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_detected_through_the_wrapped_kafka_error() {
        let err = KafkaClientError::Kafka(KafkaError::MetadataFetch(
            RDKafkaErrorCode::OperationTimedOut,
        ));
        assert!(err.is_timeout());
        assert_eq!(err.error_type(), "kafka_error");

        let err = KafkaClientError::Delivery {
            topic: "t".to_string(),
            source: KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut),
        };
        assert!(err.is_timeout());

        let err = KafkaClientError::Kafka(KafkaError::Subscription("nope".to_string()));
        assert!(!err.is_timeout());
    }

    #[test]
    fn retention_policy_points_at_topic_retention() {
        let message = KafkaClientError::RetentionPolicy.to_string();
        assert!(message.contains("retention.ms"));
        assert!(message.contains("retention.bytes"));
    }

    #[test]
    fn clones_keep_variant_and_message() {
        let err = KafkaClientError::UnknownRebalance("-175".to_string());
        assert!(matches!(err.clone(), KafkaClientError::UnknownRebalance(code) if code == "-175"));

        let err = KafkaClientError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "locked",
        ));
        match err.clone() {
            KafkaClientError::Io(e) => {
                assert_eq!(e.kind(), std::io::ErrorKind::PermissionDenied);
                assert_eq!(e.to_string(), "locked");
            }
            other => panic!("unexpected clone {other:?}"),
        }
    }

    #[test]
    fn message_size_errors_are_recognised() {
        assert!(is_message_too_large(&KafkaError::MessageProduction(
            RDKafkaErrorCode::MessageSizeTooLarge
        )));
        assert!(!is_message_too_large(&KafkaError::MessageProduction(
            RDKafkaErrorCode::InvalidPartitions
        )));
    }
}
