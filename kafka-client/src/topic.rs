use futures::executor::block_on;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication, TopicResult};
use rdkafka::client::DefaultClientContext;
use rdkafka::consumer::Consumer;
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use tracing::{debug, info, warn};

use crate::config::ClientSettings;
use crate::consumer::ConsumerSession;
use crate::error::KafkaClientError;

/// Whether the broker reports `name` with at least one partition.
///
/// The lookup never triggers broker-side auto creation.
pub fn topic_exists(settings: &ClientSettings, name: &str) -> Result<bool, KafkaClientError> {
    let mut config = settings.consumer_config();
    config.set("allow.auto.create.topics", "false");

    let session = ConsumerSession::open(&config, "topic lookup")?;
    let metadata = session
        .client()
        .fetch_metadata(Some(name), settings.timeouts().metadata)?;

    let exists = metadata
        .topics()
        .iter()
        .find(|t| t.name() == name)
        .map(|t| t.error().is_none() && !t.partitions().is_empty())
        .unwrap_or(false);

    debug!(topic = name, exists, "topic lookup finished");
    Ok(exists)
}

/// Creates `name` with a single partition when it does not exist yet.
pub fn create_topic(settings: &ClientSettings, name: &str) -> Result<(), KafkaClientError> {
    create_topic_with_partitions(settings, name, 1)
}

/// Creates `name` with `partitions` partitions (replication factor 1) when it
/// does not exist yet.
///
/// Another client may create the topic between the lookup and the request; the
/// broker then answers `TopicAlreadyExists`, which counts as success.
pub fn create_topic_with_partitions(
    settings: &ClientSettings,
    name: &str,
    partitions: i32,
) -> Result<(), KafkaClientError> {
    if partitions < 1 {
        return Err(KafkaClientError::InvalidConfig(format!(
            "topic {name} needs at least one partition, got {partitions}"
        )));
    }

    if topic_exists(settings, name)? {
        debug!(topic = name, "topic already exists");
        return Ok(());
    }

    let admin: AdminClient<DefaultClientContext> = settings.producer_config().create()?;
    let new_topic = NewTopic::new(name, partitions, TopicReplication::Fixed(1));
    let opts = AdminOptions::new().operation_timeout(Some(settings.timeouts().metadata));

    let results = block_on(admin.create_topics(&[new_topic], &opts))?;
    check_create_results(results, partitions)
}

fn check_create_results(
    results: Vec<TopicResult>,
    partitions: i32,
) -> Result<(), KafkaClientError> {
    for result in results {
        match result {
            Ok(topic) => info!(topic = %topic, partitions, "created topic"),
            Err((topic, RDKafkaErrorCode::TopicAlreadyExists)) => {
                warn!(topic = %topic, "topic was created concurrently");
            }
            Err((topic, code)) => {
                warn!(topic = %topic, error = %code, "failed to create topic");
                return Err(KafkaError::AdminOp(code).into());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_topics_succeed() {
        let results = vec![Ok("events".to_string()), Ok("audit".to_string())];
        assert!(check_create_results(results, 3).is_ok());
    }

    #[test]
    fn concurrent_creation_counts_as_success() {
        let results = vec![Err((
            "events".to_string(),
            RDKafkaErrorCode::TopicAlreadyExists,
        ))];
        assert!(check_create_results(results, 1).is_ok());
    }

    #[test]
    fn other_admin_errors_are_returned() {
        let results = vec![
            Ok("events".to_string()),
            Err(("audit".to_string(), RDKafkaErrorCode::InvalidReplicationFactor)),
        ];
        match check_create_results(results, 1) {
            Err(KafkaClientError::Kafka(KafkaError::AdminOp(code))) => {
                assert_eq!(code, RDKafkaErrorCode::InvalidReplicationFactor)
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn zero_partitions_are_rejected_before_any_request() {
        let settings = ClientSettings::new("localhost:9092").unwrap();
        assert!(matches!(
            create_topic_with_partitions(&settings, "events", 0),
            Err(KafkaClientError::InvalidConfig(_))
        ));
    }
}
