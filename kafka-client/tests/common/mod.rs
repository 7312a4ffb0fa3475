#![allow(dead_code)]

use std::time::{Duration, Instant};

use kafka_client::{ClientSettings, KafkaClient, KafkaClientError, Timeouts};
use rdkafka::mocking::MockCluster;
use rdkafka::producer::DefaultProducerContext;
use uuid::Uuid;

pub type Cluster = MockCluster<'static, DefaultProducerContext>;

/// An in-process broker with one topic, and a client pointed at partition 0
/// of that topic under a fresh consumer group.
pub struct TestKafka {
    pub cluster: Cluster,
    pub client: KafkaClient,
    pub topic: String,
}

pub fn unique_name(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::now_v7())
}

pub fn test_settings(cluster: &Cluster) -> ClientSettings {
    // The mock answers fast; a longer poll keeps the first fetch from racing
    // the partition leader election.
    let timeouts = Timeouts {
        poll: Duration::from_secs(5),
        watermark: Duration::from_secs(5),
        ..Timeouts::default()
    };

    ClientSettings::new(&cluster.bootstrap_servers())
        .expect("valid bootstrap servers")
        .with_group_id(unique_name("group"))
        .expect("valid group id")
        .with_timeouts(timeouts)
}

pub fn start_kafka(partitions: i32) -> TestKafka {
    let cluster = MockCluster::new(1).expect("failed to create mock brokers");
    let topic = unique_name("topic");
    cluster
        .create_topic(&topic, partitions, 1)
        .expect("failed to create topic");

    let mut client = KafkaClient::new(test_settings(&cluster));
    client.set_topic(topic.clone());

    TestKafka {
        cluster,
        client,
        topic,
    }
}

/// Retries `op` until it succeeds or `deadline` elapses. Group coordination
/// takes a few round-trips on a fresh cluster.
pub fn retry_until<T>(
    deadline: Duration,
    mut op: impl FnMut() -> Result<T, KafkaClientError>,
) -> Result<T, KafkaClientError> {
    let start = Instant::now();
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if start.elapsed() >= deadline => return Err(e),
            Err(_) => std::thread::sleep(Duration::from_millis(200)),
        }
    }
}
