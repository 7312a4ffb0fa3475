use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use envconfig::Envconfig;
use rdkafka::ClientConfig;

use crate::error::KafkaClientError;
use crate::types::{PartitionSelector, TopicRef};

pub const DEFAULT_MESSAGE_MAX_BYTES: u32 = 205_000_000;
pub const DEFAULT_GROUP_ID: &str = "default";
pub const DEFAULT_TOPIC: &str = "default";

// librdkafka's accepted range for message.max.bytes
const MIN_MESSAGE_MAX_BYTES: u32 = 1_000;
const MAX_MESSAGE_MAX_BYTES: u32 = 1_000_000_000;

// receive.message.max.bytes must leave room for the protocol framing on top of fetch.max.bytes
const RECEIVE_OVERHEAD_BYTES: u32 = 512;

#[derive(Envconfig, Clone, Debug)]
pub struct KafkaConfig {
    pub kafka_hosts: String, // comma separated host:port list

    #[envconfig(default = "default")]
    pub kafka_topic: String,

    #[envconfig(default = "0")]
    pub kafka_partition: String, // non-negative index, or "any"

    #[envconfig(default = "default")]
    pub kafka_consumer_group: String,

    // Static membership: the broker keeps this member's assignment across restarts
    pub kafka_group_instance_id: Option<String>,

    #[envconfig(default = "205000000")]
    pub kafka_message_max_bytes: u32, // Applied to producers and consumers alike

    #[envconfig(default = "500")]
    pub kafka_fetch_wait_max_ms: u32,

    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String, // earliest, latest

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "5000")]
    pub kafka_metadata_timeout_ms: u64,

    #[envconfig(default = "30000")]
    pub kafka_flush_timeout_ms: u64,

    #[envconfig(default = "1000")]
    pub kafka_poll_timeout_ms: u64,

    #[envconfig(default = "10000")]
    pub kafka_committed_timeout_ms: u64,

    #[envconfig(default = "1000")]
    pub kafka_watermark_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetReset {
    #[default]
    Earliest,
    Latest,
}

impl OffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

impl fmt::Display for OffsetReset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OffsetReset {
    type Err = KafkaClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "earliest" => Ok(OffsetReset::Earliest),
            "latest" => Ok(OffsetReset::Latest),
            other => Err(KafkaClientError::InvalidConfig(format!(
                "auto.offset.reset must be earliest or latest, got {other:?}"
            ))),
        }
    }
}

/// Blocking timeouts for each kind of broker call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub metadata: Duration,
    pub flush: Duration,
    pub poll: Duration,
    pub committed: Duration,
    pub watermark: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            metadata: Duration::from_secs(5),
            flush: Duration::from_secs(30),
            poll: Duration::from_secs(1),
            committed: Duration::from_secs(10),
            watermark: Duration::from_secs(1),
        }
    }
}

/// Keys accepted by the string-keyed accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    Topic,
    Partition,
    GroupInstanceId,
}

impl FromStr for SettingKey {
    type Err = KafkaClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "topic" => Ok(SettingKey::Topic),
            "partition" => Ok(SettingKey::Partition),
            "group_instance_id" => Ok(SettingKey::GroupInstanceId),
            other => Err(KafkaClientError::UndefinedKey(other.to_string())),
        }
    }
}

/// Validated client settings. Every session builds its rdkafka configuration
/// from these on open, so changes apply to the next call.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    brokers: Vec<String>,
    topic: String,
    partition: PartitionSelector,
    group_id: String,
    group_instance_id: Option<String>,
    message_max_bytes: u32,
    fetch_wait_max_ms: u32,
    offset_reset: OffsetReset,
    tls: bool,
    timeouts: Timeouts,
    producer_options: BTreeMap<String, String>,
    consumer_options: BTreeMap<String, String>,
    topic_options: BTreeMap<String, String>,
}

impl ClientSettings {
    /// Settings with defaults for everything but the broker list.
    pub fn new(bootstrap_servers: &str) -> Result<Self, KafkaClientError> {
        let settings = Self {
            brokers: parse_brokers(bootstrap_servers),
            topic: DEFAULT_TOPIC.to_string(),
            partition: PartitionSelector::default(),
            group_id: DEFAULT_GROUP_ID.to_string(),
            group_instance_id: None,
            message_max_bytes: DEFAULT_MESSAGE_MAX_BYTES,
            fetch_wait_max_ms: 500,
            offset_reset: OffsetReset::default(),
            tls: false,
            timeouts: Timeouts::default(),
            producer_options: BTreeMap::new(),
            consumer_options: BTreeMap::new(),
            topic_options: BTreeMap::new(),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Result<Self, KafkaClientError> {
        let group_id = group_id.into();
        if group_id.trim().is_empty() {
            return Err(KafkaClientError::InvalidConfig(
                "group.id must not be empty".to_string(),
            ));
        }
        self.group_id = group_id;
        Ok(self)
    }

    pub fn with_message_max_bytes(mut self, bytes: u32) -> Result<Self, KafkaClientError> {
        self.message_max_bytes = bytes;
        self.validate()?;
        Ok(self)
    }

    pub fn with_fetch_wait_max_ms(mut self, ms: u32) -> Self {
        self.fetch_wait_max_ms = ms;
        self
    }

    pub fn with_offset_reset(mut self, policy: OffsetReset) -> Self {
        self.offset_reset = policy;
        self
    }

    pub fn with_tls(mut self, enabled: bool) -> Self {
        self.tls = enabled;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    fn validate(&self) -> Result<(), KafkaClientError> {
        if self.brokers.is_empty() {
            return Err(KafkaClientError::InvalidConfig(
                "at least one bootstrap server is required".to_string(),
            ));
        }
        if !(MIN_MESSAGE_MAX_BYTES..=MAX_MESSAGE_MAX_BYTES).contains(&self.message_max_bytes) {
            return Err(KafkaClientError::InvalidConfig(format!(
                "message.max.bytes must be within {MIN_MESSAGE_MAX_BYTES}..={MAX_MESSAGE_MAX_BYTES}, got {}",
                self.message_max_bytes
            )));
        }
        Ok(())
    }

    // ---- Accessors ----

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn set_topic(&mut self, topic: impl Into<String>) {
        self.topic = topic.into();
    }

    pub fn partition(&self) -> PartitionSelector {
        self.partition
    }

    pub fn set_partition(&mut self, partition: PartitionSelector) {
        self.partition = partition;
    }

    pub fn group_instance_id(&self) -> Option<&str> {
        self.group_instance_id.as_deref()
    }

    pub fn set_group_instance_id(&mut self, id: Option<String>) {
        self.group_instance_id = id;
    }

    /// String-keyed read of `topic`, `partition` or `group_instance_id`.
    pub fn get(&self, key: &str) -> Result<Option<String>, KafkaClientError> {
        Ok(match key.parse::<SettingKey>()? {
            SettingKey::Topic => Some(self.topic.clone()),
            SettingKey::Partition => Some(self.partition.to_string()),
            SettingKey::GroupInstanceId => self.group_instance_id.clone(),
        })
    }

    /// String-keyed write of `topic`, `partition` or `group_instance_id`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), KafkaClientError> {
        match key.parse::<SettingKey>()? {
            SettingKey::Topic => self.set_topic(value),
            SettingKey::Partition => self.set_partition(value.parse()?),
            SettingKey::GroupInstanceId => self.set_group_instance_id(Some(value.to_string())),
        }
        Ok(())
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }

    pub fn message_max_bytes(&self) -> u32 {
        self.message_max_bytes
    }

    pub fn offset_reset(&self) -> OffsetReset {
        self.offset_reset
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// The current topic/partition selection.
    pub fn topic_ref(&self) -> TopicRef {
        TopicRef::new(self.topic.clone(), self.partition)
    }

    // ---- Option maps ----

    pub fn set_producer_option(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.producer_options.insert(key.into(), value.into());
    }

    pub fn set_consumer_option(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.consumer_options.insert(key.into(), value.into());
    }

    pub fn set_topic_option(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.topic_options.insert(key.into(), value.into());
    }

    // ---- rdkafka configuration bundles ----

    pub fn producer_config(&self) -> ClientConfig {
        let mut config = self.common_config();
        config
            .set("message.max.bytes", self.message_max_bytes.to_string())
            .set("queue.buffering.max.ms", "1");

        apply(&mut config, &self.producer_options);
        apply(&mut config, &self.topic_options);
        config
    }

    pub fn consumer_config(&self) -> ClientConfig {
        let mut config = self.common_config();
        config
            .set("group.id", &self.group_id)
            .set("auto.offset.reset", self.offset_reset.as_str())
            .set("enable.partition.eof", "true")
            .set("allow.auto.create.topics", "true")
            .set("fetch.wait.max.ms", self.fetch_wait_max_ms.to_string())
            .set("message.max.bytes", self.message_max_bytes.to_string())
            .set("fetch.max.bytes", self.message_max_bytes.to_string())
            .set(
                "receive.message.max.bytes",
                (self.message_max_bytes + RECEIVE_OVERHEAD_BYTES).to_string(),
            );

        if let Some(instance_id) = &self.group_instance_id {
            config.set("group.instance.id", instance_id);
        }

        apply(&mut config, &self.consumer_options);
        apply(&mut config, &self.topic_options);

        // Offsets only move through explicit commits
        config
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false");
        config
    }

    /// Topic-level properties, kept apart from the client bundles.
    pub fn topic_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        apply(&mut config, &self.topic_options);
        config
    }

    fn common_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", self.bootstrap_servers());

        if self.tls {
            config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };
        config
    }
}

impl TryFrom<KafkaConfig> for ClientSettings {
    type Error = KafkaClientError;

    fn try_from(config: KafkaConfig) -> Result<Self, Self::Error> {
        let mut settings = ClientSettings::new(&config.kafka_hosts)?
            .with_group_id(config.kafka_consumer_group)?
            .with_message_max_bytes(config.kafka_message_max_bytes)?
            .with_fetch_wait_max_ms(config.kafka_fetch_wait_max_ms)
            .with_offset_reset(config.kafka_consumer_offset_reset.parse()?)
            .with_tls(config.kafka_tls)
            .with_timeouts(Timeouts {
                metadata: Duration::from_millis(config.kafka_metadata_timeout_ms),
                flush: Duration::from_millis(config.kafka_flush_timeout_ms),
                poll: Duration::from_millis(config.kafka_poll_timeout_ms),
                committed: Duration::from_millis(config.kafka_committed_timeout_ms),
                watermark: Duration::from_millis(config.kafka_watermark_timeout_ms),
            });

        settings.set_topic(config.kafka_topic);
        settings.set_partition(config.kafka_partition.parse()?);
        settings.set_group_instance_id(config.kafka_group_instance_id);
        Ok(settings)
    }
}

fn parse_brokers(bootstrap_servers: &str) -> Vec<String> {
    bootstrap_servers
        .split(',')
        .map(str::trim)
        .filter(|host| !host.is_empty())
        .map(str::to_string)
        .collect()
}

fn apply(config: &mut ClientConfig, options: &BTreeMap<String, String>) {
    for (key, value) in options {
        config.set(key, value);
    }
}
