use std::path::Path;

use crate::config::{ClientSettings, KafkaConfig};
use crate::consumer::{self, GroupConsumer};
use crate::error::KafkaClientError;
use crate::message::{FetchBatch, Headers, Message};
use crate::offsets;
use crate::producer::{self, DeliveryReport};
use crate::topic;
use crate::types::{OffsetWindow, PartitionSelector, StartOffset};

/// Entry point for the blocking client operations.
///
/// Holds the settings and the current topic/partition selection; every call
/// opens its own short-lived session from them.
#[derive(Debug, Clone)]
pub struct KafkaClient {
    settings: ClientSettings,
}

impl KafkaClient {
    pub fn new(settings: ClientSettings) -> Self {
        Self { settings }
    }

    pub fn from_config(config: KafkaConfig) -> Result<Self, KafkaClientError> {
        Ok(Self::new(ClientSettings::try_from(config)?))
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut ClientSettings {
        &mut self.settings
    }

    pub fn topic(&self) -> &str {
        self.settings.topic()
    }

    pub fn set_topic(&mut self, topic: impl Into<String>) {
        self.settings.set_topic(topic);
    }

    pub fn partition(&self) -> PartitionSelector {
        self.settings.partition()
    }

    pub fn set_partition(&mut self, partition: PartitionSelector) {
        self.settings.set_partition(partition);
    }

    pub fn group_instance_id(&self) -> Option<&str> {
        self.settings.group_instance_id()
    }

    pub fn set_group_instance_id(&mut self, id: Option<String>) {
        self.settings.set_group_instance_id(id);
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, KafkaClientError> {
        self.settings.get(key)
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<(), KafkaClientError> {
        self.settings.set(key, value)
    }

    pub fn topic_exists(&self, name: &str) -> Result<bool, KafkaClientError> {
        topic::topic_exists(&self.settings, name)
    }

    pub fn create_topic(&self, name: &str) -> Result<(), KafkaClientError> {
        topic::create_topic(&self.settings, name)
    }

    pub fn create_topic_with_partitions(
        &self,
        name: &str,
        partitions: i32,
    ) -> Result<(), KafkaClientError> {
        topic::create_topic_with_partitions(&self.settings, name, partitions)
    }

    pub fn produce(
        &self,
        payload: &[u8],
        headers: &Headers,
    ) -> Result<DeliveryReport, KafkaClientError> {
        producer::produce(&self.settings, payload, headers)
    }

    pub fn produce_file(&self, path: impl AsRef<Path>) -> Result<DeliveryReport, KafkaClientError> {
        producer::produce_file(&self.settings, path.as_ref())
    }

    pub fn commit(&self, message: &Message) -> Result<(), KafkaClientError> {
        offsets::commit(&self.settings, message)
    }

    pub fn committed_offset(&self) -> Result<Option<i64>, KafkaClientError> {
        offsets::committed_offset(&self.settings)
    }

    pub fn watermark_offsets(&self) -> Result<OffsetWindow, KafkaClientError> {
        offsets::watermark_offsets(&self.settings)
    }

    pub fn get_messages(
        &self,
        count: usize,
        from_offset: StartOffset,
    ) -> Result<FetchBatch, KafkaClientError> {
        consumer::get_messages(&self.settings, count, from_offset)
    }

    pub fn get_message(&self, from_offset: StartOffset) -> Result<FetchBatch, KafkaClientError> {
        consumer::get_message(&self.settings, from_offset)
    }

    pub fn get_very_first_message(&self) -> Result<Message, KafkaClientError> {
        consumer::get_very_first_message(&self.settings)
    }

    pub fn delete_message(&self, message: &Message) -> Result<(), KafkaClientError> {
        offsets::delete_message(message)
    }

    pub fn subscribe(&self) -> Result<GroupConsumer, KafkaClientError> {
        GroupConsumer::subscribe(&self.settings)
    }
}
