use std::fmt;
use std::str::FromStr;

use rdkafka::topic_partition_list::TopicPartitionListElem;
use rdkafka::Offset;

use crate::error::KafkaClientError;

/// Partition placement for produce and fetch calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PartitionSelector {
    /// Let librdkafka place the message (by key, or round-robin without one).
    Any,
    /// Pin to one partition.
    Index(i32),
}

impl PartitionSelector {
    pub fn index(self) -> Option<i32> {
        match self {
            PartitionSelector::Any => None,
            PartitionSelector::Index(partition) => Some(partition),
        }
    }
}

impl Default for PartitionSelector {
    fn default() -> Self {
        PartitionSelector::Index(0)
    }
}

impl fmt::Display for PartitionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionSelector::Any => write!(f, "any"),
            PartitionSelector::Index(partition) => write!(f, "{partition}"),
        }
    }
}

impl FromStr for PartitionSelector {
    type Err = KafkaClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("any") {
            return Ok(PartitionSelector::Any);
        }
        match s.parse::<i32>() {
            Ok(partition) if partition >= 0 => Ok(PartitionSelector::Index(partition)),
            _ => Err(KafkaClientError::InvalidConfig(format!(
                "partition must be a non-negative integer or \"any\", got {s:?}"
            ))),
        }
    }
}

/// Topic plus partition selection for a single produce or consume call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicRef {
    topic: String,
    partition: PartitionSelector,
}

impl TopicRef {
    pub fn new(topic: impl Into<String>, partition: PartitionSelector) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }

    pub fn pinned(topic: impl Into<String>, partition: i32) -> Self {
        Self::new(topic, PartitionSelector::Index(partition))
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> PartitionSelector {
        self.partition
    }

    /// The concrete partition, required by manual cursors and offset queries.
    pub fn require_partition(&self) -> Result<i32, KafkaClientError> {
        self.partition
            .index()
            .ok_or_else(|| KafkaClientError::PartitionRequired {
                topic: self.topic.clone(),
            })
    }
}

impl fmt::Display for TopicRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.partition)
    }
}

impl From<TopicPartitionListElem<'_>> for TopicRef {
    fn from(elem: TopicPartitionListElem<'_>) -> Self {
        Self::pinned(elem.topic(), elem.partition())
    }
}

/// Where a manual cursor starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartOffset {
    Beginning,
    End,
    /// The group's committed offset, falling back to `auto.offset.reset`.
    #[default]
    Stored,
    Offset(i64),
}

impl TryFrom<StartOffset> for Offset {
    type Error = KafkaClientError;

    /// Negative explicit offsets would be read by librdkafka as its logical
    /// sentinels (-2 is the beginning), so they are rejected.
    fn try_from(start: StartOffset) -> Result<Self, Self::Error> {
        Ok(match start {
            StartOffset::Beginning => Offset::Beginning,
            StartOffset::End => Offset::End,
            StartOffset::Stored => Offset::Stored,
            StartOffset::Offset(offset) if offset < 0 => {
                return Err(KafkaClientError::InvalidOffset(offset))
            }
            StartOffset::Offset(offset) => Offset::Offset(offset),
        })
    }
}

/// Low and high watermarks of a partition. `high` is one past the last
/// produced offset, so `low == high` means nothing is retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetWindow {
    low: i64,
    high: i64,
}

impl OffsetWindow {
    /// Fails when `low > high`, which no healthy broker reports.
    pub fn new(low: i64, high: i64) -> Result<Self, KafkaClientError> {
        if low > high {
            return Err(KafkaClientError::InvalidWatermarks { low, high });
        }
        Ok(Self { low, high })
    }

    pub fn low(&self) -> i64 {
        self.low
    }

    pub fn high(&self) -> i64 {
        self.high
    }

    pub fn is_empty(&self) -> bool {
        self.low == self.high
    }

    /// Number of retained offsets.
    pub fn len(&self) -> i64 {
        self.high - self.low
    }
}
