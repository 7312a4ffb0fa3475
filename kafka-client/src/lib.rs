pub mod client;
pub mod config;
pub mod consumer;
pub mod error;
pub mod message;
pub mod metrics_consts;
pub mod offsets;
pub mod producer;
pub mod rebalance;
pub mod topic;
pub mod types;

pub use client::KafkaClient;
pub use config::{ClientSettings, KafkaConfig, OffsetReset, SettingKey, Timeouts};
pub use consumer::GroupConsumer;
pub use error::KafkaClientError;
pub use message::{FetchBatch, Headers, Message, PollOutcome};
pub use producer::DeliveryReport;
pub use rebalance::{PartitionAssigner, RebalanceEvent, RebalanceHandler, Shutdown};
pub use types::{OffsetWindow, PartitionSelector, StartOffset, TopicRef};
