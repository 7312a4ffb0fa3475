//! Consumer sessions.
//!
//! Two access modes are offered:
//! - a manual cursor (`get_messages`, `get_message`, `get_very_first_message`)
//!   that assigns one partition at a caller-chosen offset without joining the
//!   consumer group, used for bounded and historical reads;
//! - a group-managed [`GroupConsumer`] whose partitions are handed out by the
//!   group coordinator through the rebalance context.
//!
//! Each call opens a fresh `BaseConsumer` and releases it before returning.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer, ConsumerContext, DefaultConsumerContext};
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, info, warn};

use crate::config::{ClientSettings, Timeouts};
use crate::error::KafkaClientError;
use crate::message::{FetchBatch, Message, PollOutcome};
use crate::offsets::commit_message;
use crate::rebalance::{self, GroupContext, RebalanceHandler, Shutdown};
use crate::types::{StartOffset, TopicRef};

/// A consumer handle that unsubscribes when dropped. librdkafka closes the
/// handle itself once the inner `BaseConsumer` goes away, so every exit path
/// releases group membership and connections.
pub(crate) struct ConsumerSession<C = DefaultConsumerContext>
where
    C: ConsumerContext + 'static,
{
    consumer: BaseConsumer<C>,
    purpose: &'static str,
}

impl ConsumerSession<DefaultConsumerContext> {
    pub(crate) fn open(
        config: &ClientConfig,
        purpose: &'static str,
    ) -> Result<Self, KafkaClientError> {
        debug!("rdkafka configuration for {}: {:?}", purpose, config);
        let consumer: BaseConsumer = config.create()?;
        Ok(Self { consumer, purpose })
    }
}

impl<C> Deref for ConsumerSession<C>
where
    C: ConsumerContext + 'static,
{
    type Target = BaseConsumer<C>;

    fn deref(&self) -> &Self::Target {
        &self.consumer
    }
}

impl<C> Drop for ConsumerSession<C>
where
    C: ConsumerContext + 'static,
{
    fn drop(&mut self) {
        self.consumer.unsubscribe();
        debug!(purpose = self.purpose, "consumer session closed");
    }
}

/// One partition assigned at a starting offset. Dropping the cursor stops it
/// by assigning the empty set.
struct ManualCursor<'a> {
    consumer: &'a BaseConsumer,
    topic: &'a str,
    partition: i32,
}

impl<'a> ManualCursor<'a> {
    fn start(
        consumer: &'a BaseConsumer,
        topic: &'a str,
        partition: i32,
        from_offset: Offset,
    ) -> Result<Self, KafkaClientError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(topic, partition, from_offset)?;
        consumer.assign(&tpl)?;
        debug!(topic, partition, ?from_offset, "manual cursor started");
        Ok(Self {
            consumer,
            topic,
            partition,
        })
    }

    fn poll(&self, timeout: Duration) -> Result<PollOutcome, KafkaClientError> {
        Ok(PollOutcome::from_poll(self.consumer.poll(timeout))?)
    }
}

impl Drop for ManualCursor<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.consumer.assign(&TopicPartitionList::new()) {
            warn!(
                topic = self.topic,
                partition = self.partition,
                error = %e,
                "failed to stop manual cursor"
            );
        }
    }
}

/// Reads up to `count` messages (`0` = until the end of the partition) from
/// the configured topic/partition, starting at `from_offset`.
///
/// The fetch stops with `eof = true` as soon as a poll comes back empty or
/// reports the end of the partition.
pub fn get_messages(
    settings: &ClientSettings,
    count: usize,
    from_offset: StartOffset,
) -> Result<FetchBatch, KafkaClientError> {
    let target = settings.topic_ref();
    let partition = target.require_partition()?;
    let start = Offset::try_from(from_offset)?;

    let session = ConsumerSession::open(&settings.consumer_config(), "manual fetch")?;
    let cursor = ManualCursor::start(&session, target.topic(), partition, start)?;

    let mut batch = FetchBatch::starting_at(from_offset);
    while count == 0 || batch.len() < count {
        match cursor.poll(settings.timeouts().poll)? {
            PollOutcome::Message(message) => batch.push(message),
            outcome => {
                debug!(topic = target.topic(), partition, ?outcome, "fetch reached end");
                batch.eof = true;
                break;
            }
        }
    }

    info!(
        topic = target.topic(),
        partition,
        fetched = batch.len(),
        eof = batch.eof,
        to_offset = ?batch.to_offset,
        "manual fetch finished"
    );
    Ok(batch)
}

/// Single-message variant of [`get_messages`].
pub fn get_message(
    settings: &ClientSettings,
    from_offset: StartOffset,
) -> Result<FetchBatch, KafkaClientError> {
    get_messages(settings, 1, from_offset)
}

/// The first message still retained by the configured partition.
pub fn get_very_first_message(settings: &ClientSettings) -> Result<Message, KafkaClientError> {
    let target = settings.topic_ref();
    let partition = target.require_partition()?;

    get_message(settings, StartOffset::Beginning)?
        .messages
        .into_iter()
        .next()
        .ok_or_else(|| KafkaClientError::PartitionEmpty {
            topic: target.topic().to_string(),
            partition,
        })
}

/// Group-managed consumer subscribed to the configured topic.
///
/// Partition ownership follows the coordinator through [`GroupContext`].
/// Offsets are never committed automatically: call [`GroupConsumer::commit`]
/// once a message is fully processed.
pub struct GroupConsumer {
    consumer: BaseConsumer<GroupContext>,
    handler: Arc<RebalanceHandler>,
    topic: String,
    timeouts: Timeouts,
}

impl GroupConsumer {
    pub fn subscribe(settings: &ClientSettings) -> Result<Self, KafkaClientError> {
        let topic = settings.topic().to_string();
        let handler = Arc::new(RebalanceHandler::new());

        let config = settings.consumer_config();
        debug!("rdkafka configuration: {:?}", config);
        let consumer: BaseConsumer<GroupContext> =
            config.create_with_context(GroupContext::new(handler.clone()))?;
        consumer.subscribe(&[topic.as_str()])?;

        info!(
            topic = %topic,
            group_id = settings.group_id(),
            group_instance_id = ?settings.group_instance_id(),
            "subscribed to topic"
        );

        Ok(Self {
            consumer,
            handler,
            topic,
            timeouts: *settings.timeouts(),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Polls with the configured poll timeout.
    pub fn poll(&self) -> Result<PollOutcome, KafkaClientError> {
        self.poll_timeout(self.timeouts.poll)
    }

    /// Polls once. Rebalance callbacks run inside the poll. Once one of them
    /// has failed, every later poll and commit returns that failure and the
    /// session should be shut down.
    ///
    /// A message returned by the poll that recorded the failure is still
    /// handed out; committing it is refused.
    pub fn poll_timeout(&self, timeout: Duration) -> Result<PollOutcome, KafkaClientError> {
        self.check_rebalance()?;
        Ok(PollOutcome::from_poll(self.consumer.poll(timeout))?)
    }

    fn check_rebalance(&self) -> Result<(), KafkaClientError> {
        match self.consumer.context().failure() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// True once a rebalance failure has made the session unusable.
    pub fn has_failed(&self) -> bool {
        self.consumer.context().has_failed()
    }

    /// Commits `message.offset() + 1` synchronously.
    pub fn commit(&self, message: &Message) -> Result<(), KafkaClientError> {
        if let Err(e) = self.check_rebalance() {
            warn!(
                topic = message.topic(),
                partition = message.partition(),
                offset = message.offset(),
                "not committing after a fatal rebalance failure"
            );
            return Err(e);
        }
        commit_message(&self.consumer, message)
    }

    pub fn owned_partitions(&self) -> Vec<TopicRef> {
        self.handler.owned_partitions()
    }

    /// Optionally commits the current positions, then unsubscribes and closes.
    pub fn shutdown(self, commit: bool) -> Result<Shutdown, KafkaClientError> {
        rebalance::shutdown(self.consumer, commit)
    }
}

#[cfg(test)]
mod tests {
    use rdkafka::mocking::MockCluster;

    use super::*;
    use crate::types::PartitionSelector;

    #[test]
    fn rebalance_failure_stays_fatal_until_shutdown() {
        let cluster = MockCluster::new(1).expect("failed to create mock brokers");
        cluster
            .create_topic("sticky-failure", 1, 1)
            .expect("failed to create topic");

        let mut settings = ClientSettings::new(&cluster.bootstrap_servers())
            .unwrap()
            .with_group_id("sticky-failure-group")
            .unwrap();
        settings.set_topic("sticky-failure");

        let consumer = GroupConsumer::subscribe(&settings).expect("subscribe failed");
        assert!(!consumer.has_failed());
        consumer
            .consumer
            .context()
            .record_failure(KafkaClientError::UnknownRebalance("-175".to_string()));

        for _ in 0..3 {
            match consumer.poll_timeout(Duration::from_millis(100)) {
                Err(KafkaClientError::UnknownRebalance(code)) => assert_eq!(code, "-175"),
                other => panic!("session kept polling: {other:?}"),
            }
        }
        assert!(consumer.has_failed());

        let message = Message::new("sticky-failure", 0, 0, b"late".to_vec());
        assert!(matches!(
            consumer.commit(&message),
            Err(KafkaClientError::UnknownRebalance(_))
        ));

        consumer.shutdown(false).expect("shutdown failed");
    }

    #[test]
    fn negative_start_offsets_fail_before_connecting() {
        let mut settings = ClientSettings::new("localhost:1").unwrap();
        settings.set_partition(PartitionSelector::Index(0));

        match get_messages(&settings, 1, StartOffset::Offset(-2)) {
            Err(KafkaClientError::InvalidOffset(offset)) => assert_eq!(offset, -2),
            other => panic!("unexpected result {other:?}"),
        }
    }
}
