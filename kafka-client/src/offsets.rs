use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, ConsumerContext};
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, info, warn};

use crate::config::ClientSettings;
use crate::consumer::ConsumerSession;
use crate::error::KafkaClientError;
use crate::message::Message;
use crate::metrics_consts::OFFSET_COMMITS_COUNTER;
use crate::types::OffsetWindow;

/// Commits `message.offset() + 1` for the message's partition, joining the
/// group on the message's topic first.
///
/// A consumer that has not finished joining may see the broker reject the
/// commit; the error is returned as-is and the caller decides whether to retry.
pub fn commit(settings: &ClientSettings, message: &Message) -> Result<(), KafkaClientError> {
    let session = ConsumerSession::open(&settings.consumer_config(), "commit")?;
    session.subscribe(&[message.topic()])?;
    commit_message(&*session, message)
}

pub(crate) fn commit_message<C: ConsumerContext>(
    consumer: &BaseConsumer<C>,
    message: &Message,
) -> Result<(), KafkaClientError> {
    let next = next_offset(message)?;

    let mut tpl = TopicPartitionList::new();
    tpl.add_partition_offset(message.topic(), message.partition(), Offset::Offset(next))?;

    consumer.commit(&tpl, CommitMode::Sync).map_err(|e| {
        warn!(
            topic = message.topic(),
            partition = message.partition(),
            offset = next,
            error = %e,
            "commit rejected"
        );
        metrics::counter!(OFFSET_COMMITS_COUNTER, "outcome" => "failure").increment(1);
        KafkaClientError::from(e)
    })?;
    metrics::counter!(OFFSET_COMMITS_COUNTER, "outcome" => "success").increment(1);

    debug!(
        topic = message.topic(),
        partition = message.partition(),
        offset = next,
        "committed offset"
    );
    Ok(())
}

/// The offset to commit after `message`: the next one to read.
fn next_offset(message: &Message) -> Result<i64, KafkaClientError> {
    let offset = message.offset();
    if offset < 0 {
        return Err(KafkaClientError::InvalidOffset(offset));
    }
    offset
        .checked_add(1)
        .ok_or(KafkaClientError::InvalidOffset(offset))
}

/// The group's committed offset for the configured partition, or `None` when
/// the group has never committed there.
pub fn committed_offset(settings: &ClientSettings) -> Result<Option<i64>, KafkaClientError> {
    let target = settings.topic_ref();
    let partition = target.require_partition()?;

    let session = ConsumerSession::open(&settings.consumer_config(), "committed offset")?;

    let mut tpl = TopicPartitionList::new();
    tpl.add_partition(target.topic(), partition);
    let committed = session.committed_offsets(tpl, settings.timeouts().committed)?;

    let offset = committed
        .find_partition(target.topic(), partition)
        .and_then(|elem| match elem.offset() {
            Offset::Offset(offset) => Some(offset),
            _ => None,
        });

    info!(
        topic = target.topic(),
        partition,
        group_id = settings.group_id(),
        committed = ?offset,
        "fetched committed offset"
    );
    Ok(offset)
}

/// Low and high watermarks of the configured partition.
pub fn watermark_offsets(settings: &ClientSettings) -> Result<OffsetWindow, KafkaClientError> {
    let target = settings.topic_ref();
    let partition = target.require_partition()?;

    let session = ConsumerSession::open(&settings.consumer_config(), "watermarks")?;
    let (low, high) =
        session.fetch_watermarks(target.topic(), partition, settings.timeouts().watermark)?;

    debug!(topic = target.topic(), partition, low, high, "fetched watermarks");
    OffsetWindow::new(low, high)
}

/// Messages leave a partition only through the topic's retention policy.
pub fn delete_message(message: &Message) -> Result<(), KafkaClientError> {
    warn!(
        topic = message.topic(),
        partition = message.partition(),
        offset = message.offset(),
        "refusing to delete a committed message"
    );
    Err(KafkaClientError::RetentionPolicy)
}

#[cfg(test)]
mod tests {
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};
    use rdkafka::mocking::MockCluster;

    use super::*;
    use crate::types::PartitionSelector;

    #[test]
    fn next_offset_rejects_sentinels_and_overflow() {
        let at = |offset| Message::new("events", 0, offset, Vec::new());

        assert_eq!(next_offset(&at(0)).unwrap(), 1);
        assert_eq!(next_offset(&at(41)).unwrap(), 42);
        assert!(matches!(
            next_offset(&at(-1)),
            Err(KafkaClientError::InvalidOffset(-1))
        ));
        assert!(matches!(
            next_offset(&at(i64::MAX)),
            Err(KafkaClientError::InvalidOffset(i64::MAX))
        ));
    }

    #[test]
    fn commits_are_counted_by_outcome() {
        let cluster = MockCluster::new(1).expect("failed to create mock brokers");
        cluster
            .create_topic("counted-commits", 1, 1)
            .expect("failed to create topic");
        let settings = ClientSettings::new(&cluster.bootstrap_servers())
            .unwrap()
            .with_group_id("counted-commits-group")
            .unwrap();

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let session = ConsumerSession::open(&settings.consumer_config(), "test").unwrap();
        let message = Message::new("counted-commits", 0, 4, b"x".to_vec());

        // The mock may accept or reject a commit from a member outside the group;
        // either way exactly one commit is counted.
        let result =
            metrics::with_local_recorder(&recorder, || commit_message(&*session, &message));

        let counted: Vec<(String, u64)> = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .filter(|(key, _, _, _)| key.key().name() == OFFSET_COMMITS_COUNTER)
            .filter_map(|(key, _, _, value)| match value {
                DebugValue::Counter(n) if n > 0 => {
                    let outcome = key.key().labels().next()?.value().to_string();
                    Some((outcome, n))
                }
                _ => None,
            })
            .collect();

        let expected = if result.is_ok() { "success" } else { "failure" };
        assert_eq!(counted, vec![(expected.to_string(), 1)]);
    }

    #[test]
    fn delete_is_always_refused() {
        let message = Message::new("events", 0, 12, b"payload".to_vec());
        assert!(matches!(
            delete_message(&message),
            Err(KafkaClientError::RetentionPolicy)
        ));
    }

    #[test]
    fn offset_queries_need_a_concrete_partition() {
        let mut settings = ClientSettings::new("localhost:9092").unwrap();
        settings.set_topic("events");
        settings.set_partition(PartitionSelector::Any);

        assert!(matches!(
            watermark_offsets(&settings),
            Err(KafkaClientError::PartitionRequired { .. })
        ));
        assert!(matches!(
            committed_offset(&settings),
            Err(KafkaClientError::PartitionRequired { .. })
        ));
    }
}
