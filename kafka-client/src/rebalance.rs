use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance};
use rdkafka::error::KafkaResult;
use rdkafka::{ClientContext, Offset, TopicPartitionList};
use tracing::{debug, error, info, warn};

use crate::error::KafkaClientError;
use crate::metrics_consts::{OFFSET_COMMITS_COUNTER, REBALANCE_EVENTS_COUNTER};
use crate::types::TopicRef;

/// Notification from the group coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebalanceEvent {
    Assigned(Vec<TopicRef>),
    Revoked,
    Error(String),
}

impl From<&Rebalance<'_>> for RebalanceEvent {
    fn from(rebalance: &Rebalance<'_>) -> Self {
        match rebalance {
            Rebalance::Assign(tpl) => {
                RebalanceEvent::Assigned(tpl.elements().into_iter().map(TopicRef::from).collect())
            }
            Rebalance::Revoke(_) => RebalanceEvent::Revoked,
            Rebalance::Error(e) => RebalanceEvent::Error(e.to_string()),
        }
    }
}

/// Takes ownership of a set of partitions. An empty slice releases everything.
pub trait PartitionAssigner {
    fn assign_partitions(&self, partitions: &[TopicRef]) -> Result<(), KafkaClientError>;
}

impl<C: ConsumerContext> PartitionAssigner for BaseConsumer<C> {
    fn assign_partitions(&self, partitions: &[TopicRef]) -> Result<(), KafkaClientError> {
        let mut tpl = TopicPartitionList::new();
        for partition in partitions {
            tpl.add_partition(partition.topic(), partition.require_partition()?);
        }

        // librdkafka has usually applied the coordinator's assignment already
        if let Ok(current) = self.assignment() {
            if same_partitions(&current, &tpl) {
                debug!(
                    partitions = tpl.count(),
                    "assignment already current, skipping assign"
                );
                return Ok(());
            }
        }

        self.assign(&tpl)?;
        Ok(())
    }
}

fn same_partitions(a: &TopicPartitionList, b: &TopicPartitionList) -> bool {
    let as_set = |tpl: &TopicPartitionList| -> BTreeSet<(String, i32)> {
        tpl.elements()
            .iter()
            .map(|e| (e.topic().to_string(), e.partition()))
            .collect()
    };
    as_set(a) == as_set(b)
}

/// Tracks partition ownership across rebalances.
///
/// `Assigned` hands exactly the given partitions to the consumer, `Revoked`
/// releases all of them, and an error code from the coordinator is fatal for
/// the session.
#[derive(Debug, Default)]
pub struct RebalanceHandler {
    owned: Mutex<BTreeSet<TopicRef>>,
}

impl RebalanceHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle<A>(&self, assigner: &A, event: RebalanceEvent) -> Result<(), KafkaClientError>
    where
        A: PartitionAssigner + ?Sized,
    {
        match event {
            RebalanceEvent::Assigned(partitions) => {
                info!(partitions = partitions.len(), "rebalance: assign");
                metrics::counter!(REBALANCE_EVENTS_COUNTER, "event_type" => "assign")
                    .increment(1);
                assigner.assign_partitions(&partitions)?;
                *self.owned() = partitions.into_iter().collect();
            }
            RebalanceEvent::Revoked => {
                info!("rebalance: revoke");
                metrics::counter!(REBALANCE_EVENTS_COUNTER, "event_type" => "revoke")
                    .increment(1);
                assigner.assign_partitions(&[])?;
                self.owned().clear();
            }
            RebalanceEvent::Error(code) => {
                error!(code, "rebalance: unknown error-code");
                metrics::counter!(REBALANCE_EVENTS_COUNTER, "event_type" => "error")
                    .increment(1);
                return Err(KafkaClientError::UnknownRebalance(code));
            }
        }
        Ok(())
    }

    pub fn owned_partitions(&self) -> Vec<TopicRef> {
        self.owned().iter().cloned().collect()
    }

    pub fn owns(&self, partition: &TopicRef) -> bool {
        self.owned().contains(partition)
    }

    fn owned(&self) -> MutexGuard<'_, BTreeSet<TopicRef>> {
        self.owned.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// rdkafka consumer context for group-managed sessions.
///
/// Rebalance callbacks run from inside `poll`, on the polling thread. The
/// first failure is fatal: it stays recorded for the rest of the session and
/// is reported by every later poll and commit.
pub struct GroupContext {
    handler: Arc<RebalanceHandler>,
    failure: Mutex<Option<KafkaClientError>>,
}

impl GroupContext {
    pub fn new(handler: Arc<RebalanceHandler>) -> Self {
        Self {
            handler,
            failure: Mutex::new(None),
        }
    }

    pub fn handler(&self) -> &Arc<RebalanceHandler> {
        &self.handler
    }

    /// The fatal failure of this session, if any. Reading it does not clear it.
    pub fn failure(&self) -> Option<KafkaClientError> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn has_failed(&self) -> bool {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub(crate) fn record_failure(&self, e: KafkaClientError) {
        let mut failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        if failure.is_none() {
            *failure = Some(e);
        }
    }
}

impl ClientContext for GroupContext {}

impl ConsumerContext for GroupContext {
    fn pre_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        debug!("Pre-rebalance event: {:?}", rebalance);
    }

    fn post_rebalance(&self, base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        debug!("Post-rebalance event: {:?}", rebalance);

        if let Err(e) = self
            .handler
            .handle(base_consumer, RebalanceEvent::from(rebalance))
        {
            error!(error = %e, "rebalance handling failed");
            self.record_failure(e);
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        match result {
            Ok(_) => {
                debug!("Committed offsets for {} partitions", offsets.count());
            }
            Err(e) => {
                warn!("Failed to commit offsets: {}", e);
            }
        }
    }
}

/// Outcome of [`shutdown`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shutdown {
    /// Partitions whose position was committed, zero when commit was not requested.
    pub committed_partitions: usize,
}

/// Closes a group consumer: commits the current positions when `commit` is
/// set, then always unsubscribes and closes. Terminating the process is left
/// to the caller.
pub fn shutdown<C: ConsumerContext>(
    consumer: BaseConsumer<C>,
    commit: bool,
) -> Result<Shutdown, KafkaClientError> {
    info!(commit, "shutting down consumer (unsubscribe, close)");

    let committed = if commit {
        commit_positions(&consumer)
    } else {
        debug!("no commit requested");
        Ok(0)
    };

    consumer.unsubscribe();
    drop(consumer);

    let committed_partitions = committed?;
    info!(committed_partitions, "consumer closed");
    Ok(Shutdown {
        committed_partitions,
    })
}

fn commit_positions<C: ConsumerContext>(
    consumer: &BaseConsumer<C>,
) -> Result<usize, KafkaClientError> {
    let positions = consumer.position()?;

    let mut tpl = TopicPartitionList::new();
    for elem in positions.elements() {
        if let Offset::Offset(offset) = elem.offset() {
            tpl.add_partition_offset(elem.topic(), elem.partition(), Offset::Offset(offset))?;
        }
    }

    if tpl.count() == 0 {
        debug!("no consumed positions to commit");
        return Ok(0);
    }

    if let Err(e) = consumer.commit(&tpl, CommitMode::Sync) {
        metrics::counter!(OFFSET_COMMITS_COUNTER, "outcome" => "failure").increment(1);
        return Err(e.into());
    }
    metrics::counter!(OFFSET_COMMITS_COUNTER, "outcome" => "success").increment(1);
    Ok(tpl.count())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};

    use super::*;

    fn rebalance_events(snapshotter: &Snapshotter, event_type: &str) -> u64 {
        snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .filter(|(key, _, _, _)| {
                key.key().name() == REBALANCE_EVENTS_COUNTER
                    && key
                        .key()
                        .labels()
                        .any(|l| l.key() == "event_type" && l.value() == event_type)
            })
            .map(|(_, _, _, value)| match value {
                DebugValue::Counter(n) => n,
                _ => 0,
            })
            .sum()
    }

    #[derive(Default)]
    struct RecordingAssigner {
        calls: Mutex<Vec<Vec<TopicRef>>>,
    }

    impl PartitionAssigner for RecordingAssigner {
        fn assign_partitions(&self, partitions: &[TopicRef]) -> Result<(), KafkaClientError> {
            self.calls.lock().unwrap().push(partitions.to_vec());
            Ok(())
        }
    }

    struct FailingAssigner;

    impl PartitionAssigner for FailingAssigner {
        fn assign_partitions(&self, _partitions: &[TopicRef]) -> Result<(), KafkaClientError> {
            Err(KafkaClientError::Kafka(
                rdkafka::error::KafkaError::Subscription("broker gone".to_string()),
            ))
        }
    }

    fn p(partition: i32) -> TopicRef {
        TopicRef::pinned("events", partition)
    }

    #[test]
    fn assign_then_revoke_moves_ownership() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let handler = RebalanceHandler::new();
        let assigner = RecordingAssigner::default();

        metrics::with_local_recorder(&recorder, || {
            handler
                .handle(&assigner, RebalanceEvent::Assigned(vec![p(0), p(1)]))
                .unwrap();
            assert_eq!(handler.owned_partitions(), vec![p(0), p(1)]);
            assert!(handler.owns(&p(1)));

            handler.handle(&assigner, RebalanceEvent::Revoked).unwrap();
            assert!(handler.owned_partitions().is_empty());
        });

        let calls = assigner.calls.lock().unwrap();
        assert_eq!(*calls, vec![vec![p(0), p(1)], vec![]]);
        assert_eq!(rebalance_events(&snapshotter, "assign"), 1);
        assert_eq!(rebalance_events(&snapshotter, "revoke"), 1);
        assert_eq!(rebalance_events(&snapshotter, "error"), 0);
    }

    #[test]
    fn new_assignment_replaces_the_previous_one() {
        let handler = RebalanceHandler::new();
        let assigner = RecordingAssigner::default();

        handler
            .handle(&assigner, RebalanceEvent::Assigned(vec![p(0), p(1)]))
            .unwrap();
        handler
            .handle(&assigner, RebalanceEvent::Assigned(vec![p(2)]))
            .unwrap();

        assert_eq!(handler.owned_partitions(), vec![p(2)]);
        assert!(!handler.owns(&p(0)));
    }

    #[test]
    fn unknown_error_code_is_fatal() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let handler = RebalanceHandler::new();
        let assigner = RecordingAssigner::default();

        let result = metrics::with_local_recorder(&recorder, || {
            handler
                .handle(&assigner, RebalanceEvent::Assigned(vec![p(0)]))
                .unwrap();
            handler.handle(&assigner, RebalanceEvent::Error("-175".to_string()))
        });
        match result {
            Err(KafkaClientError::UnknownRebalance(code)) => assert_eq!(code, "-175"),
            other => panic!("unexpected result {other:?}"),
        }

        // ownership is left untouched and no assign was attempted
        assert_eq!(handler.owned_partitions(), vec![p(0)]);
        assert_eq!(assigner.calls.lock().unwrap().len(), 1);
        assert_eq!(rebalance_events(&snapshotter, "error"), 1);
    }

    #[test]
    fn failed_assign_keeps_previous_ownership() {
        let handler = RebalanceHandler::new();
        handler
            .handle(&RecordingAssigner::default(), RebalanceEvent::Assigned(vec![p(3)]))
            .unwrap();

        let result = handler.handle(&FailingAssigner, RebalanceEvent::Assigned(vec![p(4)]));
        assert!(matches!(result, Err(KafkaClientError::Kafka(_))));
        assert_eq!(handler.owned_partitions(), vec![p(3)]);
    }

    #[test]
    fn context_failure_is_sticky_and_keeps_the_first_error() {
        let context = GroupContext::new(Arc::new(RebalanceHandler::new()));
        assert!(context.failure().is_none());
        assert!(!context.has_failed());

        context.record_failure(KafkaClientError::UnknownRebalance("first".to_string()));
        context.record_failure(KafkaClientError::UnknownRebalance("second".to_string()));

        for _ in 0..3 {
            match context.failure() {
                Some(KafkaClientError::UnknownRebalance(code)) => assert_eq!(code, "first"),
                other => panic!("unexpected failure {other:?}"),
            }
        }
        assert!(context.has_failed());
    }

    #[test]
    fn partition_lists_compare_as_sets() {
        let mut a = TopicPartitionList::new();
        a.add_partition("events", 1);
        a.add_partition("events", 0);
        let mut b = TopicPartitionList::new();
        b.add_partition("events", 0);
        b.add_partition("events", 1);
        assert!(same_partitions(&a, &b));

        b.add_partition("events", 2);
        assert!(!same_partitions(&a, &b));
        assert!(same_partitions(
            &TopicPartitionList::new(),
            &TopicPartitionList::new()
        ));
    }
}
