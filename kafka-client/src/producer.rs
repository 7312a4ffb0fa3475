use std::fs;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use rdkafka::error::KafkaError;
use rdkafka::message::Message as _;
use rdkafka::producer::{BaseProducer, BaseRecord, DeliveryResult, Producer, ProducerContext};
use rdkafka::ClientContext;
use tracing::{debug, error, info};

use crate::config::ClientSettings;
use crate::error::{is_message_too_large, KafkaClientError};
use crate::message::Headers;
use crate::metrics_consts::MESSAGE_DELIVERIES_COUNTER;

/// Where the broker stored a produced message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Collects the delivery report of the message in flight. Callbacks fire
/// from inside `poll`/`flush` on the producing thread.
#[derive(Default)]
struct DeliveryContext {
    outcome: Mutex<Option<Result<DeliveryReport, KafkaError>>>,
}

impl DeliveryContext {
    fn take(&self) -> Option<Result<DeliveryReport, KafkaError>> {
        self.outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl ClientContext for DeliveryContext {}

impl ProducerContext for DeliveryContext {
    type DeliveryOpaque = ();

    fn delivery(&self, delivery_result: &DeliveryResult<'_>, _delivery_opaque: Self::DeliveryOpaque) {
        let outcome = match delivery_result {
            Ok(msg) => Ok(DeliveryReport {
                topic: msg.topic().to_string(),
                partition: msg.partition(),
                offset: msg.offset(),
            }),
            Err((e, msg)) => {
                error!(topic = msg.topic(), error = %e, "message delivery failed");
                Err(e.clone())
            }
        };
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
    }
}

/// Sends one message to the configured topic and partition selector, then
/// flushes until the broker acknowledges it or the flush timeout expires.
pub fn produce(
    settings: &ClientSettings,
    payload: &[u8],
    headers: &Headers,
) -> Result<DeliveryReport, KafkaClientError> {
    let target = settings.topic_ref();
    let topic = target.topic();

    let config = settings.producer_config();
    debug!("rdkafka configuration: {:?}", config);
    let producer: BaseProducer<DeliveryContext> =
        config.create_with_context(DeliveryContext::default())?;

    let mut record = BaseRecord::<(), [u8]>::to(topic).payload(payload);
    if let Some(partition) = target.partition().index() {
        record = record.partition(partition);
    }
    if let Some(owned) = headers.to_owned_headers() {
        record = record.headers(owned);
    }

    if let Err((e, _)) = producer.send(record) {
        return Err(delivery_error(topic, payload.len(), e));
    }

    producer
        .flush(settings.timeouts().flush)
        .map_err(|e| delivery_error(topic, payload.len(), e))?;

    match producer.context().take() {
        Some(Ok(report)) => {
            metrics::counter!(MESSAGE_DELIVERIES_COUNTER, "outcome" => "delivered")
                .increment(1);
            info!(
                topic = %report.topic,
                partition = report.partition,
                offset = report.offset,
                size = payload.len(),
                "message delivered"
            );
            Ok(report)
        }
        Some(Err(e)) => Err(delivery_error(topic, payload.len(), e)),
        None => Err(delivery_error(topic, payload.len(), KafkaError::Canceled)),
    }
}

/// Produces the content of a regular file, tagged with `filename` and
/// `filesize` headers.
pub fn produce_file(
    settings: &ClientSettings,
    path: &Path,
) -> Result<DeliveryReport, KafkaClientError> {
    let is_file = fs::metadata(path).map(|m| m.is_file()).unwrap_or(false);
    if !is_file {
        return Err(KafkaClientError::InvalidFile {
            path: path.to_path_buf(),
        });
    }

    let content = fs::read(path)?;
    let headers = file_headers(path, content.len());
    produce(settings, &content, &headers)
}

fn file_headers(path: &Path, size: usize) -> Headers {
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    Headers::new()
        .insert("filename", filename)
        .insert("filesize", size.to_string())
}

fn delivery_error(topic: &str, size: usize, e: KafkaError) -> KafkaClientError {
    if is_message_too_large(&e) {
        error!(topic, size, "message rejected as too large");
        metrics::counter!(MESSAGE_DELIVERIES_COUNTER, "outcome" => "too_large").increment(1);
        return KafkaClientError::MessageTooLarge { size };
    }
    metrics::counter!(MESSAGE_DELIVERIES_COUNTER, "outcome" => "failed").increment(1);
    KafkaClientError::Delivery {
        topic: topic.to_string(),
        source: e,
    }
}
