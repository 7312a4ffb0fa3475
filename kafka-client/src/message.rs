use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::message::{BorrowedMessage, Header, Headers as _, Message as _, OwnedHeaders};

use crate::types::{StartOffset, TopicRef};

/// Ordered message headers. Keys may repeat; insertion order is kept on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, Vec<u8>)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.entries.push((key.into(), value.into()));
        self
    }

    /// First value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| std::str::from_utf8(v).ok())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn to_owned_headers(&self) -> Option<OwnedHeaders> {
        if self.entries.is_empty() {
            return None;
        }
        let headers = self
            .entries
            .iter()
            .fold(OwnedHeaders::new_with_capacity(self.entries.len()), |acc, (key, value)| {
                acc.insert(Header {
                    key: key.as_str(),
                    value: Some(value.as_slice()),
                })
            });
        Some(headers)
    }
}

impl<K: Into<String>, V: Into<Vec<u8>>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// A fetched message, detached from the consumer that read it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    topic: String,
    partition: i32,
    offset: i64,
    key: Option<Vec<u8>>,
    payload: Vec<u8>,
    headers: Headers,
    timestamp: Option<i64>,
}

impl Message {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: None,
            payload,
            headers: Headers::default(),
            timestamp: None,
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub(crate) fn from_borrowed_message(msg: &BorrowedMessage<'_>) -> Self {
        let headers = msg
            .headers()
            .map(|headers| {
                headers
                    .iter()
                    .map(|h| (h.key, h.value.map(<[u8]>::to_vec).unwrap_or_default()))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            topic: msg.topic().to_owned(),
            partition: msg.partition(),
            offset: msg.offset(),
            key: msg.key().map(|k| k.to_vec()),
            payload: msg.payload().map(|p| p.to_vec()).unwrap_or_default(),
            headers,
            timestamp: msg.timestamp().to_millis(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn topic_ref(&self) -> TopicRef {
        TopicRef::pinned(self.topic.clone(), self.partition)
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Milliseconds since the epoch, when the broker recorded one.
    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }
}

/// Result of a single poll: a message, the end-of-partition marker, or
/// nothing inside the timeout. Other broker errors come back as `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Message(Message),
    EndOfPartition { partition: i32 },
    Idle,
}

impl PollOutcome {
    pub(crate) fn from_poll(
        polled: Option<KafkaResult<BorrowedMessage<'_>>>,
    ) -> Result<Self, KafkaError> {
        match polled {
            None => Ok(PollOutcome::Idle),
            Some(Ok(msg)) => Ok(PollOutcome::Message(Message::from_borrowed_message(&msg))),
            Some(Err(KafkaError::PartitionEOF(partition))) => {
                Ok(PollOutcome::EndOfPartition { partition })
            }
            Some(Err(e)) => Err(e),
        }
    }

    /// True for the two terminal signals of a bounded fetch.
    pub fn is_eof(&self) -> bool {
        !matches!(self, PollOutcome::Message(_))
    }
}

/// Messages read by a bounded fetch, with the range it covered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchBatch {
    pub messages: Vec<Message>,
    /// Set once an idle poll or the end-of-partition marker stopped the fetch.
    pub eof: bool,
    pub from_offset: StartOffset,
    /// Offset of the last message read, `None` when nothing was read.
    pub to_offset: Option<i64>,
}

impl FetchBatch {
    pub(crate) fn starting_at(from_offset: StartOffset) -> Self {
        Self {
            messages: Vec::new(),
            eof: false,
            from_offset,
            to_offset: None,
        }
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.to_offset = Some(message.offset());
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
