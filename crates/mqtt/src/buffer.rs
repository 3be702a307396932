//! Message buffers: the sink every ingested message is appended to.
//!
//! The ingestion pipeline is the single producer; any number of consumers
//! may `poll()` concurrently. Implementations must be FIFO and hand out each
//! entry exactly once.
//!
//! `RedisMessageBuffer` and `KafkaMessageBuffer` are placeholders for external
//! queues: they carry their endpoint but stage messages locally until a real
//! client is wired in.

use std::{collections::VecDeque, fmt, sync::Arc};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A `(topic, payload)` pair as it was received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedMessage {
    pub topic: String,
    pub payload: String,
}

impl BufferedMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// FIFO sink for ingested messages.
pub trait MessageBuffer: Send + Sync {
    /// Appends a message at the tail.
    fn add(&self, topic: &str, payload: &str);

    /// Removes and returns the head, or `None` when empty.
    fn poll(&self) -> Option<BufferedMessage>;

    /// Number of messages currently held.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Unbounded in-memory FIFO. The default buffer.
#[derive(Debug, Default)]
pub struct InMemoryMessageBuffer {
    queue: Mutex<VecDeque<BufferedMessage>>,
}

impl InMemoryMessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageBuffer for InMemoryMessageBuffer {
    fn add(&self, topic: &str, payload: &str) {
        self.queue
            .lock()
            .push_back(BufferedMessage::new(topic, payload));
    }

    fn poll(&self) -> Option<BufferedMessage> {
        self.queue.lock().pop_front()
    }

    fn len(&self) -> usize {
        self.queue.lock().len()
    }
}

/// Redis-backed buffer placeholder.
#[derive(Debug)]
pub struct RedisMessageBuffer {
    host: String,
    port: u16,
    staged: InMemoryMessageBuffer,
}

impl RedisMessageBuffer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            staged: InMemoryMessageBuffer::new(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl MessageBuffer for RedisMessageBuffer {
    fn add(&self, topic: &str, payload: &str) {
        self.staged.add(topic, payload)
    }

    fn poll(&self) -> Option<BufferedMessage> {
        self.staged.poll()
    }

    fn len(&self) -> usize {
        self.staged.len()
    }
}

/// Kafka-backed buffer placeholder.
#[derive(Debug)]
pub struct KafkaMessageBuffer {
    host: String,
    port: u16,
    staged: InMemoryMessageBuffer,
}

impl KafkaMessageBuffer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            staged: InMemoryMessageBuffer::new(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl MessageBuffer for KafkaMessageBuffer {
    fn add(&self, topic: &str, payload: &str) {
        self.staged.add(topic, payload)
    }

    fn poll(&self) -> Option<BufferedMessage> {
        self.staged.poll()
    }

    fn len(&self) -> usize {
        self.staged.len()
    }
}

/// Which buffer backend to construct.
///
/// Deserialized case-insensitively; anything unknown falls back to
/// `InMemory`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferKind {
    #[default]
    InMemory,
    Redis,
    Kafka,
}

impl BufferKind {
    /// Default port for the backend, if it has one.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            BufferKind::InMemory => None,
            BufferKind::Redis => Some(6379),
            BufferKind::Kafka => Some(9092),
        }
    }
}

impl From<&str> for BufferKind {
    fn from(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "redis" => BufferKind::Redis,
            "kafka" => BufferKind::Kafka,
            _ => BufferKind::InMemory,
        }
    }
}

impl<'de> Deserialize<'de> for BufferKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(BufferKind::from(raw.as_str()))
    }
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferKind::InMemory => write!(f, "inmemory"),
            BufferKind::Redis => write!(f, "redis"),
            BufferKind::Kafka => write!(f, "kafka"),
        }
    }
}

/// Buffer selection settings, typically the `[buffer]` section of a config
/// file.
///
/// ```toml
/// [buffer]
/// type = "redis"
/// host = "cache.local"
/// port = 6380
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferSettings {
    #[serde(rename = "type")]
    pub kind: BufferKind,
    pub host: String,
    pub port: Option<u16>,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            kind: BufferKind::InMemory,
            host: "localhost".to_string(),
            port: None,
        }
    }
}

impl BufferSettings {
    /// Constructs the configured buffer.
    pub fn build(&self) -> Arc<dyn MessageBuffer> {
        let port = self.port.or(self.kind.default_port());
        debug!(
            "Creating {} message buffer (host: {}, port: {:?})",
            self.kind, self.host, port
        );
        match (self.kind, port) {
            (BufferKind::Redis, Some(port)) => {
                Arc::new(RedisMessageBuffer::new(self.host.clone(), port))
            }
            (BufferKind::Kafka, Some(port)) => {
                Arc::new(KafkaMessageBuffer::new(self.host.clone(), port))
            }
            _ => Arc::new(InMemoryMessageBuffer::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, thread};

    use super::*;

    #[test]
    fn test_in_memory_fifo() {
        let buffer = InMemoryMessageBuffer::new();
        buffer.add("a", "1");
        buffer.add("b", "2");

        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.poll(), Some(BufferedMessage::new("a", "1")));
        assert_eq!(buffer.poll(), Some(BufferedMessage::new("b", "2")));
        assert_eq!(buffer.poll(), None);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_concurrent_add_and_poll_never_loses_or_duplicates() {
        const PRODUCED: usize = 5_000;
        let buffer = Arc::new(InMemoryMessageBuffer::new());

        let producer = {
            let buffer = buffer.clone();
            thread::spawn(move || {
                for i in 0..PRODUCED {
                    buffer.add("t", &i.to_string());
                }
            })
        };

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let buffer = buffer.clone();
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    let mut idle = 0;
                    while idle < 10_000 {
                        match buffer.poll() {
                            Some(msg) => {
                                seen.push(msg.payload.parse::<usize>().unwrap());
                                idle = 0;
                            }
                            None => idle += 1,
                        }
                    }
                    seen
                })
            })
            .collect();

        producer.join().unwrap();
        let mut all = Vec::new();
        for consumer in consumers {
            let seen = consumer.join().unwrap();
            // each consumer observes a strictly increasing subsequence
            assert!(seen.windows(2).all(|w| w[0] < w[1]));
            all.extend(seen);
        }
        while let Some(msg) = buffer.poll() {
            all.push(msg.payload.parse::<usize>().unwrap());
        }

        assert_eq!(all.len(), PRODUCED);
        let unique: HashSet<_> = all.into_iter().collect();
        assert_eq!(unique.len(), PRODUCED);
    }

    #[test]
    fn test_settings_default_to_in_memory() {
        let settings = BufferSettings::default();
        assert_eq!(settings.kind, BufferKind::InMemory);
        assert_eq!(settings.host, "localhost");
        let buffer = settings.build();
        buffer.add("t", "p");
        assert_eq!(buffer.poll(), Some(BufferedMessage::new("t", "p")));
    }

    #[test]
    fn test_kind_is_case_insensitive_and_falls_back() {
        assert_eq!(BufferKind::from("REDIS"), BufferKind::Redis);
        assert_eq!(BufferKind::from("Kafka"), BufferKind::Kafka);
        assert_eq!(BufferKind::from("rabbitmq"), BufferKind::InMemory);
        assert_eq!(BufferKind::from(""), BufferKind::InMemory);
    }

    #[test]
    fn test_backend_default_ports() {
        assert_eq!(BufferKind::Redis.default_port(), Some(6379));
        assert_eq!(BufferKind::Kafka.default_port(), Some(9092));
        assert_eq!(BufferKind::InMemory.default_port(), None);
    }

    #[test]
    fn test_placeholder_buffers_keep_endpoint() {
        let redis = RedisMessageBuffer::new("cache", 6380);
        assert_eq!((redis.host(), redis.port()), ("cache", 6380));
        redis.add("t", "p");
        assert_eq!(redis.len(), 1);

        let kafka = KafkaMessageBuffer::new("broker", 9093);
        assert_eq!((kafka.host(), kafka.port()), ("broker", 9093));
        assert!(kafka.poll().is_none());
    }
}
