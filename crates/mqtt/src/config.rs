//! Subscriber configuration: the builder and the immutable value it produces.
//!
//! `SubscriberBuilder` accumulates options; `build()` validates them into a
//! [`SubscriberConfig`] and assembles the subscriber. Every configuration
//! error surfaces there, synchronously. Once built, the configuration cannot
//! change.
//!
//! # Broker address
//!
//! Accepted forms:
//! - `tcp://host:port` or `mqtt://host:port` (plain, default port 1883)
//! - `ssl://host:port` or `mqtts://host:port` (TLS, default port 8883)
//! - `host` or `host:port` (plain)
//!
//! # Examples
//!
//! ```ignore
//! use std::time::Duration;
//! use iotdatatunnel_mqtt::SubscriberBuilder;
//!
//! let subscriber = SubscriberBuilder::new()
//!     .broker_url("tcp://broker.local:1883")
//!     .topic("sensors/+/telemetry")
//!     .topic_with_qos("alarms/#", 2)
//!     .qos(1)
//!     .initial_delay(Duration::from_millis(500))
//!     .max_delay(Duration::from_secs(30))
//!     .build()?;
//! ```

use std::{fmt, sync::Arc, time::Duration};

use rumqttc::QoS;
use url::Url;

use super::{
    buffer::{InMemoryMessageBuffer, MessageBuffer},
    error::{ConfigError, TransportError},
    scheduler::{Scheduler, TimerScheduler},
    subscriber::BufferedSubscriber,
    transport::{RumqttTransport, Transport, TransportFactory},
};

const DEFAULT_PLAIN_PORT: u16 = 1883;
const DEFAULT_TLS_PORT: u16 = 8883;
const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// Parsed broker endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    url: String,
    host: String,
    port: u16,
    secure: bool,
}

impl BrokerAddress {
    /// Parses `[scheme://]host[:port]`.
    ///
    /// # Errors
    /// `MissingBrokerAddress` for empty input, `InvalidBrokerAddress` for an
    /// unknown scheme, a missing host, or a malformed port.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::MissingBrokerAddress);
        }

        let invalid = |reason: String| ConfigError::InvalidBrokerAddress {
            address: raw.to_string(),
            reason,
        };

        let normalized = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("tcp://{trimmed}")
        };
        let url = Url::parse(&normalized).map_err(|e| invalid(e.to_string()))?;

        let (secure, default_port) = match url.scheme() {
            "tcp" | "mqtt" => (false, DEFAULT_PLAIN_PORT),
            "ssl" | "tls" | "mqtts" => (true, DEFAULT_TLS_PORT),
            other => return Err(invalid(format!("unsupported scheme '{other}'"))),
        };
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("missing host".to_string()))?;

        Ok(Self {
            url: trimmed.to_string(),
            host: host.to_string(),
            port: url.port().unwrap_or(default_port),
            secure,
        })
    }

    /// The address as it was supplied.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the connection uses TLS.
    pub fn is_secure(&self) -> bool {
        self.secure
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.secure { "ssl" } else { "tcp" };
        write!(f, "{}://{}:{}", scheme, self.host, self.port)
    }
}

/// One topic filter and the QoS it is subscribed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSubscription {
    pub topic: String,
    pub qos: QoS,
}

/// Converts a numeric QoS level.
///
/// # Errors
/// `ConfigError::InvalidQos` for anything outside `0..=2`.
pub fn qos_from_level(level: u8) -> Result<QoS, ConfigError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(ConfigError::InvalidQos(other)),
    }
}

/// Validated, immutable subscriber configuration.
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    broker: BrokerAddress,
    client_id: String,
    topics: Vec<TopicSubscription>,
    initial_delay: Duration,
    max_delay: Duration,
    keep_alive: Duration,
}

impl SubscriberConfig {
    pub fn broker(&self) -> &BrokerAddress {
        &self.broker
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Subscriptions in declaration order, duplicates included.
    pub fn topics(&self) -> &[TopicSubscription] {
        &self.topics
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }
}

/// Fluent builder for [`BufferedSubscriber`].
pub struct SubscriberBuilder {
    broker_url: Option<String>,
    client_id: Option<String>,
    topics: Vec<(String, Option<u8>)>,
    qos: u8,
    initial_delay: Duration,
    max_delay: Duration,
    keep_alive: Duration,
    transport_factory: Option<TransportFactory>,
    scheduler: Option<Arc<dyn Scheduler>>,
    buffer: Option<Arc<dyn MessageBuffer>>,
}

impl Default for SubscriberBuilder {
    /// QoS 1, backoff from 1s to 60s, keep-alive 60s, no topics.
    fn default() -> Self {
        Self {
            broker_url: None,
            client_id: None,
            topics: Vec::new(),
            qos: 1,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            keep_alive: Duration::from_secs(60),
            transport_factory: None,
            scheduler: None,
            buffer: None,
        }
    }
}

impl SubscriberBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broker endpoint. Required.
    pub fn broker_url(mut self, url: impl Into<String>) -> Self {
        self.broker_url = Some(url.into());
        self
    }

    /// Client identifier. A random UUID is used when absent or empty.
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Adds a topic subscribed at the default QoS.
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topics.push((topic.into(), None));
        self
    }

    /// Adds a topic subscribed at its own QoS level.
    pub fn topic_with_qos(mut self, topic: impl Into<String>, qos: u8) -> Self {
        self.topics.push((topic.into(), Some(qos)));
        self
    }

    /// Default QoS level (0-2) for topics added with [`topic`](Self::topic).
    pub fn qos(mut self, qos: u8) -> Self {
        self.qos = qos;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Keep-alive for the default transport. At least 5 seconds.
    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Replaces the default `rumqttc` transport.
    pub fn transport_factory<F>(mut self, factory: F) -> Self
    where
        F: FnOnce(&SubscriberConfig) -> Result<Box<dyn Transport>, TransportError>
            + Send
            + 'static,
    {
        self.transport_factory = Some(Box::new(factory));
        self
    }

    /// Replaces the default dedicated timer thread.
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Replaces the default in-memory buffer.
    pub fn buffer(mut self, buffer: Arc<dyn MessageBuffer>) -> Self {
        self.buffer = Some(buffer);
        self
    }

    /// Validates the options without building anything.
    ///
    /// # Errors
    /// Any configuration error `build()` would report for the options.
    pub fn to_config(&self) -> Result<SubscriberConfig, ConfigError> {
        let broker = BrokerAddress::parse(self.broker_url.as_deref().unwrap_or_default())?;

        let default_qos = qos_from_level(self.qos)?;
        let topics = self
            .topics
            .iter()
            .map(|(topic, qos)| {
                Ok(TopicSubscription {
                    topic: topic.clone(),
                    qos: match qos {
                        Some(level) => qos_from_level(*level)?,
                        None => default_qos,
                    },
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        if self.initial_delay.is_zero() {
            return Err(ConfigError::ZeroInitialDelay);
        }

        if self.initial_delay > self.max_delay {
            return Err(ConfigError::InvalidBackoff {
                initial_ms: self.initial_delay.as_millis() as u64,
                max_ms: self.max_delay.as_millis() as u64,
            });
        }

        if self.keep_alive.as_secs() < MIN_KEEP_ALIVE_SECS {
            return Err(ConfigError::InvalidKeepAlive(self.keep_alive.as_secs()));
        }

        let client_id = match self.client_id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => uuid::Uuid::new_v4().to_string(),
        };

        Ok(SubscriberConfig {
            broker,
            client_id,
            topics,
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            keep_alive: self.keep_alive,
        })
    }

    /// Validates the options and assembles the subscriber.
    ///
    /// Collaborators that were not supplied are created here: the `rumqttc`
    /// transport (which needs a running tokio runtime), a [`TimerScheduler`]
    /// and an [`InMemoryMessageBuffer`].
    ///
    /// # Errors
    /// Configuration errors, transport factory failures, and scheduler start
    /// failures.
    pub fn build(self) -> Result<BufferedSubscriber, ConfigError> {
        let config = self.to_config()?;

        let factory = self.transport_factory.unwrap_or_else(RumqttTransport::factory);
        let transport = factory(&config)?;
        let scheduler = match self.scheduler {
            Some(scheduler) => scheduler,
            None => Arc::new(TimerScheduler::new()?),
        };
        let buffer = self
            .buffer
            .unwrap_or_else(|| Arc::new(InMemoryMessageBuffer::new()));

        Ok(BufferedSubscriber::assemble(
            config, transport, scheduler, buffer,
        ))
    }
}
