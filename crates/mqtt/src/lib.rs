//! # iotdatatunnel-mqtt: resilient buffered MQTT subscriber
//!
//! Keeps a broker subscription alive across connection drops and appends
//! every message it receives to a pluggable buffer. On top of the transport
//! this crate adds:
//!
//! - **Backoff reconnection** that doubles the delay per scheduled retry and
//!   resets it on every successful connect
//! - **Subscription restoration** after every (re)connect
//! - **Listener fan-out** for connection and ingestion events
//! - **Pluggable buffers** (in-memory FIFO, redis/kafka placeholders)
//! - **State monitoring** through a `watch` channel
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use iotdatatunnel_mqtt::{BufferedSubscriber, ConnectionListener};
//!
//! struct Log;
//! impl ConnectionListener for Log {
//!     fn on_connected(&self) {
//!         println!("online");
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let subscriber = BufferedSubscriber::builder()
//!         .broker_url("tcp://broker.local:1883")
//!         .topic("sensors/+/telemetry")
//!         .build()?;
//!     subscriber.add_connection_listener(Arc::new(Log));
//!     subscriber.connect();
//!
//!     let buffer = subscriber.buffer();
//!     while let Some(message) = buffer.poll() {
//!         println!("{}: {}", message.topic, message.payload);
//!     }
//!
//!     subscriber.disconnect();
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │  Application (listeners, consumers)  │
//! └────────────┬─────────────────────────┘
//!              │
//! ┌────────────▼─────────────────────────┐
//! │  BufferedSubscriber                  │
//! │  lifecycle, Backoff, ListenerRegistry│
//! └──────┬──────────────┬────────────────┘
//!        │              │
//! ┌──────▼──────┐ ┌─────▼────────────────┐
//! │  Scheduler  │ │  Transport           │
//! │  (timer)    │ │  (rumqttc)           │
//! └─────────────┘ └─────┬────────────────┘
//!                       │
//! ┌─────────────────────▼────────────────┐
//! │  MessageBuffer                       │
//! └──────────────────────────────────────┘
//! ```
//!
//! # Error Handling
//!
//! Only `SubscriberBuilder::build()` returns errors ([`ConfigError`]).
//! Transport failures after that point become retries and listener
//! notifications.

pub mod backoff;
pub mod buffer;
pub mod config;
pub mod error;
pub mod listener;
pub mod scheduler;
pub mod state;
pub mod subscriber;
pub mod transport;

// Re-exports: configuration
pub use config::{BrokerAddress, SubscriberBuilder, SubscriberConfig, TopicSubscription};
// Re-exports: buffering
pub use buffer::{
    BufferKind, BufferSettings, BufferedMessage, InMemoryMessageBuffer, KafkaMessageBuffer,
    MessageBuffer, RedisMessageBuffer,
};
// Re-exports: lifecycle
pub use backoff::Backoff;
pub use state::LifecycleState;
pub use subscriber::BufferedSubscriber;
// Re-exports: observers
pub use listener::{ConnectionListener, ListenerId, MessageListener};
// Re-exports: collaborators
pub use scheduler::{Scheduler, Task, TimerScheduler};
pub use transport::{ConnectOutcome, RumqttTransport, Transport, TransportCallback};
// Re-exports: errors
pub use error::{ConfigError, SchedulerError, TransportError};

pub use rumqttc::QoS;
