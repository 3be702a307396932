//! Error types for the subscriber crate.
//!
//! Errors fall into three groups that never mix:
//!
//! **Configuration errors** (`ConfigError`) are raised synchronously by
//! `SubscriberBuilder::build()` and are the only failures a caller of this
//! crate ever has to handle.
//!
//! **Transport errors** (`TransportError`) describe connect, subscribe and
//! connection-loss failures. The lifecycle converts them into backoff-scheduled
//! retries and listener notifications; they never escape `connect()` or
//! `disconnect()`.
//!
//! **Scheduler errors** (`SchedulerError`) come from the reconnect timer
//! facility. A scheduler that fails to start is a configuration error; a
//! scheduler that rejects a task after shutdown is only logged.

use thiserror::Error;

/// Failure to build a subscriber from the supplied options.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No broker address was supplied, or it was empty.
    #[error("Broker address is required")]
    MissingBrokerAddress,

    /// The broker address could not be interpreted as `[scheme://]host[:port]`.
    #[error("Invalid broker address '{address}': {reason}")]
    InvalidBrokerAddress { address: String, reason: String },

    /// QoS level outside `0..=2`.
    #[error("QoS must be between 0 and 2, got {0}")]
    InvalidQos(u8),

    /// A zero initial delay would never grow.
    #[error("Initial delay must be greater than zero")]
    ZeroInitialDelay,

    /// The backoff bounds are inverted.
    #[error("Initial delay ({initial_ms} ms) must not exceed max delay ({max_ms} ms)")]
    InvalidBackoff { initial_ms: u64, max_ms: u64 },

    /// The keep-alive interval is below what the broker protocol allows.
    #[error("Keep alive must be at least 5 seconds, got {0} s")]
    InvalidKeepAlive(u64),

    /// The transport factory could not produce a client.
    #[error("Transport setup error: {0}")]
    Transport(#[from] TransportError),

    /// The default reconnect scheduler could not be started.
    #[error("Scheduler setup error: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// Failures reported by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport could not be created (no runtime, bad options, ...).
    #[error("Client setup error: {0}")]
    ClientSetup(String),

    /// A connect attempt is already in progress on this transport.
    #[error("Connect already in progress")]
    ConnectInProgress,

    /// The operation needs an established session.
    #[error("Not connected")]
    NotConnected,

    /// The broker refused or dropped the connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The local client could not queue a request.
    #[error("Client request error: {0}")]
    ClientRequest(#[from] rumqttc::ClientError),

    /// Network-level connection error from the MQTT event loop.
    ///
    /// Boxed to keep the enum small.
    #[error("Client connection error: {0}")]
    ClientConnection(#[from] Box<rumqttc::ConnectionError>),
}

impl From<rumqttc::ConnectionError> for TransportError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        TransportError::ClientConnection(Box::new(err))
    }
}

/// Failures reported by a [`Scheduler`](crate::scheduler::Scheduler).
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The scheduler has been shut down and accepts no more tasks.
    #[error("Scheduler is shut down")]
    Shutdown,

    /// The timer thread or its runtime could not be started.
    #[error("Failed to start scheduler: {0}")]
    Start(#[from] std::io::Error),
}
