//! Lifecycle state of a buffered subscriber.
//!
//! The state is published through a `tokio::sync::watch` channel so that
//! application code can react to transitions without registering a listener.
//!
//! # Examples
//!
//! ```ignore
//! use std::time::Duration;
//! use iotdatatunnel_mqtt::LifecycleState;
//!
//! let state = LifecycleState::ReconnectPending(Duration::from_secs(4));
//! println!("Status: {}", state);  // "ReconnectPending (in 4 seconds)"
//! ```

use std::{fmt, time::Duration};

/// Represents where a subscriber is in its connection lifecycle.
///
/// ```text
/// Idle ──connect()──> Connecting ──success──> Connected
///                        ▲   │                    │
///                        │ failure          connection lost
///                        │   ▼                    │
///                   ReconnectPending <────────────┘
///
/// any state ──disconnect()──> Disconnected (terminal)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    /// Built but `connect()` has not been called yet.
    Idle,

    /// A connect attempt is in flight on the transport.
    Connecting,

    /// The session is established and all topics have been (re)subscribed.
    Connected,

    /// A reconnect attempt is scheduled after the contained delay.
    ReconnectPending(Duration),

    /// `disconnect()` was called. No further transitions happen.
    Disconnected,
}

impl LifecycleState {
    /// Returns a short string identifier for the current state.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "Idle",
            LifecycleState::Connecting => "Connecting",
            LifecycleState::Connected => "Connected",
            LifecycleState::ReconnectPending(_) => "ReconnectPending",
            LifecycleState::Disconnected => "Disconnected",
        }
    }

    /// Returns contextual details about the current state.
    ///
    /// Only `ReconnectPending` carries details: the delay until the retry.
    pub fn details(&self) -> String {
        match self {
            LifecycleState::ReconnectPending(delay) => {
                format!("in {} seconds", delay.as_secs_f64())
            }
            _ => String::new(),
        }
    }

    /// Returns true only in `Connected`.
    pub fn is_connected(&self) -> bool {
        matches!(self, LifecycleState::Connected)
    }

    /// Returns true while an attempt is in flight or scheduled.
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            LifecycleState::Connecting | LifecycleState::ReconnectPending(_)
        )
    }

    /// Returns true once `disconnect()` has been called.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Disconnected)
    }

    /// Whether `connect()` may start a new attempt from this state.
    pub(crate) fn accepts_connect(&self) -> bool {
        matches!(
            self,
            LifecycleState::Idle | LifecycleState::ReconnectPending(_)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())?;
        let details = self.details();
        if !details.is_empty() {
            write!(f, " ({details})")?;
        }
        Ok(())
    }
}
