//! Transport abstraction and the default `rumqttc` implementation.
//!
//! The subscriber never talks to an MQTT library directly. It drives a
//! [`Transport`] (connect / subscribe / disconnect) and receives events through
//! a [`TransportCallback`]. All callbacks of one connection are delivered from
//! a single context, in order.
//!
//! # Architecture
//!
//! ```text
//! BufferedSubscriber (lifecycle, backoff, listeners, buffer)
//!     ↓ Transport                ↑ TransportCallback
//! RumqttTransport (one event-loop task per connect attempt)
//!     ↓
//! rumqttc AsyncClient & EventLoop
//!     ↓
//! Network (TCP/TLS)
//! ```
//!
//! `RumqttTransport` does not let rumqttc reconnect on its own: the event-loop
//! task stops on the first error and reports it, and the lifecycle schedules
//! the retry with its own backoff.

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{config::SubscriberConfig, error::TransportError};

/// Completion handler for one connect attempt.
///
/// Called at most once. It is never called if the attempt is abandoned by
/// `disconnect()`.
pub type ConnectOutcome = Box<dyn FnOnce(Result<(), TransportError>) + Send + 'static>;

/// Supplies the transport for a subscriber at build time.
pub type TransportFactory =
    Box<dyn FnOnce(&SubscriberConfig) -> Result<Box<dyn Transport>, TransportError> + Send>;

/// Events pushed from the transport to its owner.
pub trait TransportCallback: Send + Sync {
    /// A session came up. `reconnect` is true when the transport reconnected
    /// on its own rather than in answer to `connect()`.
    fn connect_complete(&self, reconnect: bool);

    /// An established session was lost.
    fn connection_lost(&self, cause: TransportError);

    /// A message arrived on a subscribed topic.
    fn message_arrived(&self, topic: &str, payload: &[u8]);
}

/// Connection primitives the lifecycle is built on.
pub trait Transport: Send + Sync {
    /// Installs the event sink. Called once, before the first `connect()`.
    fn set_callback(&self, callback: Arc<dyn TransportCallback>);

    /// Starts a connect attempt.
    ///
    /// # Errors
    /// An immediate failure is returned here and `on_outcome` is dropped.
    /// Otherwise the result is reported through `on_outcome`.
    fn connect(&self, on_outcome: ConnectOutcome) -> Result<(), TransportError>;

    /// Requests a subscription on the current session.
    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError>;

    /// Tears the current session down. Best effort.
    fn disconnect(&self) -> Result<(), TransportError>;
}

/// Time the event loop is given to flush DISCONNECT before it is cancelled.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Request channel capacity of each `AsyncClient`.
const REQUEST_CHANNEL_CAPACITY: usize = 64;

struct Session {
    client: AsyncClient,
    cancel: CancellationToken,
}

/// [`Transport`] backed by `rumqttc`.
///
/// Each `connect()` builds a fresh `AsyncClient`/`EventLoop` pair and spawns
/// the event loop onto the runtime that was current when the transport was
/// created.
pub struct RumqttTransport {
    options: MqttOptions,
    runtime: Handle,
    callback: Mutex<Option<Arc<dyn TransportCallback>>>,
    session: Mutex<Option<Session>>,
}

impl RumqttTransport {
    /// Creates the transport from a validated subscriber configuration.
    ///
    /// # Errors
    /// `TransportError::ClientSetup` when called outside a tokio runtime.
    pub fn new(config: &SubscriberConfig) -> Result<Self, TransportError> {
        let runtime = Handle::try_current().map_err(|e| {
            TransportError::ClientSetup(format!("default transport needs a tokio runtime: {e}"))
        })?;

        let broker = config.broker();
        let mut options = MqttOptions::new(config.client_id(), broker.host(), broker.port());
        options.set_keep_alive(config.keep_alive());
        options.set_clean_session(true);
        if broker.is_secure() {
            options.set_transport(rumqttc::Transport::tls_with_default_config());
        }

        Ok(Self {
            options,
            runtime,
            callback: Mutex::new(None),
            session: Mutex::new(None),
        })
    }

    /// Factory suitable for `SubscriberBuilder::transport_factory`.
    pub fn factory() -> TransportFactory {
        Box::new(|config| Ok(Box::new(RumqttTransport::new(config)?) as Box<dyn Transport>))
    }
}

impl Transport for RumqttTransport {
    fn set_callback(&self, callback: Arc<dyn TransportCallback>) {
        *self.callback.lock() = Some(callback);
    }

    fn connect(&self, on_outcome: ConnectOutcome) -> Result<(), TransportError> {
        let mut session = self.session.lock();
        if session.as_ref().is_some_and(|s| !s.cancel.is_cancelled()) {
            return Err(TransportError::ConnectInProgress);
        }

        let (client, event_loop) = AsyncClient::new(self.options.clone(), REQUEST_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let callback = self.callback.lock().clone();

        let (host, port) = self.options.broker_address();
        debug!("Starting event loop for {}:{}", host, port);
        self.runtime
            .spawn(drive_event_loop(event_loop, cancel.clone(), callback, on_outcome));

        *session = Some(Session { client, cancel });
        Ok(())
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        let guard = self.session.lock();
        let session = guard.as_ref().ok_or(TransportError::NotConnected)?;
        session.client.try_subscribe(topic, qos)?;
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        let Some(session) = self.session.lock().take() else {
            return Ok(());
        };

        let result = session.client.try_disconnect();
        if result.is_err() {
            session.cancel.cancel();
        } else {
            let cancel = session.cancel.clone();
            self.runtime.spawn(async move {
                tokio::time::sleep(DISCONNECT_GRACE).await;
                cancel.cancel();
            });
        }
        result.map_err(TransportError::from)
    }
}

impl Drop for RumqttTransport {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.cancel.cancel();
        }
    }
}

/// Drives one connection until it fails, is closed locally, or is cancelled.
///
/// Errors before the first CONNACK complete `on_outcome`; errors after it are
/// reported as a connection loss.
async fn drive_event_loop(
    mut event_loop: EventLoop,
    cancel: CancellationToken,
    callback: Option<Arc<dyn TransportCallback>>,
    on_outcome: ConnectOutcome,
) {
    let mut pending = Some(on_outcome);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Event loop cancelled");
                break;
            }

            event = event_loop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Connection established successfully.");
                    match pending.take() {
                        Some(on_outcome) => on_outcome(Ok(())),
                        None => {
                            if let Some(callback) = &callback {
                                callback.connect_complete(true);
                            }
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    trace!("Received publish on topic {}", publish.topic);
                    if let Some(callback) = &callback {
                        callback.message_arrived(&publish.topic, &publish.payload);
                    }
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!("DISCONNECT sent, closing event loop");
                    break;
                }
                Ok(other) => trace!("MQTT event: {:?}", other),
                Err(e) => {
                    warn!("MQTT event loop error: {}", e);
                    // release the session before anyone can retry
                    cancel.cancel();
                    match pending.take() {
                        Some(on_outcome) => on_outcome(Err(e.into())),
                        None => {
                            if let Some(callback) = &callback {
                                callback.connection_lost(e.into());
                            }
                        }
                    }
                    break;
                }
            }
        }
    }

    cancel.cancel();
}
