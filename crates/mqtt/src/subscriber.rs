//! The connection lifecycle: connect, backoff-scheduled reconnect,
//! subscription restoration, listener fan-out and message buffering.
//!
//! # Contexts
//!
//! Two contexts drive a subscriber concurrently:
//! - the transport's callback context (connect outcomes, connection loss,
//!   incoming messages), and
//! - the scheduler's timer context (reconnect attempts).
//!
//! Neither blocks. The lifecycle state lives in a `watch` channel and every
//! transition is a compare-and-set on it, so a late callback that finds the
//! subscriber `Disconnected` is dropped without notifying anyone and without
//! scheduling anything.
//!
//! # Ingestion order
//!
//! For each message: every `on_message_received`, every `on_buffered_before`,
//! the buffer append, every `on_buffered_after`. Messages go through this
//! sequence one at a time.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use super::{
    backoff::Backoff,
    buffer::MessageBuffer,
    config::{SubscriberBuilder, SubscriberConfig},
    error::TransportError,
    listener::{ConnectionListener, ListenerId, ListenerRegistry, MessageListener},
    scheduler::Scheduler,
    state::LifecycleState,
    transport::{ConnectOutcome, Transport, TransportCallback},
};

/// MQTT subscriber that survives connection drops and buffers every message
/// it receives.
///
/// Cloning is cheap; all clones drive the same connection.
#[derive(Clone)]
pub struct BufferedSubscriber {
    inner: Arc<Inner>,
}

struct Inner {
    config: SubscriberConfig,
    transport: Box<dyn Transport>,
    scheduler: Arc<dyn Scheduler>,
    buffer: Arc<dyn MessageBuffer>,
    backoff: Backoff,
    connection_listeners: ListenerRegistry<dyn ConnectionListener>,
    message_listeners: ListenerRegistry<dyn MessageListener>,
    state_tx: watch::Sender<LifecycleState>,
    /// Serializes the ingestion sequence across messages.
    ingest: Mutex<()>,
}

/// Forwards transport events without keeping the subscriber alive.
struct CallbackBridge {
    inner: Weak<Inner>,
}

impl TransportCallback for CallbackBridge {
    fn connect_complete(&self, reconnect: bool) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_connect_complete(reconnect);
        }
    }

    fn connection_lost(&self, cause: TransportError) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_connection_lost(cause);
        }
    }

    fn message_arrived(&self, topic: &str, payload: &[u8]) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_message_arrived(topic, payload);
        }
    }
}

impl BufferedSubscriber {
    /// Shorthand for [`SubscriberBuilder::new`].
    pub fn builder() -> SubscriberBuilder {
        SubscriberBuilder::new()
    }

    pub(crate) fn assemble(
        config: SubscriberConfig,
        transport: Box<dyn Transport>,
        scheduler: Arc<dyn Scheduler>,
        buffer: Arc<dyn MessageBuffer>,
    ) -> Self {
        let backoff = Backoff::new(config.initial_delay(), config.max_delay());
        let (state_tx, _) = watch::channel(LifecycleState::Idle);

        let inner = Arc::new(Inner {
            config,
            transport,
            scheduler,
            buffer,
            backoff,
            connection_listeners: ListenerRegistry::new(),
            message_listeners: ListenerRegistry::new(),
            state_tx,
            ingest: Mutex::new(()),
        });
        inner.transport.set_callback(Arc::new(CallbackBridge {
            inner: Arc::downgrade(&inner),
        }));

        Self { inner }
    }

    /// Starts connecting. Never fails: an immediate or asynchronous transport
    /// failure schedules a retry with the current backoff delay.
    ///
    /// Ignored unless the subscriber is `Idle` or `ReconnectPending`.
    pub fn connect(&self) {
        self.inner.connect();
    }

    /// Cancels pending reconnects, tears the transport down (best effort) and
    /// notifies `on_disconnected`. Idempotent; terminal.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    pub fn add_connection_listener(&self, listener: Arc<dyn ConnectionListener>) -> ListenerId {
        self.inner.connection_listeners.add(listener)
    }

    pub fn remove_connection_listener(&self, id: ListenerId) -> bool {
        self.inner.connection_listeners.remove(id)
    }

    pub fn add_message_listener(&self, listener: Arc<dyn MessageListener>) -> ListenerId {
        self.inner.message_listeners.add(listener)
    }

    pub fn remove_message_listener(&self, id: ListenerId) -> bool {
        self.inner.message_listeners.remove(id)
    }

    pub fn connection_listener_count(&self) -> usize {
        self.inner.connection_listeners.len()
    }

    pub fn message_listener_count(&self) -> usize {
        self.inner.message_listeners.len()
    }

    /// The buffer every ingested message is appended to.
    pub fn buffer(&self) -> Arc<dyn MessageBuffer> {
        self.inner.buffer.clone()
    }

    pub fn config(&self) -> &SubscriberConfig {
        &self.inner.config
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.state()
    }

    /// Watch receiver for lifecycle transitions.
    pub fn state_receiver(&self) -> watch::Receiver<LifecycleState> {
        self.inner.state_tx.subscribe()
    }

    /// Delay the next scheduled reconnect will wait.
    pub fn current_delay(&self) -> Duration {
        self.inner.backoff.current_delay()
    }
}

impl Inner {
    fn state(&self) -> LifecycleState {
        self.state_tx.borrow().clone()
    }

    /// Moves to `to` if the current state satisfies `allowed`.
    fn transition<F>(&self, allowed: F, to: LifecycleState) -> bool
    where
        F: FnOnce(&LifecycleState) -> bool,
    {
        self.state_tx.send_if_modified(|state| {
            if !allowed(&*state) {
                return false;
            }
            debug!("Lifecycle state: {} -> {}", state, to);
            *state = to;
            true
        })
    }

    fn connect(self: &Arc<Self>) {
        if !self.transition(LifecycleState::accepts_connect, LifecycleState::Connecting) {
            debug!("connect() ignored in state {}", self.state());
            return;
        }

        info!(
            "Connecting to {} as '{}'",
            self.config.broker(),
            self.config.client_id()
        );

        let weak = Arc::downgrade(self);
        let on_outcome: ConnectOutcome = Box::new(move |result| {
            if let Some(inner) = weak.upgrade() {
                inner.on_connect_outcome(result);
            }
        });

        if let Err(e) = self.transport.connect(on_outcome) {
            warn!("Connect attempt failed immediately: {}", e);
            if matches!(self.state(), LifecycleState::Connecting) {
                self.schedule_reconnect();
            }
        }
    }

    fn on_connect_outcome(self: &Arc<Self>, result: Result<(), TransportError>) {
        match result {
            Ok(()) => {
                if !self.transition(
                    |s| matches!(s, LifecycleState::Connecting),
                    LifecycleState::Connected,
                ) {
                    debug!("Ignoring connect success in state {}", self.state());
                    return;
                }
                info!("Connected to {}", self.config.broker());
                self.backoff.reset();
                self.restore_and_announce();
            }
            Err(e) => {
                if !matches!(self.state(), LifecycleState::Connecting) {
                    debug!("Ignoring connect failure in state {}: {}", self.state(), e);
                    return;
                }
                warn!("Connect attempt failed: {}", e);
                self.schedule_reconnect();
            }
        }
    }

    fn on_connect_complete(&self, reconnect: bool) {
        if !reconnect {
            trace!("Initial connect completion is handled by the connect outcome");
            return;
        }
        if !self.transition(|s| !s.is_terminal(), LifecycleState::Connected) {
            debug!("Ignoring automatic reconnect after disconnect");
            return;
        }
        // automatic reconnects bypass the backoff schedule entirely
        info!("Transport reconnected automatically, restoring subscriptions");
        self.restore_and_announce();
    }

    /// Resubscribes and notifies `on_connected`, stopping as soon as a
    /// concurrent `disconnect()` lands.
    fn restore_and_announce(&self) {
        self.subscribe_all();
        if self.state().is_terminal() {
            debug!("Disconnected while restoring subscriptions, not announcing");
            return;
        }
        self.connection_listeners
            .notify("on_connected", |l| l.on_connected());
    }

    fn on_connection_lost(self: &Arc<Self>, cause: TransportError) {
        if self.state().is_terminal() {
            debug!("Ignoring connection loss after disconnect: {}", cause);
            return;
        }
        warn!("Connection lost: {}", cause);
        self.connection_listeners
            .notify("on_connection_lost", |l| l.on_connection_lost(&cause));
        self.schedule_reconnect();
    }

    fn on_message_arrived(&self, topic: &str, payload: &[u8]) {
        if self.state().is_terminal() {
            trace!("Dropping message on '{}' after disconnect", topic);
            return;
        }

        let payload = String::from_utf8_lossy(payload);
        let _ingest = self.ingest.lock();

        self.message_listeners
            .notify("on_message_received", |l| l.on_message_received(topic, &payload));
        self.message_listeners
            .notify("on_buffered_before", |l| l.on_buffered_before(topic, &payload));
        self.buffer.add(topic, &payload);
        self.message_listeners
            .notify("on_buffered_after", |l| l.on_buffered_after(topic, &payload));
    }

    /// Submits a one-shot reconnect after the current delay and doubles the
    /// delay for the next one.
    fn schedule_reconnect(self: &Arc<Self>) {
        if self.state().is_terminal() {
            return;
        }

        let delay = self.backoff.next_delay();
        if !self.transition(
            |s| !s.is_terminal(),
            LifecycleState::ReconnectPending(delay),
        ) {
            return;
        }
        info!(
            "Reconnecting in {:.2} seconds (attempt {})",
            delay.as_secs_f64(),
            self.backoff.attempt()
        );

        let weak = Arc::downgrade(self);
        let task = Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.connect();
            }
        });
        if let Err(e) = self.scheduler.schedule(delay, task) {
            warn!("Failed to schedule reconnect: {}", e);
        }
    }

    /// Subscribes every configured topic. Failures are per topic and never
    /// abort the rest.
    fn subscribe_all(&self) {
        for subscription in self.config.topics() {
            if self.state().is_terminal() {
                return;
            }
            match self
                .transport
                .subscribe(&subscription.topic, subscription.qos)
            {
                Ok(()) => debug!(
                    "Subscribed to '{}' at {:?}",
                    subscription.topic, subscription.qos
                ),
                Err(e) => warn!("Failed to subscribe to '{}': {}", subscription.topic, e),
            }
        }
    }

    fn disconnect(&self) {
        let previous = self.state_tx.send_replace(LifecycleState::Disconnected);
        if previous.is_terminal() {
            debug!("disconnect() called again, nothing to do");
            return;
        }

        info!("Disconnecting from {}", self.config.broker());
        self.scheduler.shutdown();
        if let Err(e) = self.transport.disconnect() {
            debug!("Transport disconnect failed (ignored): {}", e);
        }
        self.connection_listeners
            .notify("on_disconnected", |l| l.on_disconnected());
    }
}
