//! Connection and message observers.
//!
//! Both listener traits have a default no-op body for every hook, so an
//! implementer overrides only what it cares about.
//!
//! Registries are copy-on-write: `add`/`remove` swap in a new list while a
//! notification pass keeps iterating the snapshot it took when it started.
//! A listener added mid-pass is not called in that pass; a listener removed
//! mid-pass may still be called once more.
//!
//! A panicking listener is isolated: the panic is caught and logged, and the
//! remaining listeners of the pass are still invoked.

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use tracing::error;

use super::error::TransportError;

/// Observer of connection lifecycle events.
pub trait ConnectionListener: Send + Sync {
    /// The session is established and topics were (re)subscribed.
    fn on_connected(&self) {}

    /// The transport reported the connection as lost. A reconnect follows.
    fn on_connection_lost(&self, _cause: &TransportError) {}

    /// `disconnect()` completed.
    fn on_disconnected(&self) {}
}

/// Observer of the ingestion pipeline.
///
/// For each message the hooks run in this order, across all listeners:
/// every `on_message_received`, every `on_buffered_before`, the buffer
/// append, every `on_buffered_after`.
pub trait MessageListener: Send + Sync {
    fn on_message_received(&self, _topic: &str, _payload: &str) {}

    fn on_buffered_before(&self, _topic: &str, _payload: &str) {}

    fn on_buffered_after(&self, _topic: &str, _payload: &str) {}
}

/// Handle returned by registration, used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

type Entries<L> = Arc<Vec<(ListenerId, Arc<L>)>>;

/// Copy-on-write set of listeners of one kind.
pub struct ListenerRegistry<L: ?Sized> {
    next_id: AtomicU64,
    entries: Mutex<Entries<L>>,
}

impl<L: ?Sized> ListenerRegistry<L> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Arc::new(Vec::new())),
        }
    }

    /// Registers a listener and returns its handle.
    pub fn add(&self, listener: Arc<L>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut entries = self.entries.lock();
        let mut next = Vec::with_capacity(entries.len() + 1);
        next.extend(entries.iter().cloned());
        next.push((id, listener));
        *entries = Arc::new(next);
        id
    }

    /// Removes a listener. Returns `false` if the handle is unknown.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock();
        if !entries.iter().any(|(existing, _)| *existing == id) {
            return false;
        }
        let next: Vec<_> = entries
            .iter()
            .filter(|(existing, _)| *existing != id)
            .cloned()
            .collect();
        *entries = Arc::new(next);
        true
    }

    /// The current list. Holding it does not block registration.
    pub fn snapshot(&self) -> Entries<L> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invokes `f` on every listener of a snapshot, catching panics per
    /// listener. `event` names the hook in the log line.
    pub fn notify<F>(&self, event: &str, f: F)
    where
        F: Fn(&L),
    {
        let snapshot = self.snapshot();
        for (id, listener) in snapshot.iter() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(listener.as_ref())));
            if let Err(panic) = outcome {
                error!(
                    "Listener {} panicked during {}: {}",
                    id,
                    event,
                    panic_message(panic.as_ref())
                );
            }
        }
    }
}

impl<L: ?Sized> Default for ListenerRegistry<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ?Sized> fmt::Debug for ListenerRegistry<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("len", &self.len())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}
