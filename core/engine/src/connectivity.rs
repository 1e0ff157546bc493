//! Platform connectivity observation and offline-to-online edge detection.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use driftsync_common::ConnectionType;

/// Current network state as last reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityState {
    pub is_online: bool,
    pub connection: ConnectionType,
}

impl ConnectivityState {
    /// Offline with an unknown transport. The observer's starting state.
    pub fn offline() -> Self {
        Self {
            is_online: false,
            connection: ConnectionType::Unknown,
        }
    }

    /// Online over the given transport.
    pub fn online(connection: ConnectionType) -> Self {
        Self {
            is_online: true,
            connection,
        }
    }
}

type Listener = Box<dyn Fn(ConnectivityState) + Send + Sync>;

/// Observes platform network-state changes.
///
/// Platform glue feeds raw state changes into [`report`](Self::report).
/// Listener callbacks run synchronously on the reporting thread; consumers
/// that must touch shared engine state subscribe to the edge channel instead,
/// which a tokio task on the engine side drains.
pub struct ConnectivityObserver {
    state: RwLock<ConnectivityState>,
    listeners: Mutex<HashMap<u64, Listener>>,
    next_listener_id: AtomicU64,
    edge_senders: Mutex<Vec<mpsc::UnboundedSender<ConnectivityState>>>,
}

impl ConnectivityObserver {
    /// Create a new observer starting offline.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(ConnectivityState::offline()),
            listeners: Mutex::new(HashMap::new()),
            next_listener_id: AtomicU64::new(1),
            edge_senders: Mutex::new(Vec::new()),
        })
    }

    /// Last reported network state.
    pub fn current(&self) -> ConnectivityState {
        self.state
            .read()
            .map(|s| *s)
            .unwrap_or_else(|_| ConnectivityState::offline())
    }

    /// Register a synchronous change listener. Fires on every reported
    /// change, not just edges.
    pub fn on_change(
        self: &Arc<Self>,
        listener: impl Fn(ConnectivityState) + Send + Sync + 'static,
    ) -> ListenerHandle {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.insert(id, Box::new(listener));
        }
        ListenerHandle {
            id,
            observer: Arc::downgrade(self),
        }
    }

    /// Subscribe to offline-to-online transitions only.
    ///
    /// The engine consumes this from its own tokio task, so edge handling
    /// happens in the engine's execution context regardless of which thread
    /// the platform reports from.
    pub fn edges(&self) -> mpsc::UnboundedReceiver<ConnectivityState> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut senders) = self.edge_senders.lock() {
            senders.push(tx);
        }
        rx
    }

    /// Feed a platform network-state change.
    ///
    /// Updates the cached state, invokes listeners, and emits an edge event
    /// when the previous state was offline and the new one is online.
    pub fn report(&self, new_state: ConnectivityState) {
        let was_online = {
            let Ok(mut state) = self.state.write() else {
                warn!("Connectivity state lock poisoned, dropping report");
                return;
            };
            let was_online = state.is_online;
            *state = new_state;
            was_online
        };

        debug!(
            "Connectivity change: online={} connection={:?}",
            new_state.is_online, new_state.connection
        );

        if let Ok(listeners) = self.listeners.lock() {
            for listener in listeners.values() {
                listener(new_state);
            }
        }

        if !was_online && new_state.is_online {
            debug!("Offline-to-online edge");
            if let Ok(mut senders) = self.edge_senders.lock() {
                senders.retain(|tx| tx.send(new_state).is_ok());
            }
        }
    }

    /// Drop all registered listeners and edge subscriptions.
    pub fn detach_all(&self) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.clear();
        }
        if let Ok(mut senders) = self.edge_senders.lock() {
            senders.clear();
        }
    }

    fn remove_listener(&self, id: u64) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.remove(&id);
        }
    }
}

/// Handle for a registered change listener.
///
/// Unsubscription is explicit; dropping the handle leaves the listener
/// registered so platform glue can hold it loosely.
pub struct ListenerHandle {
    id: u64,
    observer: std::sync::Weak<ConnectivityObserver>,
}

impl ListenerHandle {
    /// Remove the listener this handle refers to.
    pub fn unsubscribe(self) {
        if let Some(observer) = self.observer.upgrade() {
            observer.remove_listener(self.id);
        }
    }
}
