//! Derived engine state and the subscriber notification channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use driftsync_common::{ActionId, ConnectionType};

/// Snapshot of the engine, recomputed on every mutation.
///
/// Derived, never stored: queue size and connectivity always reflect the
/// in-memory source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineState {
    pub is_online: bool,
    pub connection: ConnectionType,
    pub queue_size: usize,
    pub last_sync_time: Option<DateTime<Utc>>,
}

/// Notification pushed to subscribers.
///
/// Terminal per-action outcomes ride the same channel as state updates so the
/// caller has a single place to observe the engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// The derived state changed (queue size, connectivity, last sync time).
    StateChanged(EngineState),
    /// An action was executed and removed from the queue.
    ActionSucceeded { id: ActionId },
    /// An action reached a terminal failure: non-retryable, or retries
    /// exhausted. It has been removed from the queue and will not be
    /// attempted again.
    ActionFailed { id: ActionId, message: String },
    /// A persistence write failed; in-memory state remains authoritative and
    /// the next mutation will re-attempt the save.
    PersistenceFailed { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_state_serialization() {
        let state = EngineState {
            is_online: true,
            connection: ConnectionType::Wifi,
            queue_size: 3,
            last_sync_time: Some(Utc::now()),
        };

        let json = serde_json::to_string(&state).unwrap();
        let restored: EngineState = serde_json::from_str(&json).unwrap();

        assert_eq!(restored, state);
    }
}
