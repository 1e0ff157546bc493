//! Queued actions and the ordered pending-action queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use driftsync_common::{ActionId, ActionKind, Error, Priority, Result, Target};

/// A pending mutation intended for a remote system.
///
/// Created by `enqueue`, mutated only by the drain loop (retry_count
/// increments), and removed exactly once on terminal success or terminal
/// failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedAction {
    /// Stable unique identifier, assigned at enqueue time.
    pub id: ActionId,
    /// Side-effect category; caller bookkeeping only.
    pub kind: ActionKind,
    /// Where the action goes. Opaque to the engine.
    pub target: Target,
    /// Request body. Opaque to the engine.
    pub payload: Vec<u8>,
    /// Enqueue time; FIFO tiebreaker within equal priority.
    pub created_at: DateTime<Utc>,
    /// Failed attempts so far. Monotonically non-decreasing.
    pub retry_count: u32,
    /// Retry ceiling set by the caller at enqueue time.
    pub max_retries: u32,
    /// Drain ordering; never used to drop actions.
    pub priority: Priority,
}

impl QueuedAction {
    /// Create a fresh action with a generated id and zero retries.
    pub fn new(
        kind: ActionKind,
        target: Target,
        payload: Vec<u8>,
        priority: Priority,
        max_retries: u32,
    ) -> Self {
        Self {
            id: ActionId::generate(),
            kind,
            target,
            payload,
            created_at: Utc::now(),
            retry_count: 0,
            max_retries,
            priority,
        }
    }
}

/// Ordered collection of pending actions.
///
/// Insertion order is preserved internally; drain ordering is computed fresh
/// on every snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionQueue {
    actions: Vec<QueuedAction>,
}

impl ActionQueue {
    /// Create a new empty queue.
    pub fn new() -> Self {
        Self {
            actions: Vec::new(),
        }
    }

    /// Append an action.
    ///
    /// # Errors
    /// - Returns error if an action with the same id is already queued
    pub fn push(&mut self, action: QueuedAction) -> Result<()> {
        if self.actions.iter().any(|a| a.id == action.id) {
            return Err(Error::InvalidInput(format!(
                "Action {} is already queued",
                action.id
            )));
        }
        self.actions.push(action);
        Ok(())
    }

    /// Remove an action by id. Returns whether anything was removed;
    /// removing an absent id is a no-op.
    pub fn remove(&mut self, id: &ActionId) -> bool {
        let before = self.actions.len();
        self.actions.retain(|a| &a.id != id);
        self.actions.len() != before
    }

    /// Remove every action whose id appears in the given set.
    pub fn remove_all(&mut self, ids: &[ActionId]) {
        self.actions.retain(|a| !ids.contains(&a.id));
    }

    /// Increment the retry count for an action. Returns the new count, or
    /// `None` if the action is no longer queued.
    pub fn bump_retry(&mut self, id: &ActionId) -> Option<u32> {
        let action = self.actions.iter_mut().find(|a| &a.id == id)?;
        action.retry_count += 1;
        Some(action.retry_count)
    }

    /// Look up an action by id.
    pub fn get(&self, id: &ActionId) -> Option<&QueuedAction> {
        self.actions.iter().find(|a| &a.id == id)
    }

    /// Number of pending actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Ordered snapshot for a drain pass: priority rank descending, then
    /// creation time ascending within equal priority. The sort is stable and
    /// recomputed on every call.
    pub fn snapshot(&self) -> Vec<QueuedAction> {
        let mut snapshot = self.actions.clone();
        snapshot.sort_by(|a, b| {
            b.priority
                .rank()
                .cmp(&a.priority.rank())
                .then(a.created_at.cmp(&b.created_at))
        });
        snapshot
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }
}
