//! Persistent store trait definition.

use async_trait::async_trait;

use driftsync_common::Result;

/// Durable key/value storage for whole-record snapshots.
///
/// The engine persists its queue and cache as two independent records, each
/// overwritten in full on every mutation. Implementations must guarantee that
/// a crash mid-write never leaves a torn record behind.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Get the store name (e.g., "memory", "local").
    fn name(&self) -> &str;

    /// Write the full record for a key, replacing any previous value.
    ///
    /// # Postconditions
    /// - A subsequent `load(key)` returns exactly `bytes`
    ///
    /// # Errors
    /// - I/O or permission errors from the underlying medium
    async fn save(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    /// Read the full record for a key.
    ///
    /// Returns `Ok(None)` when the key has never been saved; absence is not
    /// an error.
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete the record for a key. No-op if absent.
    async fn remove(&self, key: &str) -> Result<()>;
}
