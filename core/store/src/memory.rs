//! In-memory persistent store for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::store::PersistentStore;
use driftsync_common::{Error, Result};

/// In-memory persistent store.
///
/// Useful for testing and development. Cloning shares the underlying map, so
/// a fresh engine built over a clone sees the same records - which is how
/// tests simulate a process restart.
#[derive(Clone)]
pub struct MemoryStore {
    records: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Check if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn save(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| Error::Persistence("Store lock poisoned".to_string()))?;
        records.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let records = self
            .records
            .read()
            .map_err(|_| Error::Persistence("Store lock poisoned".to_string()))?;
        Ok(records.get(key).cloned())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| Error::Persistence("Store lock poisoned".to_string()))?;
        records.remove(key);
        Ok(())
    }
}
