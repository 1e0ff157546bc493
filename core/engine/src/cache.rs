//! Expiring key/value cache for short-lived read data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use driftsync_common::{Error, Result};

/// A single cached value with optional expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Caller-chosen key.
    pub key: String,
    /// Opaque blob.
    pub value: Vec<u8>,
    /// Write timestamp.
    pub stored_at: DateTime<Utc>,
    /// Absent means the entry never expires by time.
    pub expires_at: Option<DateTime<Utc>>,
    /// Bumped on every write to the same key, for optimistic consumers.
    pub version: u64,
}

impl CacheEntry {
    /// Whether the entry has passed its expiry at the given instant.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now > expires_at,
            None => false,
        }
    }
}

/// In-memory expiring cache.
///
/// The engine owns persistence and the clock; every method takes `now`
/// explicitly so expiry is testable against a simulated clock.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpiringCache {
    entries: HashMap<String, CacheEntry>,
}

impl ExpiringCache {
    /// Create a new empty cache.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Overwrite an entry, bumping its version. A `ttl` of `None` clears any
    /// previous expiry. Returns the new version.
    pub fn put(
        &mut self,
        key: impl Into<String>,
        value: Vec<u8>,
        ttl: Option<Duration>,
        now: DateTime<Utc>,
    ) -> u64 {
        let key = key.into();
        let version = self.entries.get(&key).map(|e| e.version + 1).unwrap_or(1);
        let expires_at = ttl.and_then(|ttl| {
            chrono::Duration::from_std(ttl)
                .ok()
                .map(|ttl| now + ttl)
        });

        self.entries.insert(
            key.clone(),
            CacheEntry {
                key,
                value,
                stored_at: now,
                expires_at,
                version,
            },
        );
        version
    }

    /// Read an entry. An expired entry is lazily evicted and reads as a miss;
    /// the second tuple field reports whether an eviction happened so the
    /// caller can persist.
    pub fn get(&mut self, key: &str, now: DateTime<Utc>) -> (Option<Vec<u8>>, bool) {
        match self.entries.get(key) {
            None => (None, false),
            Some(entry) if entry.is_expired(now) => {
                debug!("Cache entry {} expired, evicting", key);
                self.entries.remove(key);
                (None, true)
            }
            Some(entry) => (Some(entry.value.clone()), false),
        }
    }

    /// Current version of an entry, ignoring expiry.
    pub fn version(&self, key: &str) -> Option<u64> {
        self.entries.get(key).map(|e| e.version)
    }

    /// Remove every expired entry. Returns the number evicted.
    pub fn evict_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of entries, including not-yet-evicted expired ones.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a key is present, ignoring expiry.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
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
