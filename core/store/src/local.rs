//! Local filesystem persistent store.

use async_trait::async_trait;
use percent_encoding::{percent_encode, AsciiSet, CONTROLS};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::store::PersistentStore;
use driftsync_common::{Error, Result};

/// Characters that may not appear in a record file name.
const KEY_ESCAPE: &AsciiSet = &CONTROLS.add(b'/').add(b'\\').add(b':').add(b' ');

/// Local filesystem persistent store.
///
/// Stores one file per key under a root directory. Writes go to a `.tmp`
/// sibling first and are moved into place with a rename, so a crash never
/// leaves a torn record.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Create a new local store rooted at the given directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Invalid path
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self { root })
    }

    /// Map a record key to its file path.
    fn record_path(&self, key: &str) -> PathBuf {
        let escaped = percent_encode(key.as_bytes(), KEY_ESCAPE).to_string();
        self.root.join(format!("{escaped}.json"))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        let escaped = percent_encode(key.as_bytes(), KEY_ESCAPE).to_string();
        self.root.join(format!("{escaped}.json.tmp"))
    }
}

#[async_trait]
impl PersistentStore for LocalStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn save(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let tmp = self.temp_path(key);
        let path = self.record_path(key);

        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &path).await?;

        debug!("Persisted {} bytes under {}", bytes.len(), key);
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.record_path(key);

        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.record_path(key);

        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}
