use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Storage key holding the bearer credential
pub const TOKEN_KEY: &str = "token";

/// Storage key holding the display identity
pub const USERNAME_KEY: &str = "username";

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

/// Flat string key-value surface that outlives the process.
///
/// Implementations must treat a missing key as `Ok(None)` and removing a
/// missing key as success.
pub trait SessionStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// JSON file in the cache directory, rewritten on every change.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(cache_dir: impl AsRef<Path>) -> Self {
        Self {
            path: cache_dir.as_ref().join(SESSION_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_contents(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path)
            .context("Failed to read session file")?;
        Ok(Some(contents))
    }

    fn parse(contents: &str) -> Result<BTreeMap<String, String>> {
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(contents).context("Failed to parse session file")
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        match self.read_contents()? {
            Some(contents) => Self::parse(&contents),
            None => Ok(BTreeMap::new()),
        }
    }

    /// Entries to modify and write back. An unparsable file is discarded so
    /// the next write replaces it instead of failing forever.
    fn read_for_update(&self) -> Result<BTreeMap<String, String>> {
        let Some(contents) = self.read_contents()? else {
            return Ok(BTreeMap::new());
        };
        match Self::parse(&contents) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!(error = %e, path = ?self.path, "Discarding unreadable session file");
                Ok(BTreeMap::new())
            }
        }
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if entries.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path).context("Failed to remove session file")?;
            }
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, contents).context("Failed to write session file")?;
        Ok(())
    }
}

impl SessionStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.read_for_update()?;
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries)?;
        debug!(key, path = ?self.path, "Session entry stored");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.read_for_update()?;
        entries.remove(key);
        self.write_all(&entries)
    }
}

/// Process-local storage. Clones share the same map, so a test can keep a
/// handle and inspect what the session store wrote.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed storage with a credential and identity, as a previous run would.
    pub fn with_session(token: &str, username: &str) -> Self {
        let storage = Self::new();
        {
            let mut entries = storage.lock();
            entries.insert(TOKEN_KEY.to_string(), token.to_string());
            entries.insert(USERNAME_KEY.to_string(), username.to_string());
        }
        storage
    }

    pub fn snapshot(&self) -> HashMap<String, String> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        // A panic while holding this lock cannot leave the map half-written
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SessionStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_storage_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        assert_eq!(storage.get(TOKEN_KEY).unwrap(), None);
        // Removing from an empty store is not an error
        storage.remove(TOKEN_KEY).unwrap();
    }

    #[test]
    fn test_file_storage_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("nested"));
        storage.set(TOKEN_KEY, "tok1").unwrap();
        storage.set(USERNAME_KEY, "alice").unwrap();

        let reopened = FileStorage::new(dir.path().join("nested"));
        assert_eq!(reopened.get(TOKEN_KEY).unwrap().as_deref(), Some("tok1"));
        assert_eq!(reopened.get(USERNAME_KEY).unwrap().as_deref(), Some("alice"));
    }

    #[test]
    fn test_file_storage_removes_file_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        storage.set(TOKEN_KEY, "tok1").unwrap();
        assert!(storage.path().exists());

        storage.remove(TOKEN_KEY).unwrap();
        assert!(!storage.path().exists());
    }

    #[test]
    fn test_file_storage_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        std::fs::write(storage.path(), "not json").unwrap();
        assert!(storage.get(TOKEN_KEY).is_err());
    }

    #[test]
    fn test_file_storage_set_replaces_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        std::fs::write(storage.path(), "{garbage").unwrap();

        storage.set(TOKEN_KEY, "tok1").unwrap();
        assert_eq!(storage.get(TOKEN_KEY).unwrap().as_deref(), Some("tok1"));
    }

    #[test]
    fn test_file_storage_remove_clears_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        std::fs::write(storage.path(), "{garbage").unwrap();

        storage.remove(TOKEN_KEY).unwrap();
        assert!(!storage.path().exists());
        assert_eq!(storage.get(TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_memory_storage_clones_share_state() {
        let storage = MemoryStorage::new();
        let handle = storage.clone();
        storage.set(USERNAME_KEY, "bob").unwrap();
        assert_eq!(handle.get(USERNAME_KEY).unwrap().as_deref(), Some("bob"));

        handle.remove(USERNAME_KEY).unwrap();
        assert!(storage.snapshot().is_empty());
    }
}
