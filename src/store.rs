//! Document Store
//!
//! Whole-document JSON persistence for the four bot collections.
//! There is no indexing and no partial update: every mutation rewrites
//! the collection. Backends are swappable ([`JsonFileStore`] on disk,
//! [`MemoryStore`] for tests) behind the [`DocumentStore`] trait, and
//! components talk to them through the typed [`Documents`] façade.

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Logical collections, one file each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Users,
    Codes,
    Settings,
    ChatHistory,
}

impl Collection {
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Users => "users.json",
            Self::Codes => "codes.json",
            Self::Settings => "settings.json",
            Self::ChatHistory => "chat_history.json",
        }
    }
}

/// Raw document backend
pub trait DocumentStore: Send + Sync {
    /// Read a collection; `Ok(None)` when it was never written
    fn read(&self, collection: Collection) -> Result<Option<String>, StoreError>;

    /// Replace a collection's contents
    fn write(&self, collection: Collection, contents: &str) -> Result<(), StoreError>;
}

/// One JSON file per collection inside a data directory
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, collection: Collection) -> PathBuf {
        self.dir.join(collection.file_name())
    }
}

impl DocumentStore for JsonFileStore {
    fn read(&self, collection: Collection) -> Result<Option<String>, StoreError> {
        let path = self.path(collection);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read_to_string(&path)?))
    }

    fn write(&self, collection: Collection, contents: &str) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir)?;

        // Write atomically via temp file
        let path = self.path(collection);
        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, contents)?;
        std::fs::rename(&temp_path, &path)?;
        Ok(())
    }
}

/// In-memory backend
#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<Collection, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for MemoryStore {
    fn read(&self, collection: Collection) -> Result<Option<String>, StoreError> {
        Ok(self.docs.lock().get(&collection).cloned())
    }

    fn write(&self, collection: Collection, contents: &str) -> Result<(), StoreError> {
        self.docs.lock().insert(collection, contents.to_string());
        Ok(())
    }
}

/// Typed access to the document backend
///
/// Reads never fail: a missing, unreadable or unparsable document is logged
/// and replaced by `T::default()`. Writes are logged on failure and not
/// propagated. [`Documents::update`] serializes read-modify-write cycles
/// inside the process so concurrent handlers cannot drop each other's changes.
#[derive(Clone)]
pub struct Documents {
    backend: Arc<dyn DocumentStore>,
    write_lock: Arc<Mutex<()>>,
}

impl Documents {
    pub fn new(backend: Arc<dyn DocumentStore>) -> Self {
        Self {
            backend,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// File-backed documents under `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(JsonFileStore::new(dir)))
    }

    /// Fresh in-memory documents
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Load a collection, falling back to its default
    pub fn load<T>(&self, collection: Collection) -> T
    where
        T: DeserializeOwned + Default,
    {
        match self.backend.read(collection) {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(doc) => doc,
                Err(e) => {
                    error!("Failed to parse {}: {}", collection.file_name(), e);
                    T::default()
                }
            },
            Ok(None) => {
                debug!("{} not found, using defaults", collection.file_name());
                T::default()
            }
            Err(e) => {
                error!("Failed to read {}: {}", collection.file_name(), e);
                T::default()
            }
        }
    }

    /// Overwrite a collection
    pub fn save<T>(&self, collection: Collection, doc: &T)
    where
        T: Serialize,
    {
        let result = serde_json::to_string_pretty(doc)
            .map_err(StoreError::from)
            .and_then(|raw| self.backend.write(collection, &raw));

        if let Err(e) = result {
            error!("Failed to write {}: {}", collection.file_name(), e);
        }
    }

    /// Load, mutate and save a collection under the write lock
    pub fn update<T, R, F>(&self, collection: Collection, f: F) -> R
    where
        T: DeserializeOwned + Serialize + Default,
        F: FnOnce(&mut T) -> R,
    {
        let _guard = self.write_lock.lock();
        let mut doc: T = self.load(collection);
        let result = f(&mut doc);
        self.save(collection, &doc);
        result
    }

    /// Current settings document
    pub fn settings(&self) -> crate::models::Settings {
        self.load(Collection::Settings)
    }

    /// Mutate the settings document
    pub fn update_settings<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut crate::models::Settings) -> R,
    {
        self.update(Collection::Settings, f)
    }
}

/// Make sure the data directory exists before the first write
pub fn ensure_data_dir(dir: &Path) -> Result<(), StoreError> {
    if !dir.exists() {
        warn!("Data directory {} missing, creating it", dir.display());
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Settings, UsersDocument};
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_loads_default() {
        let temp = TempDir::new().unwrap();
        let docs = Documents::open(temp.path());
        let settings = docs.settings();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_corrupt_file_loads_default() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("users.json"), "{not json").unwrap();
        let docs = Documents::open(temp.path());
        let users: UsersDocument = docs.load(Collection::Users);
        assert!(users.users.is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let temp = TempDir::new().unwrap();
        let docs = Documents::open(temp.path().join("nested"));
        docs.update_settings(|s| s.ai_enabled = false);

        let reopened = Documents::open(temp.path().join("nested"));
        assert!(!reopened.settings().ai_enabled);
        assert!(!temp.path().join("nested/settings.json.tmp").exists());
    }

    #[test]
    fn test_written_json_is_readable_utf8() {
        let temp = TempDir::new().unwrap();
        let docs = Documents::open(temp.path());
        docs.update_settings(|s| s.welcome_message = "Xush kelibsiz! 👋".to_string());

        let raw = std::fs::read_to_string(temp.path().join("settings.json")).unwrap();
        assert!(raw.contains("Xush kelibsiz! 👋"));
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let docs = Documents::in_memory();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let docs = docs.clone();
                std::thread::spawn(move || {
                    docs.update(Collection::Users, |doc: &mut UsersDocument| {
                        doc.users.insert(i.to_string(), Default::default());
                    });
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let users: UsersDocument = docs.load(Collection::Users);
        assert_eq!(users.users.len(), 8);
    }
}
