use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::SessionError;

/// Storage key for the session identifier.
pub const SESSION_ID_KEY: &str = "session_id";

/// Storage key for the active dataset (file) identifier.
pub const ACTIVE_DATASET_KEY: &str = "active_file_id";

/// Identifiers that scope every backend call.
///
/// Created on the first successful upload and passed explicitly to the
/// mutation engine and chart generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Session identifier assigned by the backend
    pub session_id: String,

    /// Dataset the editor and charts currently target; `None` means the
    /// backend's default (most recently uploaded) dataset
    pub active_dataset_id: Option<String>,
}

impl Session {
    pub fn new(session_id: impl Into<String>) -> Self {
        Session {
            session_id: session_id.into(),
            active_dataset_id: None,
        }
    }

    pub fn with_dataset(mut self, dataset_id: impl Into<String>) -> Self {
        self.active_dataset_id = Some(dataset_id.into());
        self
    }

    /// Reads the session from durable storage.
    ///
    /// # Returns
    /// * `Ok(None)` when no session key is stored; the caller should send
    ///   the user to the upload entry point
    pub fn load(store: &dyn SessionStore) -> Result<Option<Session>, SessionError> {
        let Some(session_id) = store.get(SESSION_ID_KEY)? else {
            return Ok(None);
        };
        if session_id.trim().is_empty() {
            return Ok(None);
        }
        let active_dataset_id = store
            .get(ACTIVE_DATASET_KEY)?
            .filter(|id| !id.trim().is_empty());
        Ok(Some(Session {
            session_id,
            active_dataset_id,
        }))
    }

    /// Writes both well-known keys. A missing dataset id clears its key.
    pub fn save(&self, store: &dyn SessionStore) -> Result<(), SessionError> {
        store.set(SESSION_ID_KEY, &self.session_id)?;
        match &self.active_dataset_id {
            Some(id) => store.set(ACTIVE_DATASET_KEY, id),
            None => store.remove(ACTIVE_DATASET_KEY),
        }
    }

    /// Removes the session from durable storage.
    pub fn clear(store: &dyn SessionStore) -> Result<(), SessionError> {
        store.remove(SESSION_ID_KEY)?;
        store.remove(ACTIVE_DATASET_KEY)
    }
}

/// Durable key/value storage for the session context.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, SessionError>;
    fn set(&self, key: &str, value: &str) -> Result<(), SessionError>;
    fn remove(&self, key: &str) -> Result<(), SessionError>;
}

/// Process-local store, for tests and embedders that manage durability
/// themselves.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Result<Option<String>, SessionError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SessionError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SessionError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    entries: HashMap<String, String>,
    updated_at: Option<DateTime<Utc>>,
}

/// JSON file store. Every write rewrites the whole file.
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
    lock: RwLock<()>,
}

impl FileSessionStore {
    /// Opens (without creating) a store at `path`. The file and its parent
    /// directory are created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSessionStore {
            path: path.into(),
            lock: RwLock::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(&self) -> Result<StoreFile, SessionError> {
        if !self.path.exists() {
            return Ok(StoreFile::default());
        }
        let contents = fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(StoreFile::default());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    fn write_file(&self, mut data: StoreFile) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                create_dir_all(parent)?;
            }
        }
        data.updated_at = Some(Utc::now());
        let json = serde_json::to_string_pretty(&data)?;
        let mut file = File::create(&self.path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    fn update(&self, f: impl FnOnce(&mut HashMap<String, String>)) -> Result<(), SessionError> {
        let _guard = self.lock.write().unwrap_or_else(|e| e.into_inner());
        let mut data = self.read_file()?;
        f(&mut data.entries);
        self.write_file(data)
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self, key: &str) -> Result<Option<String>, SessionError> {
        let _guard = self.lock.read().unwrap_or_else(|e| e.into_inner());
        Ok(self.read_file()?.entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SessionError> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), SessionError> {
        self.update(|entries| {
            entries.remove(key);
        })
    }
}
