//! Durable storage for connection configs.
//!
//! The registry writes the full config list after every mutation, so stores
//! only need whole-list `load` and `save`. The list travels with the next ID
//! sequence, so IDs of removed connections are not handed out again after a
//! restart.

use crate::error::StoreError;
use printlink_core::ConnectionConfig;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// Key of the config list inside the store document.
pub const CONNECTIONS_KEY: &str = "connections";

/// Key of the next ID sequence inside the store document.
pub const NEXT_ID_KEY: &str = "nextId";

/// Everything the registry persists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredConnections {
    /// Configs in insertion order.
    pub configs: Vec<ConnectionConfig>,
    /// Lowest sequence never handed out as an ID, 0 if unknown.
    pub next_id: u64,
}

impl StoredConnections {
    /// Configs with no recorded ID sequence.
    #[must_use]
    pub fn from_configs(configs: Vec<ConnectionConfig>) -> Self {
        Self { configs, next_id: 0 }
    }
}

/// Persistence for the registry's connection configs.
pub trait ConfigStore: Send + Sync {
    /// Load all stored configs in insertion order.
    fn load(&self) -> Result<StoredConnections, StoreError>;

    /// Replace the stored configs.
    fn save(&self, stored: &StoredConnections) -> Result<(), StoreError>;
}

/// Reject lists that contain the same ID twice.
pub(crate) fn check_unique(configs: &[ConnectionConfig]) -> Result<(), StoreError> {
    let mut seen = HashSet::new();
    for config in configs {
        if !seen.insert(&config.id) {
            return Err(StoreError::DuplicateId(config.id.clone()));
        }
    }
    Ok(())
}

/// In-memory store, used by tests and when persistence is disabled.
#[derive(Debug, Default)]
pub struct MemoryStore {
    stored: Mutex<StoredConnections>,
    saves: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store preloaded with configs.
    #[must_use]
    pub fn with_configs(configs: Vec<ConnectionConfig>) -> Self {
        Self {
            stored: Mutex::new(StoredConnections::from_configs(configs)),
            saves: AtomicUsize::new(0),
        }
    }

    fn stored(&self) -> StoredConnections {
        self.stored
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Current stored configs.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ConnectionConfig> {
        self.stored().configs
    }

    /// Stored next ID sequence.
    #[must_use]
    pub fn next_id(&self) -> u64 {
        self.stored().next_id
    }

    /// Number of successful saves.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl ConfigStore for MemoryStore {
    fn load(&self) -> Result<StoredConnections, StoreError> {
        let stored = self.stored();
        check_unique(&stored.configs)?;
        Ok(stored)
    }

    fn save(&self, stored: &StoredConnections) -> Result<(), StoreError> {
        *self.stored.lock().unwrap_or_else(PoisonError::into_inner) = stored.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// JSON document on disk.
///
/// Configs live under the `connections` key and the ID sequence under
/// `nextId`; other top-level keys in the document are preserved on save. A
/// document that cannot be read or parsed is never overwritten. Writes go to a temporary sibling file that
/// is then renamed over the original.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Store backed by `path`. The file need not exist yet.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<Option<Map<String, Value>>, StoreError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&text)?))
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl ConfigStore for JsonFileStore {
    fn load(&self) -> Result<StoredConnections, StoreError> {
        let Some(mut document) = self.read_document()? else {
            debug!(path = %self.path.display(), "No config store yet");
            return Ok(StoredConnections::default());
        };

        let configs: Vec<ConnectionConfig> = match document.remove(CONNECTIONS_KEY) {
            Some(list) => serde_json::from_value(list)?,
            None => Vec::new(),
        };
        check_unique(&configs)?;

        let next_id = match document.remove(NEXT_ID_KEY) {
            Some(value) => serde_json::from_value(value)?,
            None => 0,
        };

        info!(path = %self.path.display(), count = configs.len(), "Loaded connection configs");
        Ok(StoredConnections { configs, next_id })
    }

    fn save(&self, stored: &StoredConnections) -> Result<(), StoreError> {
        let mut document = self.read_document()?.unwrap_or_default();
        document.insert(
            CONNECTIONS_KEY.to_string(),
            serde_json::to_value(&stored.configs)?,
        );
        document.insert(NEXT_ID_KEY.to_string(), Value::from(stored.next_id));

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = self.temp_path();
        std::fs::write(&tmp, serde_json::to_vec_pretty(&document)?)?;
        std::fs::rename(&tmp, &self.path)?;

        debug!(
            path = %self.path.display(),
            count = stored.configs.len(),
            "Saved connection configs"
        );
        Ok(())
    }
}
