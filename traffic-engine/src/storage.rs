//! Client-side key/value storage scopes
//!
//! Two scopes exist:
//! - **Long-lived**: survives browser restarts. Holds the attribution record,
//!   the `traffic_source_sent` / `analytics_linked` gates and the locale.
//! - **Session**: cleared when the tab closes. Holds `login_tracked`.
//!
//! Each key is written independently; there are no transactions and no
//! cross-process locking.

use crate::error::StorageError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Which storage lifetime a key belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageScope {
    LongLived,
    Session,
}

/// Synchronous string key/value store
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
    /// Drop every key in this store
    fn clear(&self) -> Result<(), StorageError>;
}

fn lock_poisoned() -> StorageError {
    StorageError::Unavailable("storage lock poisoned".to_string())
}

fn used_bytes(entries: &BTreeMap<String, String>) -> usize {
    entries.iter().map(|(k, v)| k.len() + v.len()).sum()
}

fn check_quota(
    entries: &BTreeMap<String, String>,
    key: &str,
    value: &str,
    quota: Option<usize>,
) -> Result<(), StorageError> {
    let Some(limit) = quota else {
        return Ok(());
    };
    let existing = entries.get(key).map(|v| key.len() + v.len()).unwrap_or(0);
    let projected = used_bytes(entries) - existing + key.len() + value.len();
    if projected > limit {
        return Err(StorageError::QuotaExceeded {
            key: key.to_string(),
            limit,
        });
    }
    Ok(())
}

/// In-memory store
///
/// Backs the session scope. `set_available(false)` simulates a browser that
/// blocks storage access entirely.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
    quota: Option<usize>,
    unavailable: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            quota: Some(quota_bytes),
            ..Self::default()
        }
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("storage access blocked".to_string()));
        }
        Ok(())
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.ensure_available()?;
        let entries = self.entries.lock().map_err(|_| lock_poisoned())?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.ensure_available()?;
        let mut entries = self.entries.lock().map_err(|_| lock_poisoned())?;
        check_quota(&entries, key, value, self.quota)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.ensure_available()?;
        let mut entries = self.entries.lock().map_err(|_| lock_poisoned())?;
        entries.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.ensure_available()?;
        let mut entries = self.entries.lock().map_err(|_| lock_poisoned())?;
        entries.clear();
        Ok(())
    }
}

/// Long-lived store persisted as one JSON object file
///
/// Every mutation rewrites the file atomically (temp file + rename). A failed
/// write leaves both the file and the in-memory view unchanged.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
    quota: Option<usize>,
}

impl FileStorage {
    /// Open (or lazily create) the store at `path`
    ///
    /// An unreadable or corrupt file starts the store empty rather than failing.
    pub fn open(path: impl Into<PathBuf>, quota: Option<usize>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Corrupt storage file, starting empty");
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unreadable storage file, starting empty");
                BTreeMap::new()
            }
        };
        debug!(path = %path.display(), keys = entries.len(), "Opened file storage");
        Self {
            path,
            entries: Mutex::new(entries),
            quota,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let content = serde_json::to_string_pretty(entries)
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        let io_err = |e: std::io::Error| StorageError::Unavailable(e.to_string());

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)
    }

    fn mutate(
        &self,
        apply: impl FnOnce(&mut BTreeMap<String, String>) -> Result<(), StorageError>,
    ) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| lock_poisoned())?;
        let mut next = entries.clone();
        apply(&mut next)?;
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().map_err(|_| lock_poisoned())?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let quota = self.quota;
        self.mutate(|entries| {
            check_quota(entries, key, value, quota)?;
            entries.insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.mutate(|entries| {
            entries.remove(key);
            Ok(())
        })
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.mutate(|entries| {
            entries.clear();
            Ok(())
        })
    }
}
