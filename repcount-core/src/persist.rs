//! Key-value persistence for the in-progress session snapshot.
//!
//! The store contract is deliberately tiny (`save`/`load`/`delete` of raw
//! bytes) so hosts can back it with whatever they have. `FileStore` keeps one
//! file per key in the app data directory; `MemoryStore` is for tests and
//! hosts without durable storage.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::warn;

use crate::error::{RepCountError, Result};
use crate::session::{PersistedSnapshot, SNAPSHOT_KEY};

/// Synchronous key-value store.
pub trait SnapshotStore: Send + Sync + 'static {
    fn save(&self, key: &str, bytes: &[u8]) -> Result<()>;
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }
}

impl SnapshotStore for MemoryStore {
    fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.entries.lock().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// One `<key>.json` file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn default_dir() -> PathBuf {
        crate::settings::default_data_dir().join("state")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
            && !key.starts_with('.');
        if !valid {
            return Err(RepCountError::Store(format!("invalid key '{key}'")));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl SnapshotStore for FileStore {
    fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        // Write-then-rename: readers never see a partially written file.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Write `snapshot` under the session key. Failures are logged, never fatal.
pub fn save_snapshot(store: &dyn SnapshotStore, snapshot: &PersistedSnapshot) {
    let result = snapshot
        .to_bytes()
        .and_then(|bytes| store.save(SNAPSHOT_KEY, &bytes));
    if let Err(e) = result {
        warn!("failed to persist session snapshot: {e}");
    }
}

pub fn delete_snapshot(store: &dyn SnapshotStore) {
    if let Err(e) = store.delete(SNAPSHOT_KEY) {
        warn!("failed to delete session snapshot: {e}");
    }
}

/// Read the resumable session, if any.
///
/// Unreadable or invalid snapshots are treated as absent and removed so the
/// host does not offer a resume that cannot work.
pub fn load_snapshot(store: &dyn SnapshotStore) -> Option<PersistedSnapshot> {
    let bytes = match store.load(SNAPSHOT_KEY) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return None,
        Err(e) => {
            warn!("failed to read session snapshot: {e}");
            return None;
        }
    };
    match PersistedSnapshot::from_bytes(&bytes) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            warn!("discarding session snapshot: {e}");
            delete_snapshot(store);
            None
        }
    }
}
