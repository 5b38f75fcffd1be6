//! Key-value storage of JSON blobs with change notification.
//!
//! The weather cache and preferences only talk to [`KeyValueStore`]; the
//! engine behind it is supplied by the host. Two engines ship here: an
//! in-memory store for tests and embedding, and a directory of files for the
//! command-line host.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use headwind_core::StorageError;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;

/// Live view of one key. The current value is always readable; `changed()`
/// resolves on every subsequent `set`.
pub type ValueWatch = watch::Receiver<Option<Vec<u8>>>;

/// Persisted blob storage. Implementations serialize their own writes.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

    fn watch(&self, key: &str) -> ValueWatch;
}

/// Serialize `value` as the JSON blob stored under `key`.
pub fn encode_json<T: Serialize>(key: &str, value: &T) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(value).map_err(|e| StorageError::Encode {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// Decode the JSON blob stored under `key`. Unknown fields are ignored.
pub fn decode_json<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T, StorageError> {
    serde_json::from_slice(bytes).map_err(|e| StorageError::Corrupt {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// In-memory store; values live as long as the store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, watch::Sender<Option<Vec<u8>>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self
            .entries
            .lock()
            .get(key)
            .and_then(|sender| sender.borrow().clone()))
    }

    fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(sender) => {
                sender.send_replace(Some(value));
            }
            None => {
                let (sender, _) = watch::channel(Some(value));
                entries.insert(key.to_string(), sender);
            }
        }
        Ok(())
    }

    fn watch(&self, key: &str) -> ValueWatch {
        self.entries
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }
}

/// One file per key inside a directory.
///
/// Writes go to a temporary file that is renamed into place, so a crash mid-write
/// leaves the previous value intact. Change notification covers writes made
/// through this instance only.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    watchers: Mutex<HashMap<String, watch::Sender<Option<Vec<u8>>>>>,
}

impl FileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StorageError::Io {
            key: dir.display().to_string(),
            message: e.to_string(),
        })?;
        tracing::debug!("Opened file store at {}", dir.display());

        Ok(Self {
            dir,
            watchers: Mutex::new(HashMap::new()),
        })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StorageError::Io {
                key: key.to_string(),
                message: "key must be alphanumeric".to_string(),
            });
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io {
                key: key.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.read(key)
    }

    fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        let io_err = |e: std::io::Error| StorageError::Io {
            key: key.to_string(),
            message: e.to_string(),
        };

        // Held across the write so watchers observe writes in order.
        let watchers = self.watchers.lock();
        fs::write(&tmp, &value).map_err(io_err)?;
        fs::rename(&tmp, &path).map_err(io_err)?;

        if let Some(sender) = watchers.get(key) {
            sender.send_replace(Some(value));
        }
        Ok(())
    }

    fn watch(&self, key: &str) -> ValueWatch {
        let mut watchers = self.watchers.lock();
        if let Some(sender) = watchers.get(key) {
            return sender.subscribe();
        }

        let current = match self.read(key) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Failed to read {} for watching: {}", key, e);
                None
            }
        };
        let (sender, receiver) = watch::channel(current);
        watchers.insert(key.to_string(), sender);
        receiver
    }
}
