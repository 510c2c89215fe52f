//! Key/value JSON persistence with a shrink-and-retry policy for bounded
//! collections that hit the storage quota.

pub mod memory;
pub mod sqlite;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

/// Key of the persisted history (newest first, at most 3 entries).
pub const HISTORY_KEY: &str = "weldmaster_history_v2";
/// Key of the persisted saved machines (newest first, at most 3 entries).
pub const SAVED_MACHINES_KEY: &str = "weld_history";
/// Key of the persisted language preference.
pub const LANGUAGE_KEY: &str = "weldmaster_lang";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage quota exceeded writing '{key}': {required} bytes needed, {available} available")]
    QuotaExceeded {
        key: String,
        required: usize,
        available: usize,
    },

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Failed to serialize '{key}': {message}")]
    Serialize { key: String, message: String },
}

/// Raw string storage. Implementations enforce their own capacity and
/// report it as [`StorageError::QuotaExceeded`].
pub trait StorageBackend: Send {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn write(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;
    fn clear(&mut self) -> Result<(), StorageError>;
}

/// How a newest-first collection is shrunk after a quota failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Keep only the newest element.
    #[default]
    KeepMostRecent,
    /// Keep the newest half, rounded up.
    KeepNewestHalf,
    /// Drop the single oldest element.
    DropOldest,
}

impl EvictionPolicy {
    /// Number of leading (newest) elements to keep out of `len`.
    pub fn retain_count(&self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        match self {
            EvictionPolicy::KeepMostRecent => 1,
            EvictionPolicy::KeepNewestHalf => len.div_ceil(2),
            EvictionPolicy::DropOldest => len.saturating_sub(1).max(1),
        }
    }
}

pub struct PersistentStore {
    backend: Box<dyn StorageBackend>,
    policy: EvictionPolicy,
}

impl PersistentStore {
    pub fn new(backend: impl StorageBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            policy: EvictionPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: EvictionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Ephemeral store without a quota.
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Serialize and write a value. Quota failures are returned as-is.
    pub fn save<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<(), StorageError> {
        let json = to_json(key, value)?;
        self.backend.write(key, &json)
    }

    /// Write a newest-first collection. On a quota failure the collection is
    /// shrunk by the eviction policy and written once more.
    ///
    /// Returns the elements that were actually stored, so callers can keep
    /// their in-memory copy identical to storage.
    pub fn save_bounded<T: Serialize + Clone>(
        &mut self,
        key: &str,
        items: &[T],
    ) -> Result<Vec<T>, StorageError> {
        let json = to_json(key, items)?;
        match self.backend.write(key, &json) {
            Ok(()) => Ok(items.to_vec()),
            Err(StorageError::QuotaExceeded { required, available, .. }) => {
                let keep = self.policy.retain_count(items.len());
                if keep >= items.len() {
                    error!(
                        "Quota exceeded for '{}' and nothing left to evict ({} > {} bytes)",
                        key, required, available
                    );
                    return Err(StorageError::QuotaExceeded {
                        key: key.to_string(),
                        required,
                        available,
                    });
                }

                warn!(
                    "Quota exceeded for '{}' ({} > {} bytes), keeping {} of {} entries",
                    key,
                    required,
                    available,
                    keep,
                    items.len()
                );
                let reduced = items[..keep].to_vec();
                let json = to_json(key, &reduced)?;
                self.backend.write(key, &json)?;
                Ok(reduced)
            }
            Err(e) => Err(e),
        }
    }

    /// Read and deserialize a value. Unreadable or unparseable values are
    /// logged and reported as absent.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.backend.read(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                error!("Failed to read '{}': {}", key, e);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Discarding unparseable value for '{}': {}", key, e);
                None
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.backend.remove(key)
    }

    /// Wipe every key. Callers reset their in-memory copies afterwards.
    pub fn clear(&mut self) -> Result<(), StorageError> {
        self.backend.clear()?;
        info!("Cleared persistent store");
        Ok(())
    }
}

fn to_json<T: Serialize + ?Sized>(key: &str, value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|e| StorageError::Serialize {
        key: key.to_string(),
        message: e.to_string(),
    })
}
