use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use super::types::{HistoryEntry, Keyed, SavedMachineEntry};
use crate::storage::{PersistentStore, StorageError, HISTORY_KEY, SAVED_MACHINES_KEY};

/// Number of entries kept in each log.
pub const LOG_CAPACITY: usize = 3;

/// Newest-first log of at most `capacity` entries, mirrored in memory and
/// persisted under a single key.
///
/// The in-memory copy always equals what the store accepted: when a write is
/// shrunk under quota pressure, the mirror shrinks with it; when a write fails
/// outright, the mirror keeps its previous value.
#[derive(Debug, Clone)]
pub struct BoundedLog<T> {
    key: &'static str,
    capacity: usize,
    entries: Vec<T>,
}

pub type HistoryLog = BoundedLog<HistoryEntry>;
pub type SavedMachineLog = BoundedLog<SavedMachineEntry>;

impl<T> BoundedLog<T>
where
    T: Serialize + DeserializeOwned + Clone + Keyed,
{
    /// Load the log stored under `key`, truncated to `capacity`.
    pub fn load(key: &'static str, capacity: usize, store: &PersistentStore) -> Self {
        let mut entries: Vec<T> = store.load(key).unwrap_or_default();
        entries.truncate(capacity);
        info!("Loaded {} entries from '{}'", entries.len(), key);
        Self {
            key,
            capacity,
            entries,
        }
    }

    pub fn key(&self) -> &'static str {
        self.key
    }

    pub fn entries(&self) -> &[T] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first(&self) -> Option<&T> {
        self.entries.first()
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.entries.iter().find(|e| e.id() == id)
    }

    /// Insert at the front, dropping the oldest entries beyond capacity.
    pub fn prepend(&mut self, entry: T, store: &mut PersistentStore) -> Result<(), StorageError> {
        let mut updated = Vec::with_capacity(self.capacity);
        updated.push(entry);
        updated.extend(self.entries.iter().cloned());
        updated.truncate(self.capacity);
        self.persist(updated, store)
    }

    /// Modify the newest entry in place. Returns false when the log is empty.
    pub fn update_first(
        &mut self,
        store: &mut PersistentStore,
        update: impl FnOnce(&mut T),
    ) -> Result<bool, StorageError> {
        let Some(first) = self.entries.first() else {
            return Ok(false);
        };
        let mut updated = self.entries.clone();
        let mut head = first.clone();
        update(&mut head);
        updated[0] = head;
        self.persist(updated, store)?;
        Ok(true)
    }

    /// Remove the entry with `id`. Returns false when there is none.
    pub fn remove(&mut self, id: &str, store: &mut PersistentStore) -> Result<bool, StorageError> {
        if self.get(id).is_none() {
            return Ok(false);
        }
        let updated = self
            .entries
            .iter()
            .filter(|e| e.id() != id)
            .cloned()
            .collect();
        self.persist(updated, store)?;
        Ok(true)
    }

    /// Drop every entry and the persisted key.
    pub fn clear(&mut self, store: &mut PersistentStore) -> Result<(), StorageError> {
        store.remove(self.key)?;
        self.entries.clear();
        Ok(())
    }

    /// Forget the in-memory entries after the whole store was wiped.
    pub fn reset_mirror(&mut self) {
        self.entries.clear();
    }

    fn persist(&mut self, updated: Vec<T>, store: &mut PersistentStore) -> Result<(), StorageError> {
        self.entries = store.save_bounded(self.key, &updated)?;
        Ok(())
    }
}

impl HistoryLog {
    pub fn load_history(store: &PersistentStore) -> Self {
        Self::load(HISTORY_KEY, LOG_CAPACITY, store)
    }
}

impl SavedMachineLog {
    pub fn load_saved_machines(store: &PersistentStore) -> Self {
        Self::load(SAVED_MACHINES_KEY, LOG_CAPACITY, store)
    }
}
