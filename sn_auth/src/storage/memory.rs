//! A process-local key-value storage

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use super::{KeyValueStorage, StorageError};

/// An in-memory key-value storage
///
/// Clones share the same underlying table, so one instance can be handed to
/// several token stores to mimic a storage area shared by multiple clients.
/// The contents are lost when the process exits.
#[derive(Clone, Debug, Default)]
pub struct MemoryStorage {
    items: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    /// Constructs a new, empty storage
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of stored entries
    pub fn len(&self) -> usize {
        self.lock().map(|items| items.len()).unwrap_or_default()
    }

    /// Whether the storage holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, String>>, StorageError> {
        self.items
            .lock()
            .map_err(|_| StorageError::Unavailable("in-memory storage lock poisoned".to_owned()))
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.lock()?.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.lock()?.remove(key);
        Ok(())
    }
}
