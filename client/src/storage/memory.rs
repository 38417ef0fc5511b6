use std::collections::BTreeMap;

use super::{StorageAdapter, StorageError};

/// In-memory backend for tests and as a fallback when no durable store is
/// available. The `BTreeMap` gives the required lexicographic scan order
/// for free.
#[derive(Default)]
pub struct MemoryStorage {
    entries: BTreeMap<String, Vec<u8>>,
    closed: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries; test-visibility helper.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl StorageAdapter for MemoryStorage {
    fn init(&mut self) -> Result<(), StorageError> {
        self.closed = false;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        if self.closed {
            return Err(StorageError::Closed);
        }
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        if self.closed {
            return Err(StorageError::Closed);
        }
        self.entries.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<(), StorageError> {
        if self.closed {
            return Err(StorageError::Closed);
        }
        self.entries.remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        if self.closed {
            return Err(StorageError::Closed);
        }
        Ok(self
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn clear_all(&mut self) -> Result<(), StorageError> {
        if self.closed {
            return Err(StorageError::Closed);
        }
        self.entries.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<(), StorageError> {
        self.closed = true;
        Ok(())
    }
}
