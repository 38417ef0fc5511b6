use std::cell::RefCell;
use std::rc::Rc;

use meshmap_client::{MemoryStorage, StorageAdapter, StorageError};

/// Storage spy for restart scenarios: every handle cloned from the same
/// `SharedStorage` sees the same underlying map, so a successor engine can
/// rehydrate what its predecessor persisted. Also records every mutating
/// call for assertions on persistence behaviour.
#[derive(Clone)]
pub struct SharedStorage {
    inner: Rc<RefCell<MemoryStorage>>,
    log: Rc<RefCell<Vec<String>>>,
}

impl SharedStorage {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(MemoryStorage::new())),
            log: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Another handle onto the same backing map.
    pub fn handle(&self) -> Self {
        self.clone()
    }

    /// Mutating calls recorded so far, oldest first, as `"set key"` /
    /// `"delete key"` / `"clear"` strings.
    pub fn call_log(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    pub fn stored(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.borrow().get(key).ok().flatten()
    }

    pub fn stored_len(&self) -> usize {
        self.inner.borrow().len()
    }
}

impl Default for SharedStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageAdapter for SharedStorage {
    fn init(&mut self) -> Result<(), StorageError> {
        self.inner.borrow_mut().init()
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.borrow().get(key)
    }

    fn set(&mut self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.log.borrow_mut().push(format!("set {}", key));
        self.inner.borrow_mut().set(key, bytes)
    }

    fn delete(&mut self, key: &str) -> Result<(), StorageError> {
        self.log.borrow_mut().push(format!("delete {}", key));
        self.inner.borrow_mut().delete(key)
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        self.inner.borrow().scan_prefix(prefix)
    }

    fn clear_all(&mut self) -> Result<(), StorageError> {
        self.log.borrow_mut().push("clear".to_string());
        self.inner.borrow_mut().clear_all()
    }

    fn close(&mut self) -> Result<(), StorageError> {
        self.inner.borrow_mut().close()
    }
}
