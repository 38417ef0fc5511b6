use std::path::Path;

use log::warn;

use super::{StorageAdapter, StorageError};

/// Durable backend on sled. Each workspace gets its own tree, which is the
/// per-workspace partition required when several engines share one
/// database file.
pub struct SledStorage {
    db: sled::Db,
    tree: sled::Tree,
}

impl SledStorage {
    pub fn open(path: impl AsRef<Path>, workspace_id: &str) -> Result<Self, StorageError> {
        let db = sled::open(path).map_err(backend)?;
        let tree = db.open_tree(workspace_id.as_bytes()).map_err(backend)?;
        Ok(Self { db, tree })
    }
}

fn backend(err: sled::Error) -> StorageError {
    StorageError::Backend {
        detail: err.to_string(),
    }
}

impl StorageAdapter for SledStorage {
    fn init(&mut self) -> Result<(), StorageError> {
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self
            .tree
            .get(key.as_bytes())
            .map_err(backend)?
            .map(|ivec| ivec.to_vec()))
    }

    fn set(&mut self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.tree
            .insert(key.as_bytes(), bytes)
            .map(|_| ())
            .map_err(backend)
    }

    fn delete(&mut self, key: &str) -> Result<(), StorageError> {
        self.tree
            .remove(key.as_bytes())
            .map(|_| ())
            .map_err(backend)
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let mut out = Vec::new();
        for item in self.tree.scan_prefix(prefix.as_bytes()) {
            let (key, value) = item.map_err(backend)?;
            match String::from_utf8(key.to_vec()) {
                Ok(key) => out.push((key, value.to_vec())),
                Err(_) => {
                    // Only UTF-8 keys are ever written; anything else is
                    // foreign data sharing the tree.
                    warn!("skipping non-utf8 key in workspace tree");
                }
            }
        }
        Ok(out)
    }

    fn clear_all(&mut self) -> Result<(), StorageError> {
        self.tree.clear().map_err(backend)
    }

    fn close(&mut self) -> Result<(), StorageError> {
        self.db.flush().map(|_| ()).map_err(backend)
    }
}
