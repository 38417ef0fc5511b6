//! Durable key/blob storage behind a narrow seam.
//!
//! The engine treats every call here as best-effort: a failed write is
//! logged and swallowed, because in-memory state is authoritative for the
//! session and storage only matters as the rehydration source for the next
//! one. Backends must keep `scan_prefix` in lexicographic key order — the
//! pending-queue layout depends on it.

use thiserror::Error;

pub mod memory;

cfg_if! {
    if #[cfg(feature = "sled_storage")] {
        pub mod sled_store;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Backend refused or failed the operation
    #[error("storage backend error: {detail}")]
    Backend { detail: String },

    /// Operation arrived after `close`
    #[error("storage adapter is closed")]
    Closed,
}

pub trait StorageAdapter {
    /// Prepare the backend for use. Called once during engine boot.
    fn init(&mut self) -> Result<(), StorageError>;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    fn set(&mut self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    fn delete(&mut self, key: &str) -> Result<(), StorageError>;

    /// All entries whose key starts with `prefix`, in lexicographic key
    /// order. An empty prefix scans everything.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError>;

    fn clear_all(&mut self) -> Result<(), StorageError>;

    fn close(&mut self) -> Result<(), StorageError>;
}
