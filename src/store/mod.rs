//! Durable pipeline state: file records, distributed locks, scanner
//! snapshots and raw job entries.
//!
//! The store is the single source of truth for what the pipeline has
//! observed. Everything else (the publishing backend) is a derived
//! projection repaired by the reconciliation watchers.
//!
//! Key namespaces are disjoint so records, locks and jobs never collide:
//! `file:::<path>`, `lock:::<name>`, `job:::<kind>:::<id>`, plus a single
//! scanner snapshot key. Path keys are normalized to forward slashes so the
//! same physical file always maps to one key.

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

use crate::classify::DatasetDescriptor;

pub(crate) const FILE_PREFIX: &str = "file:::";
pub(crate) const LOCK_PREFIX: &str = "lock:::";
pub const JOB_PREFIX: &str = "job:::";
pub(crate) const SNAPSHOT_KEY: &str = "scanner:::snapshot";

/// Normalize a path string for use as a record key.
pub fn normalize_path_key(path: &str) -> String {
    path.replace('\\', "/")
}

/// Group-membership test for prefix queries over record basepaths.
///
/// `wanted` is either an exact group key (stem-based groups make plain
/// prefix matching unsafe: `a/wells` must never capture `a/wells2`) or a
/// directory prefix ending in `/`. Anything past the prefix must start at
/// a `/` boundary.
pub(crate) fn basepath_matches(record_basepath: &str, wanted: &str) -> bool {
    match record_basepath.strip_prefix(wanted) {
        Some("") => true,
        Some(rest) => wanted.ends_with('/') || rest.starts_with('/'),
        None => false,
    }
}

/// Lifecycle status of an observed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    New,
    Queued,
    Processing,
    Done,
    Removed,
    Ignored,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::New => "new",
            FileStatus::Queued => "queued",
            FileStatus::Processing => "processing",
            FileStatus::Done => "done",
            FileStatus::Removed => "removed",
            FileStatus::Ignored => "ignored",
        }
    }
}

/// One record per observed physical file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Normalized path, the record key.
    pub path: String,
    /// The dataset grouping key (`descriptor.dir`).
    pub basepath: String,
    /// Last computed content hash (empty until first analysis).
    pub hash: String,
    pub status: FileStatus,
    /// Last mutation time, epoch milliseconds.
    pub timestamp: i64,
    pub descriptor: DatasetDescriptor,
}

impl FileRecord {
    pub fn new(path: &str, hash: String, status: FileStatus, descriptor: DatasetDescriptor) -> Self {
        Self {
            path: normalize_path_key(path),
            basepath: descriptor.dir.clone(),
            hash,
            status,
            timestamp: chrono::Utc::now().timestamp_millis(),
            descriptor,
        }
    }

    /// Return a copy with a new status and a fresh timestamp.
    pub fn with_status(&self, status: FileStatus) -> Self {
        Self {
            status,
            timestamp: chrono::Utc::now().timestamp_millis(),
            ..self.clone()
        }
    }
}

/// Polling scanner snapshot: normalized path → mtime in epoch milliseconds.
pub type Snapshot = BTreeMap<String, i64>;

/// Errors from state store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),

    #[error("store operation failed: {0}")]
    Operation(String),

    #[error("corrupt record at {key}: {reason}")]
    CorruptRecord { key: String, reason: String },
}

impl From<::redis::RedisError> for StoreError {
    fn from(e: ::redis::RedisError) -> Self {
        StoreError::Operation(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Operation(e.to_string())
    }
}

/// Narrow surface over a durable key-value store with lock support.
///
/// Any backend offering atomic set-if-absent-with-expiry and pattern key
/// enumeration can implement this; `RedisStore` is the production backend,
/// `MemoryStore` serves tests and single-process runs.
#[async_trait]
pub trait StateStore: Send + Sync {
    // --- file records ---

    async fn exists(&self, path: &str) -> Result<bool, StoreError>;

    async fn get(&self, path: &str) -> Result<Option<FileRecord>, StoreError>;

    async fn put(&self, record: &FileRecord) -> Result<(), StoreError>;

    async fn delete(&self, path: &str) -> Result<(), StoreError>;

    async fn list_by_status(&self, status: FileStatus) -> Result<Vec<FileRecord>, StoreError>;

    /// All records whose basepath falls under the given (normalized)
    /// prefix, respecting `/` boundaries.
    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<FileRecord>, StoreError>;

    /// Set the status of every record of one dataset group (exact basepath
    /// match). A no-op with a warning when nothing matches, never an
    /// error. Returns the number of records touched.
    async fn bulk_set_status(
        &self,
        basepath: &str,
        status: FileStatus,
    ) -> Result<usize, StoreError>;

    // --- distributed locks ---

    /// Atomic set-if-absent with expiry. `true` means the lock was taken.
    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    async fn release_lock(&self, key: &str) -> Result<(), StoreError>;

    /// Startup recovery: drop every lock artifact left by a prior crash.
    async fn release_all_locks(&self) -> Result<usize, StoreError>;

    /// Startup recovery: any record frozen mid-`processing` is requeued.
    async fn revert_processing_to_queued(&self) -> Result<usize, StoreError>;

    // --- scanner snapshot ---

    async fn load_snapshot(&self) -> Result<Option<Snapshot>, StoreError>;

    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError>;

    // --- raw entries (job queue storage) ---

    /// Atomic create. `false` means the key already existed (dedup hit).
    async fn put_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError>;

    async fn set_raw(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn get_raw(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn delete_raw(&self, key: &str) -> Result<(), StoreError>;

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&FileStatus::Processing).unwrap(),
            "\"processing\""
        );
        let back: FileStatus = serde_json::from_str("\"queued\"").unwrap();
        assert_eq!(back, FileStatus::Queued);
    }

    #[test]
    fn path_keys_normalize_separators() {
        assert_eq!(
            normalize_path_key("files\\acme\\2024\\raster\\s1\\t.jpg"),
            "files/acme/2024/raster/s1/t.jpg"
        );
    }
}
