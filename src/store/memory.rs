//! In-memory state store.
//!
//! Implements the same key scheme as the Redis backend over a process-local
//! map. Lock TTLs are honored via expiry timestamps so lock-recovery
//! behavior matches production. Only suitable for one process; used by the
//! test suite and `backend = "memory"` deployments.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::{
    FILE_PREFIX, FileRecord, FileStatus, LOCK_PREFIX, SNAPSHOT_KEY, Snapshot, StateStore,
    StoreError, basepath_matches, normalize_path_key,
};

#[derive(Default)]
struct Inner {
    entries: HashMap<String, String>,
    /// lock key → expiry instant
    locks: HashMap<String, Instant>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn file_key(path: &str) -> String {
        format!("{FILE_PREFIX}{}", normalize_path_key(path))
    }

    fn parse_record(key: &str, value: &str) -> Result<FileRecord, StoreError> {
        serde_json::from_str(value).map_err(|e| StoreError::CorruptRecord {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        Ok(self.inner.lock().entries.contains_key(&Self::file_key(path)))
    }

    async fn get(&self, path: &str) -> Result<Option<FileRecord>, StoreError> {
        let key = Self::file_key(path);
        let inner = self.inner.lock();
        match inner.entries.get(&key) {
            Some(value) => Ok(Some(Self::parse_record(&key, value)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, record: &FileRecord) -> Result<(), StoreError> {
        let key = Self::file_key(&record.path);
        let value = serde_json::to_string(record)?;
        self.inner.lock().entries.insert(key, value);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.inner.lock().entries.remove(&Self::file_key(path));
        Ok(())
    }

    async fn list_by_status(&self, status: FileStatus) -> Result<Vec<FileRecord>, StoreError> {
        let inner = self.inner.lock();
        let mut out = Vec::new();
        for (key, value) in &inner.entries {
            if !key.starts_with(FILE_PREFIX) {
                continue;
            }
            let record = Self::parse_record(key, value)?;
            if record.status == status {
                out.push(record);
            }
        }
        Ok(out)
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<FileRecord>, StoreError> {
        let wanted = normalize_path_key(prefix);
        let inner = self.inner.lock();
        let mut out = Vec::new();
        for (key, value) in &inner.entries {
            if !key.starts_with(FILE_PREFIX) {
                continue;
            }
            let record = Self::parse_record(key, value)?;
            if basepath_matches(&record.basepath, &wanted) {
                out.push(record);
            }
        }
        Ok(out)
    }

    async fn bulk_set_status(
        &self,
        basepath: &str,
        status: FileStatus,
    ) -> Result<usize, StoreError> {
        let wanted = normalize_path_key(basepath);
        let mut inner = self.inner.lock();
        // Group membership is the record's own basepath, not a key prefix:
        // stem-based groups like `wells` and `wells2` share key prefixes.
        let mut matched: Vec<(String, FileRecord)> = Vec::new();
        for (key, value) in &inner.entries {
            if !key.starts_with(FILE_PREFIX) {
                continue;
            }
            let record = Self::parse_record(key, value)?;
            if record.basepath == wanted {
                matched.push((key.clone(), record));
            }
        }
        if matched.is_empty() {
            tracing::warn!("[store] bulk status change matched no records: {basepath}");
            return Ok(0);
        }
        let count = matched.len();
        for (key, record) in matched {
            let updated = record.with_status(status);
            inner.entries.insert(key, serde_json::to_string(&updated)?);
        }
        Ok(count)
    }

    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let lock_key = format!("{LOCK_PREFIX}{}", normalize_path_key(key));
        let now = Instant::now();
        let mut inner = self.inner.lock();
        if let Some(expiry) = inner.locks.get(&lock_key)
            && *expiry > now
        {
            return Ok(false);
        }
        inner.locks.insert(lock_key, now + ttl);
        Ok(true)
    }

    async fn release_lock(&self, key: &str) -> Result<(), StoreError> {
        let lock_key = format!("{LOCK_PREFIX}{}", normalize_path_key(key));
        self.inner.lock().locks.remove(&lock_key);
        Ok(())
    }

    async fn release_all_locks(&self) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock();
        let count = inner.locks.len();
        inner.locks.clear();
        Ok(count)
    }

    async fn revert_processing_to_queued(&self) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock();
        let mut reverted = 0;
        let keys: Vec<String> = inner
            .entries
            .keys()
            .filter(|k| k.starts_with(FILE_PREFIX))
            .cloned()
            .collect();
        for key in keys {
            let value = inner.entries.get(&key).cloned().unwrap_or_default();
            let record = Self::parse_record(&key, &value)?;
            if record.status == FileStatus::Processing {
                let updated = record.with_status(FileStatus::Queued);
                inner.entries.insert(key, serde_json::to_string(&updated)?);
                reverted += 1;
            }
        }
        Ok(reverted)
    }

    async fn load_snapshot(&self) -> Result<Option<Snapshot>, StoreError> {
        let inner = self.inner.lock();
        match inner.entries.get(SNAPSHOT_KEY) {
            Some(value) => Ok(Some(serde_json::from_str(value)?)),
            None => Ok(None),
        }
    }

    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let value = serde_json::to_string(snapshot)?;
        self.inner.lock().entries.insert(SNAPSHOT_KEY.to_string(), value);
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        if inner.entries.contains_key(key) {
            return Ok(false);
        }
        inner.entries.insert(key.to_string(), value.to_string());
        Ok(true)
    }

    async fn set_raw(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner
            .lock()
            .entries
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_raw(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.inner.lock().entries.get(key).cloned())
    }

    async fn delete_raw(&self, key: &str) -> Result<(), StoreError> {
        self.inner.lock().entries.remove(key);
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .inner
            .lock()
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{DatasetDescriptor, DatasetKind};

    fn record(path: &str, status: FileStatus) -> FileRecord {
        let (dir, _) = path.rsplit_once('/').unwrap();
        let dataset = dir.rsplit('/').next().unwrap();
        let descriptor = DatasetDescriptor {
            customer: "acme".into(),
            year: "2024".into(),
            kind: DatasetKind::Raster,
            dataset: dataset.into(),
            dir: dir.into(),
        };
        FileRecord::new(path, "h".into(), status, descriptor)
    }

    #[tokio::test]
    async fn record_round_trip_and_exists() {
        let store = MemoryStore::new();
        let rec = record("files/acme/2024/raster/site1/a.jpg", FileStatus::Queued);
        store.put(&rec).await.unwrap();
        assert!(store.exists(&rec.path).await.unwrap());
        assert_eq!(store.get(&rec.path).await.unwrap().unwrap(), rec);
        store.delete(&rec.path).await.unwrap();
        assert!(!store.exists(&rec.path).await.unwrap());
    }

    #[tokio::test]
    async fn same_file_different_separators_is_one_record() {
        let store = MemoryStore::new();
        let rec = record("files/acme/2024/raster/site1/a.jpg", FileStatus::New);
        store.put(&rec).await.unwrap();
        assert!(
            store
                .exists("files\\acme\\2024\\raster\\site1\\a.jpg")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn bulk_set_status_touches_only_the_basepath() {
        let store = MemoryStore::new();
        store
            .put(&record("files/acme/2024/raster/site1/a.jpg", FileStatus::Done))
            .await
            .unwrap();
        store
            .put(&record("files/acme/2024/raster/site1/b.jpg", FileStatus::Done))
            .await
            .unwrap();
        store
            .put(&record("files/acme/2024/raster/other/c.jpg", FileStatus::Done))
            .await
            .unwrap();

        let touched = store
            .bulk_set_status("files/acme/2024/raster/site1", FileStatus::Queued)
            .await
            .unwrap();
        assert_eq!(touched, 2);
        let queued = store.list_by_status(FileStatus::Queued).await.unwrap();
        assert_eq!(queued.len(), 2);
    }

    #[tokio::test]
    async fn stem_groups_sharing_a_prefix_stay_isolated() {
        let store = MemoryStore::new();
        for stem in ["wells", "wells2"] {
            let descriptor = DatasetDescriptor {
                customer: "acme".into(),
                year: "2024".into(),
                kind: DatasetKind::Points,
                dataset: stem.into(),
                dir: format!("files/acme/2024/points/{stem}"),
            };
            let rec = FileRecord::new(
                &format!("files/acme/2024/points/{stem}.shp"),
                "h".into(),
                FileStatus::Queued,
                descriptor,
            );
            store.put(&rec).await.unwrap();
        }

        let touched = store
            .bulk_set_status("files/acme/2024/points/wells", FileStatus::Done)
            .await
            .unwrap();
        assert_eq!(touched, 1);
        let neighbor = store
            .get("files/acme/2024/points/wells2.shp")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(neighbor.status, FileStatus::Queued);

        let listed = store
            .list_by_prefix("files/acme/2024/points/wells")
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].basepath, "files/acme/2024/points/wells");
    }

    #[tokio::test]
    async fn bulk_set_status_on_empty_match_is_a_noop() {
        let store = MemoryStore::new();
        let touched = store
            .bulk_set_status("files/nobody/there", FileStatus::Queued)
            .await
            .unwrap();
        assert_eq!(touched, 0);
    }

    #[tokio::test]
    async fn lock_is_mutually_exclusive_until_released() {
        let store = MemoryStore::new();
        assert!(store.acquire_lock("scanner", Duration::from_secs(60)).await.unwrap());
        assert!(!store.acquire_lock("scanner", Duration::from_secs(60)).await.unwrap());
        store.release_lock("scanner").await.unwrap();
        assert!(store.acquire_lock("scanner", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn expired_lock_can_be_reacquired() {
        let store = MemoryStore::new();
        assert!(
            store
                .acquire_lock("group", Duration::from_millis(10))
                .await
                .unwrap()
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(
            store
                .acquire_lock("group", Duration::from_secs(60))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn startup_recovery_resets_locks_and_processing() {
        let store = MemoryStore::new();
        store.acquire_lock("a", Duration::from_secs(600)).await.unwrap();
        store.acquire_lock("b", Duration::from_secs(600)).await.unwrap();
        store
            .put(&record("files/acme/2024/raster/site1/a.jpg", FileStatus::Processing))
            .await
            .unwrap();

        assert_eq!(store.release_all_locks().await.unwrap(), 2);
        assert_eq!(store.revert_processing_to_queued().await.unwrap(), 1);
        assert!(store.acquire_lock("a", Duration::from_secs(1)).await.unwrap());
        assert_eq!(store.list_by_status(FileStatus::Queued).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn put_if_absent_deduplicates() {
        let store = MemoryStore::new();
        assert!(store.put_if_absent("job:::process:::x", "{}").await.unwrap());
        assert!(!store.put_if_absent("job:::process:::x", "{}").await.unwrap());
    }
}
