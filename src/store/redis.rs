//! Redis-backed state store.
//!
//! Records and job entries are JSON strings; locks use `SET NX EX` so a
//! crashed holder auto-releases when the TTL lapses. Pattern enumeration
//! uses `KEYS` over the disjoint key namespaces, which stay small (one key
//! per observed file plus transient jobs and locks).

use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use std::fmt;
use std::time::Duration;

use super::{
    FILE_PREFIX, FileRecord, FileStatus, LOCK_PREFIX, SNAPSHOT_KEY, Snapshot, StateStore,
    StoreError, basepath_matches, normalize_path_key,
};

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        tracing::info!("[store] connecting to redis at {url}");
        let client =
            redis::Client::open(url).map_err(|e| StoreError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        tracing::info!("[store] redis connection established");
        Ok(Self { conn })
    }

    /// Round-trip check used at startup.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
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

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.keys(pattern).await?)
    }

    async fn records_matching(&self, pattern: &str) -> Result<Vec<FileRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let keys = self.keys(pattern).await?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let value: Option<String> = conn.get(&key).await?;
            if let Some(value) = value {
                out.push(Self::parse_record(&key, &value)?);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(Self::file_key(path)).await?)
    }

    async fn get(&self, path: &str) -> Result<Option<FileRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let key = Self::file_key(path);
        let value: Option<String> = conn.get(&key).await?;
        match value {
            Some(value) => Ok(Some(Self::parse_record(&key, &value)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, record: &FileRecord) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let value = serde_json::to_string(record)?;
        conn.set::<_, _, ()>(Self::file_key(&record.path), value)
            .await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(Self::file_key(path)).await?;
        Ok(())
    }

    async fn list_by_status(&self, status: FileStatus) -> Result<Vec<FileRecord>, StoreError> {
        let records = self.records_matching(&format!("{FILE_PREFIX}*")).await?;
        Ok(records.into_iter().filter(|r| r.status == status).collect())
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<FileRecord>, StoreError> {
        let wanted = normalize_path_key(prefix);
        let records = self
            .records_matching(&format!("{}*", Self::file_key(prefix)))
            .await?;
        Ok(records
            .into_iter()
            .filter(|r| basepath_matches(&r.basepath, &wanted))
            .collect())
    }

    async fn bulk_set_status(
        &self,
        basepath: &str,
        status: FileStatus,
    ) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let wanted = normalize_path_key(basepath);
        // The key pattern is a coarse scan (record paths share the group's
        // basepath prefix); membership is the record's own basepath, so
        // stem groups like `wells` and `wells2` stay isolated.
        let records: Vec<FileRecord> = self
            .records_matching(&format!("{}*", Self::file_key(basepath)))
            .await?
            .into_iter()
            .filter(|r| r.basepath == wanted)
            .collect();
        if records.is_empty() {
            tracing::warn!("[store] bulk status change matched no records: {basepath}");
            return Ok(0);
        }
        let count = records.len();
        for record in records {
            let updated = record.with_status(status);
            let value = serde_json::to_string(&updated)?;
            conn.set::<_, _, ()>(Self::file_key(&updated.path), value)
                .await?;
        }
        Ok(count)
    }

    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let lock_key = format!("{LOCK_PREFIX}{}", normalize_path_key(key));
        let acquired: Option<String> = redis::cmd("SET")
            .arg(&lock_key)
            .arg("locked")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(acquired.is_some())
    }

    async fn release_lock(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let lock_key = format!("{LOCK_PREFIX}{}", normalize_path_key(key));
        conn.del::<_, ()>(lock_key).await?;
        Ok(())
    }

    async fn release_all_locks(&self) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let keys = self.keys(&format!("{LOCK_PREFIX}*")).await?;
        let count = keys.len();
        if !keys.is_empty() {
            conn.del::<_, ()>(keys).await?;
        }
        Ok(count)
    }

    async fn revert_processing_to_queued(&self) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let records = self.records_matching(&format!("{FILE_PREFIX}*")).await?;
        let mut reverted = 0;
        for record in records {
            if record.status == FileStatus::Processing {
                let updated = record.with_status(FileStatus::Queued);
                let value = serde_json::to_string(&updated)?;
                conn.set::<_, _, ()>(Self::file_key(&updated.path), value)
                    .await?;
                reverted += 1;
            }
        }
        Ok(reverted)
    }

    async fn load_snapshot(&self) -> Result<Option<Snapshot>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(SNAPSHOT_KEY).await?;
        match value {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let value = serde_json::to_string(snapshot)?;
        conn.set::<_, _, ()>(SNAPSHOT_KEY, value).await?;
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let created: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .query_async(&mut conn)
            .await?;
        Ok(created.is_some())
    }

    async fn set_raw(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn get_raw(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn delete_raw(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.keys(&format!("{prefix}*")).await
    }
}
