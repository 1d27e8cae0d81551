//! Durable, deduplicated, delayable job queue over the state store.
//!
//! Two job kinds decouple "a file changed" from "a dataset should be
//! processed". `analyze` jobs carry a bare path and are deduplicated per
//! path. `process` jobs carry a dataset descriptor, are deduplicated by the
//! dataset's `dir` and only become due after the settle window, so a
//! multi-file dataset (shapefile sidecars, raster tile pages) finishes
//! arriving before one consolidated run fires.
//!
//! Entries live in the store under `job:::analyze:::<path>` and
//! `job:::process:::<dir>`, so queued work survives restarts and the
//! settle window is observable.

mod analyze;
mod worker;

pub use analyze::analyze_file;
pub use worker::{WorkError, run_dispatcher, spawn_workers};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::classify::DatasetDescriptor;
use crate::store::{JOB_PREFIX, StateStore, StoreError, normalize_path_key};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Job {
    Analyze { path: String },
    Process { descriptor: DatasetDescriptor },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEntry {
    pub job: Job,
    /// Epoch milliseconds at which the job becomes due.
    pub ready_at: i64,
    /// Completed attempts so far.
    pub attempts: u32,
}

/// A due job taken off the queue, with its storage key for requeueing.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub key: String,
    pub entry: JobEntry,
}

/// Outcome of a failed attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDisposition {
    /// Requeued with backoff; next attempt after the given delay.
    Retried(Duration),
    /// Attempt budget exhausted; the job was reported and dropped.
    Exhausted,
}

#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn StateStore>,
    settle_delay: Duration,
    max_attempts: u32,
}

impl JobQueue {
    pub fn new(store: Arc<dyn StateStore>, settle_delay: Duration, max_attempts: u32) -> Self {
        Self {
            store,
            settle_delay,
            max_attempts,
        }
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn analyze_key(path: &str) -> String {
        format!("{JOB_PREFIX}analyze:::{}", normalize_path_key(path))
    }

    fn process_key(dir: &str) -> String {
        format!("{JOB_PREFIX}process:::{}", normalize_path_key(dir))
    }

    /// Enqueue a file-analysis job, due immediately. Deduplicated per path:
    /// a pending analysis for the same file absorbs further changes.
    pub async fn enqueue_analyze(&self, path: &str) -> Result<bool, StoreError> {
        let entry = JobEntry {
            job: Job::Analyze {
                path: normalize_path_key(path),
            },
            ready_at: Self::now_ms(),
            attempts: 0,
        };
        let created = self
            .store
            .put_if_absent(&Self::analyze_key(path), &serde_json::to_string(&entry)?)
            .await?;
        if !created {
            crate::debug_event!("queue", "analyze already pending", "{path}");
        }
        Ok(created)
    }

    /// Enqueue a dataset-processing job, due after the settle window.
    /// Deduplicated by the dataset's `dir`: while one is pending or
    /// delayed, further enqueues are absorbed.
    pub async fn enqueue_process(&self, descriptor: &DatasetDescriptor) -> Result<bool, StoreError> {
        let entry = JobEntry {
            job: Job::Process {
                descriptor: descriptor.clone(),
            },
            ready_at: Self::now_ms() + self.settle_delay.as_millis() as i64,
            attempts: 0,
        };
        let created = self
            .store
            .put_if_absent(
                &Self::process_key(&descriptor.dir),
                &serde_json::to_string(&entry)?,
            )
            .await?;
        if created {
            crate::log_event!(
                "queue",
                "process job enqueued",
                "{} (settles in {}s)",
                descriptor.dir,
                self.settle_delay.as_secs()
            );
        } else {
            crate::debug_event!("queue", "process job deduplicated", "{}", descriptor.dir);
        }
        Ok(created)
    }

    /// Claim every job whose due time has passed, oldest first.
    pub async fn take_due(&self) -> Result<Vec<ClaimedJob>, StoreError> {
        let now = Self::now_ms();
        let mut due = Vec::new();
        for key in self.store.list_keys(JOB_PREFIX).await? {
            let Some(raw) = self.store.get_raw(&key).await? else {
                continue;
            };
            let entry: JobEntry =
                serde_json::from_str(&raw).map_err(|e| StoreError::CorruptRecord {
                    key: key.clone(),
                    reason: e.to_string(),
                })?;
            if entry.ready_at <= now {
                self.store.delete_raw(&key).await?;
                due.push(ClaimedJob { key, entry });
            }
        }
        due.sort_by_key(|j| j.entry.ready_at);
        Ok(due)
    }

    /// Handle a failed attempt: requeue with exponential backoff and jitter,
    /// or report exhaustion once the attempt budget is spent. The job is
    /// never silently dropped, and the related file records stay `queued`
    /// so a later scan can pick the dataset up again.
    pub async fn requeue_failed(
        &self,
        claimed: &ClaimedJob,
    ) -> Result<RetryDisposition, StoreError> {
        let attempts = claimed.entry.attempts + 1;
        if attempts >= self.max_attempts {
            tracing::error!(
                "[queue] job failed after {attempts} attempts, giving up: {}",
                claimed.key
            );
            return Ok(RetryDisposition::Exhausted);
        }
        let delay = backoff_delay(attempts);
        let entry = JobEntry {
            job: claimed.entry.job.clone(),
            ready_at: Self::now_ms() + delay.as_millis() as i64,
            attempts,
        };
        self.store
            .set_raw(&claimed.key, &serde_json::to_string(&entry)?)
            .await?;
        crate::log_event!(
            "queue",
            "job retry scheduled",
            "{} attempt {attempts} in {:?}",
            claimed.key,
            delay
        );
        Ok(RetryDisposition::Retried(delay))
    }
}

/// Randomized exponential backoff: 500ms * 2^attempt, +/-50% jitter,
/// capped at five minutes.
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    use rand::RngExt;
    let base_ms = 500u64.saturating_mul(1u64 << attempt.min(16));
    let jitter = rand::rng().random_range(0.5..1.5);
    let ms = ((base_ms as f64) * jitter) as u64;
    Duration::from_millis(ms.min(300_000))
}
