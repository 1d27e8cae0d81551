//! Polling change scanner.
//!
//! Walks the tree on an interval, diffs a `path -> mtime` snapshot against
//! the previous pass and emits the difference. The snapshot is persisted
//! in the store, so a restart diffs against the last observed state
//! instead of replaying the whole tree. The pass runs under the `scanner`
//! named lock so multiple pipeline instances do not double-scan a shared
//! mount.

use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use rand::RngExt;
use walkdir::WalkDir;

use crate::pipeline::PipelineDeps;
use crate::store::{Snapshot, normalize_path_key};
use crate::{debug_event, log_event};

use super::{ChangeEvent, SCANNER_LOCK, ScanError, ScanFilter, handle_event};

const LOCK_ATTEMPTS: u32 = 10;

pub async fn run_polling_scanner(deps: Arc<PipelineDeps>) -> Result<(), ScanError> {
    let mut ticker =
        tokio::time::interval(Duration::from_millis(deps.settings.scanner.interval_ms));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    log_event!(
        "scanner",
        "polling",
        "{} every {}ms",
        deps.settings.watch.root.display(),
        deps.settings.scanner.interval_ms
    );

    loop {
        ticker.tick().await;
        if let Err(e) = scan_once(&deps).await {
            tracing::error!("[scanner] polling pass failed: {e}");
        }
    }
}

/// One full scan pass under the scanner lock. Returns the number of
/// changes emitted. Also the entry point of the one-shot `scan` command.
pub async fn scan_once(deps: &PipelineDeps) -> Result<usize, ScanError> {
    let ttl = Duration::from_secs(deps.settings.locks.scanner_ttl_secs);
    let mut acquired = false;
    for attempt in 0..LOCK_ATTEMPTS {
        if deps.store.acquire_lock(SCANNER_LOCK, ttl).await? {
            acquired = true;
            break;
        }
        let delay =
            Duration::from_millis(rand::rng().random_range(100..500) * (u64::from(attempt) + 1));
        debug_event!("scanner", "lock busy, retrying", "in {delay:?}");
        tokio::time::sleep(delay).await;
    }
    if !acquired {
        tracing::warn!("[scanner] could not take scanner lock, skipping pass");
        return Ok(0);
    }

    let result = scan_pass(deps).await;
    if let Err(e) = deps.store.release_lock(SCANNER_LOCK).await {
        tracing::error!("[scanner] failed to release scanner lock: {e}");
    }
    result
}

async fn scan_pass(deps: &PipelineDeps) -> Result<usize, ScanError> {
    let filter = ScanFilter::new(&deps.settings);
    let previous = deps.store.load_snapshot().await?.unwrap_or_default();

    let mut current = Snapshot::new();
    for entry in WalkDir::new(&deps.settings.watch.root)
        .into_iter()
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() || !filter.accepts(entry.path()) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let mtime_ms = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        current.insert(
            normalize_path_key(&entry.path().display().to_string()),
            mtime_ms,
        );
    }

    let mut emitted = 0usize;
    for (path, mtime) in &current {
        match previous.get(path) {
            None => {
                handle_event(deps, ChangeEvent::Added(path.clone())).await?;
                emitted += 1;
            }
            Some(prev) if prev != mtime => {
                handle_event(deps, ChangeEvent::Changed(path.clone())).await?;
                emitted += 1;
            }
            Some(_) => {}
        }
    }
    for path in previous.keys() {
        if !current.contains_key(path) {
            handle_event(deps, ChangeEvent::Removed(path.clone())).await?;
            emitted += 1;
        }
    }

    deps.store.save_snapshot(&current).await?;
    if emitted > 0 {
        log_event!(
            "scanner",
            "pass complete",
            "{emitted} changes over {} files",
            current.len()
        );
    }
    Ok(emitted)
}
