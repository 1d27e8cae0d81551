//! Native (notify-based) change scanner.
//!
//! A `RecommendedWatcher` feeds raw events into a tokio select loop that
//! debounces writes and forwards settled changes. Before going live the
//! whole tree is replayed as synthetic adds, so files that arrived while
//! the pipeline was down are not missed; unchanged files collapse to
//! no-ops at the analysis stage.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use walkdir::WalkDir;

use crate::pipeline::PipelineDeps;
use crate::store::normalize_path_key;
use crate::{debug_event, log_event};

use super::debounce::{Debouncer, PendingKind};
use super::{ChangeEvent, SCANNER_LOCK, ScanError, ScanFilter, handle_event};

/// How often settled paths are drained from the debouncer.
const DRAIN_INTERVAL: Duration = Duration::from_millis(100);

pub async fn run_native_scanner(deps: Arc<PipelineDeps>) -> Result<(), ScanError> {
    let root = deps.settings.watch.root.clone();
    let filter = ScanFilter::new(&deps.settings);

    let (tx, mut rx) = mpsc::channel::<notify::Result<Event>>(1024);
    let mut watcher = notify::recommended_watcher(move |res| {
        // blocking_send: the notify callback runs on its own thread
        let _ = tx.blocking_send(res);
    })?;
    watcher.watch(&root, RecursiveMode::Recursive)?;
    log_event!("scanner", "watching", "{}", root.display());

    startup_replay(&deps, &filter).await?;

    let mut debouncer = Debouncer::new(deps.settings.scanner.debounce_ms);
    let mut drain = tokio::time::interval(DRAIN_INTERVAL);
    drain.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe_event = rx.recv() => {
                match maybe_event {
                    Some(Ok(event)) => route(&deps, &filter, &mut debouncer, event).await?,
                    Some(Err(e)) => tracing::error!("[scanner] watch error: {e}"),
                    None => {
                        tracing::error!("[scanner] event channel closed, stopping");
                        return Ok(());
                    }
                }
            }
            _ = drain.tick() => {
                for (path, kind) in debouncer.take_settled() {
                    let event = match kind {
                        PendingKind::Added => ChangeEvent::Added(path),
                        PendingKind::Changed => ChangeEvent::Changed(path),
                    };
                    handle_event(&deps, event).await?;
                }
            }
        }
    }
}

/// Consistency pass under the scanner lock: everything already on disk
/// becomes a synthetic add, so files that arrived while the pipeline was
/// down are not missed. A busy lock means another instance is already
/// scanning the same tree and the replay is skipped.
pub async fn startup_replay(
    deps: &PipelineDeps,
    filter: &ScanFilter,
) -> Result<usize, ScanError> {
    let ttl = Duration::from_secs(deps.settings.locks.scanner_ttl_secs);
    if !deps.store.acquire_lock(SCANNER_LOCK, ttl).await? {
        tracing::warn!("[scanner] scanner lock busy, skipping startup replay");
        return Ok(0);
    }
    let result = replay_tree(deps, filter).await;
    if let Err(e) = deps.store.release_lock(SCANNER_LOCK).await {
        tracing::error!("[scanner] failed to release scanner lock: {e}");
    }
    result
}

async fn replay_tree(deps: &PipelineDeps, filter: &ScanFilter) -> Result<usize, ScanError> {
    let mut replayed = 0usize;
    for entry in WalkDir::new(&deps.settings.watch.root)
        .into_iter()
        .filter_map(Result::ok)
    {
        if entry.file_type().is_file() && filter.accepts(entry.path()) {
            let path = normalize_path_key(&entry.path().display().to_string());
            handle_event(deps, ChangeEvent::Added(path)).await?;
            replayed += 1;
        }
    }
    if replayed > 0 {
        log_event!("scanner", "startup replay", "{replayed} existing files");
    }
    Ok(replayed)
}

async fn route(
    deps: &PipelineDeps,
    filter: &ScanFilter,
    debouncer: &mut Debouncer,
    event: Event,
) -> Result<(), ScanError> {
    for path in event.paths {
        if !filter.accepts(&path) {
            continue;
        }
        let key = normalize_path_key(&path.display().to_string());
        match event.kind {
            EventKind::Create(_) => debouncer.record(key, PendingKind::Added),
            EventKind::Modify(_) => {
                // Some platforms report renames as modify; a vanished path
                // is a removal.
                if Path::new(&key).exists() {
                    debouncer.record(key, PendingKind::Changed);
                } else {
                    debouncer.remove(&key);
                    handle_event(deps, ChangeEvent::Removed(key)).await?;
                }
            }
            EventKind::Remove(_) => {
                debouncer.remove(&key);
                handle_event(deps, ChangeEvent::Removed(key)).await?;
            }
            _ => {
                debug_event!("scanner", "unhandled event kind", "{:?}", event.kind);
            }
        }
    }
    Ok(())
}
