//! Removal watcher: propagates on-disk deletions to the backend.
//!
//! Groups `removed` records by dataset and checks what is actually left on
//! disk. A dataset with no remaining source files is unpublished (layer
//! group and layer removed best-effort, group rebuilt from the surviving
//! layers); a partially deleted dataset is requeued so the remaining files
//! republish. Either way the removed-file records are purged afterwards.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::classify::DatasetKind;
use crate::pipeline::PipelineDeps;
use crate::processor::fingerprint_key;
use crate::publish::{BackendNames, rebuild_layer_group};
use crate::scanner::ScanFilter;
use crate::store::{FileRecord, FileStatus};
use crate::{debug_event, log_event};

use super::WatchTaskError;

const REMOVAL_LOCK: &str = "removal-watcher";

pub async fn run_removal_watcher(deps: Arc<PipelineDeps>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(
        deps.settings.watchers.removal_interval_secs,
    ));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = sweep_removed(&deps).await {
            tracing::error!("[removal] sweep failed: {e}");
        }
    }
}

/// One removal sweep under the watcher lock. Public within the crate for
/// the integration tests.
pub async fn sweep_removed(deps: &PipelineDeps) -> Result<(), WatchTaskError> {
    let ttl = Duration::from_secs(deps.settings.locks.watcher_ttl_secs);
    if !deps.store.acquire_lock(REMOVAL_LOCK, ttl).await? {
        return Ok(());
    }
    let result = sweep(deps).await;
    if let Err(e) = deps.store.release_lock(REMOVAL_LOCK).await {
        tracing::error!("[removal] failed to release lock: {e}");
    }
    result
}

async fn sweep(deps: &PipelineDeps) -> Result<(), WatchTaskError> {
    let removed = deps.store.list_by_status(FileStatus::Removed).await?;
    if removed.is_empty() {
        return Ok(());
    }

    let mut groups: BTreeMap<String, Vec<FileRecord>> = BTreeMap::new();
    for record in removed {
        groups.entry(record.basepath.clone()).or_default().push(record);
    }
    log_event!(
        "removal",
        "sweeping removed files",
        "{} datasets affected",
        groups.len()
    );

    let filter = ScanFilter::new(&deps.settings);
    for (basepath, records) in groups {
        // Every record in a group shares the descriptor.
        let descriptor = records[0].descriptor.clone();
        let remaining = remaining_source_files(&basepath, &descriptor.kind, &descriptor.dataset, &filter);

        if remaining == 0 {
            log_event!("removal", "dataset fully removed", "{basepath}");
            let names = BackendNames::for_dataset(&descriptor);

            // Independent best-effort steps: a failure of one must not
            // block the other, the backend sweep picks up leftovers.
            if let Err(e) = deps
                .publisher
                .remove_layer_group(&names.workspace, &names.layer_group)
                .await
            {
                tracing::warn!("[removal] could not remove layer group {}: {e}", names.layer_group);
            }
            if let Err(e) = deps
                .publisher
                .remove_layer(&names.workspace, &names.layer)
                .await
            {
                tracing::warn!("[removal] could not remove layer {}: {e}", names.layer);
            }
            rebuild_layer_group(deps.publisher.as_ref(), &names.workspace, &names.layer_group)
                .await?;
            // Forget the publish fingerprint so a recreated dataset with
            // identical content republishes instead of short-circuiting.
            deps.store.delete_raw(&fingerprint_key(&descriptor.dir)).await?;
        } else {
            debug_event!(
                "removal",
                "dataset partially removed, requeueing",
                "{basepath} ({remaining} files left)"
            );
            deps.store
                .bulk_set_status(&basepath, FileStatus::Queued)
                .await?;
            deps.queue.enqueue_process(&descriptor).await?;
        }

        for record in records {
            deps.store.delete(&record.path).await?;
        }
    }
    Ok(())
}

/// Count the source files a dataset still has on disk.
fn remaining_source_files(
    basepath: &str,
    kind: &DatasetKind,
    dataset: &str,
    filter: &ScanFilter,
) -> usize {
    match kind {
        // `basepath` is the dataset directory.
        DatasetKind::Raster => walkdir::WalkDir::new(basepath)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file() && filter.accepts(e.path()))
            .count(),
        // `basepath` is `<type dir>/<stem>`; the sources are sibling files
        // sharing the stem.
        DatasetKind::Points | DatasetKind::Analysis => {
            let path = Path::new(basepath);
            let Some(parent) = path.parent() else {
                return 0;
            };
            let Ok(entries) = std::fs::read_dir(parent) else {
                return 0;
            };
            entries
                .filter_map(Result::ok)
                .filter(|e| {
                    let p = e.path();
                    p.is_file()
                        && filter.accepts(&p)
                        && p.file_stem().and_then(|s| s.to_str()) == Some(dataset)
                })
                .count()
        }
        // `basepath` is the style document itself.
        DatasetKind::Styles(_) => usize::from(Path::new(basepath).is_file()),
    }
}
