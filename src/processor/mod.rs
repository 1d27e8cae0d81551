//! Dataset processor: the `queued -> processing -> done|queued` state
//! machine.
//!
//! One run handles one dataset group (`descriptor.dir`) under a
//! store-level lock, so concurrent workers and concurrent pipeline
//! instances serialize per dataset. Failure anywhere reverts every record
//! in the group to `queued`; the queue's retry policy decides what happens
//! next.

mod workflows;

use std::path::Path;
use std::time::Duration;

use rand::RngExt;
use thiserror::Error;

use crate::classify::{DatasetDescriptor, DatasetKind};
use crate::hashing::hash_dataset;
use crate::pipeline::PipelineDeps;
use crate::publish::PublishError;
use crate::store::{FileStatus, StoreError};
use crate::transform::TransformError;
use crate::{debug_event, log_event};

/// Attempts to take the group lock before abandoning the run.
const LOCK_ATTEMPTS: u32 = 10;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("could not read style document: {0}")]
    StyleRead(#[from] std::io::Error),
}

/// Workflow outcome, driving the terminal status of the group's records.
enum Outcome {
    Published,
    /// The dataset cannot be served (e.g. a vector file without point
    /// geometry). Not an error and never retried.
    NotApplicable,
}

/// Process one dataset group end to end.
///
/// If the group lock cannot be taken within the retry budget the run is
/// abandoned with records untouched; the records are still `queued`, so a
/// later enqueue picks the dataset up again.
pub async fn process_dataset(
    deps: &PipelineDeps,
    descriptor: &DatasetDescriptor,
) -> Result<(), ProcessError> {
    let lock_name = format!("group:::{}", descriptor.dir);
    let ttl = Duration::from_secs(deps.settings.locks.group_ttl_secs);

    let mut acquired = false;
    for attempt in 0..LOCK_ATTEMPTS {
        if deps.store.acquire_lock(&lock_name, ttl).await? {
            acquired = true;
            break;
        }
        let delay = lock_retry_delay(attempt);
        debug_event!(
            "processor",
            "group busy, retrying lock",
            "{} attempt {attempt} in {delay:?}",
            descriptor.dir
        );
        tokio::time::sleep(delay).await;
    }
    if !acquired {
        tracing::warn!(
            "[processor] group lock busy, abandoning run: {}",
            descriptor.dir
        );
        return Ok(());
    }

    let result = run_locked(deps, descriptor).await;
    if let Err(e) = deps.store.release_lock(&lock_name).await {
        tracing::error!("[processor] failed to release group lock {lock_name}: {e}");
    }
    result
}

async fn run_locked(
    deps: &PipelineDeps,
    descriptor: &DatasetDescriptor,
) -> Result<(), ProcessError> {
    let touched = deps
        .store
        .bulk_set_status(&descriptor.dir, FileStatus::Processing)
        .await?;
    log_event!(
        "processor",
        "processing dataset",
        "{} ({touched} files)",
        descriptor.dir
    );

    // Skip the transform and publish entirely when the dataset's aggregate
    // content hash still matches what the last successful publish recorded.
    // Covers mtime-only touches and replays after a crash between publish
    // and status flip.
    let fingerprint = group_fingerprint(deps, descriptor);
    let key = fingerprint_key(&descriptor.dir);
    if let Some(fp) = &fingerprint {
        if deps.store.get_raw(&key).await?.as_deref() == Some(fp.as_str()) {
            deps.store
                .bulk_set_status(&descriptor.dir, FileStatus::Done)
                .await?;
            log_event!(
                "processor",
                "dataset unchanged since last publish",
                "{}",
                descriptor.dir
            );
            return Ok(());
        }
    }

    match workflows::run(deps, descriptor).await {
        Ok(Outcome::Published) => {
            if let Some(fp) = &fingerprint {
                deps.store.set_raw(&key, fp).await?;
            }
            deps.store
                .bulk_set_status(&descriptor.dir, FileStatus::Done)
                .await?;
            log_event!("processor", "dataset published", "{}", descriptor.dir);
            Ok(())
        }
        Ok(Outcome::NotApplicable) => {
            deps.store
                .bulk_set_status(&descriptor.dir, FileStatus::Ignored)
                .await?;
            log_event!(
                "processor",
                "dataset not publishable, ignored",
                "{}",
                descriptor.dir
            );
            Ok(())
        }
        Err(e) => {
            // Back to queued so the retry (or a later scan) reruns the
            // whole group.
            deps.store
                .bulk_set_status(&descriptor.dir, FileStatus::Queued)
                .await?;
            Err(e)
        }
    }
}

/// Store key recording the aggregate content hash of a dataset group at
/// its last successful publish.
pub fn fingerprint_key(dir: &str) -> String {
    format!("dataset:::{dir}")
}

/// Aggregate content hash of the group's source files on disk.
///
/// Only groups whose `dir` is a real filesystem path can be fingerprinted:
/// raster dataset directories and style documents. Points and analysis
/// groups key on a stem-based virtual path, so they come back `None` and
/// always run the full workflow. Hashing errors degrade to `None` too, a
/// rerun is cheaper than wedging the group.
fn group_fingerprint(deps: &PipelineDeps, descriptor: &DatasetDescriptor) -> Option<String> {
    let extensions = match &descriptor.kind {
        DatasetKind::Raster => &deps.settings.extensions.raster,
        DatasetKind::Points => &deps.settings.extensions.points,
        DatasetKind::Analysis => &deps.settings.extensions.analysis,
        DatasetKind::Styles(_) => &deps.settings.extensions.styles,
    };
    match hash_dataset(
        Path::new(&descriptor.dir),
        extensions,
        &deps.settings.watch.output_marker,
    ) {
        Ok(fp) => fp,
        Err(e) => {
            tracing::warn!(
                "[processor] could not fingerprint {}: {e}",
                descriptor.dir
            );
            None
        }
    }
}

/// Randomized exponential delay between group-lock attempts: up to
/// 500ms * 2^attempt.
fn lock_retry_delay(attempt: u32) -> Duration {
    let ceiling = 500u64.saturating_mul(1u64 << attempt.min(10));
    Duration::from_millis(rand::rng().random_range(0..=ceiling))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_retry_delay_is_bounded() {
        for attempt in 0..12 {
            let d = lock_retry_delay(attempt);
            assert!(d <= Duration::from_millis(500 * 1024));
        }
    }
}
