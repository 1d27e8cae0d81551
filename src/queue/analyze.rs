//! File-analysis job: the hashing/classification decision point.
//!
//! Decides whether an observed file change actually changed the dataset:
//! unchanged content on a `done` record is a no-op, anything else upserts a
//! `queued` record and enqueues a (deduplicated, delayed) processing job.

use std::io;
use std::path::Path;

use super::worker::WorkError;
use crate::classify::classify;
use crate::hashing;
use crate::pipeline::PipelineDeps;
use crate::store::{FileRecord, FileStatus};

pub async fn analyze_file(deps: &PipelineDeps, path: &str) -> Result<(), WorkError> {
    let Some(descriptor) = classify(Path::new(path), &deps.settings.extensions, false) else {
        crate::debug_event!("analyze", "unclassifiable path dropped", "{path}");
        return Ok(());
    };

    let hash = match hashing::hash_file(Path::new(path)) {
        Ok(hash) => hash,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            // Vanished between event and analysis; the unlink event will
            // handle the record.
            crate::debug_event!("analyze", "file gone before hashing", "{path}");
            return Ok(());
        }
        Err(e) => return Err(WorkError::Hashing(e)),
    };

    match deps.store.get(path).await? {
        Some(record) => {
            if record.hash == hash && record.status == FileStatus::Done {
                crate::debug_event!("analyze", "unchanged, skipping", "{path}");
                return Ok(());
            }
            let updated = FileRecord {
                hash,
                ..record.with_status(FileStatus::Queued)
            };
            deps.store.put(&updated).await?;
            crate::log_event!("analyze", "file changed, queued", "{path}");
        }
        None => {
            let record = FileRecord::new(path, hash, FileStatus::Queued, descriptor.clone());
            deps.store.put(&record).await?;
            crate::log_event!("analyze", "new file queued", "{path}");
        }
    }

    deps.queue.enqueue_process(&descriptor).await?;
    Ok(())
}
