//! Startup recovery: crash leftovers are cleared and interrupted work
//! resumes.

mod common;

use std::fs;
use std::time::Duration;

use common::{MockPublisher, MockTransformer, build_deps};
use geopipe::pipeline::recover;
use geopipe::queue::{Job, analyze_file};
use geopipe::store::FileStatus;
use tempfile::TempDir;

#[tokio::test]
async fn recovery_releases_locks_and_requeues_interrupted_datasets() {
    let root = TempDir::new().unwrap();
    let deps = build_deps(root.path(), MockPublisher::new(), MockTransformer::new());

    let path = root.path().join("acme/2024/analysis/ndvi.tif");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, b"raster").unwrap();
    let path = path.display().to_string();
    analyze_file(&deps, &path).await.unwrap();
    deps.queue.take_due().await.unwrap();

    // simulate a crash mid-run: record frozen in processing, lock held
    let record = deps.store.get(&path).await.unwrap().unwrap();
    let dir = record.basepath.clone();
    deps.store
        .put(&record.with_status(FileStatus::Processing))
        .await
        .unwrap();
    assert!(
        deps.store
            .acquire_lock(&format!("group:::{dir}"), Duration::from_secs(3600))
            .await
            .unwrap()
    );

    recover(&deps).await.unwrap();

    let record = deps.store.get(&path).await.unwrap().unwrap();
    assert_eq!(record.status, FileStatus::Queued);
    assert!(
        deps.store
            .acquire_lock(&format!("group:::{dir}"), Duration::from_secs(1))
            .await
            .unwrap(),
        "stale lock was released"
    );
    let due = deps.queue.take_due().await.unwrap();
    assert!(
        due.iter()
            .any(|j| matches!(&j.entry.job, Job::Process { descriptor } if descriptor.dir == dir)),
        "interrupted dataset re-enqueued"
    );
}
