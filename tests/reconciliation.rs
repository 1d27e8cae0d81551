//! Reconciliation watcher behavior: removal propagation and the orphan
//! workspace sweep.

mod common;

use std::fs;

use common::{MockPublisher, MockTransformer, build_deps};
use geopipe::queue::analyze_file;
use geopipe::store::FileStatus;
use geopipe::watchers::{sweep_backend, sweep_removed};
use tempfile::TempDir;

fn dataset_file(root: &TempDir, relative: &str, content: &[u8]) -> String {
    let path = root.path().join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, content).unwrap();
    path.display().to_string()
}

#[tokio::test]
async fn fully_removed_dataset_is_unpublished_and_purged() {
    let root = TempDir::new().unwrap();
    let publisher = MockPublisher::new();
    let deps = build_deps(root.path(), publisher.clone(), MockTransformer::new());

    let path = dataset_file(&root, "acme/2024/raster/site1/a.jpg", b"tile");
    analyze_file(&deps, &path).await.unwrap();

    // the last source file disappears
    fs::remove_file(&path).unwrap();
    let record = deps.store.get(&path).await.unwrap().unwrap();
    deps.store
        .put(&record.with_status(FileStatus::Removed))
        .await
        .unwrap();

    sweep_removed(&deps).await.unwrap();

    let calls = publisher.calls();
    assert!(calls.iter().any(|c| c.starts_with("remove_layer_group acme_2024:acme_2024")));
    assert!(calls.iter().any(|c| c.starts_with("remove_layer acme_2024:acme_2024_site1")));
    assert!(
        deps.store.get(&path).await.unwrap().is_none(),
        "removed-file record purged"
    );
}

#[tokio::test]
async fn partially_removed_dataset_is_requeued() {
    let root = TempDir::new().unwrap();
    let publisher = MockPublisher::new();
    let deps = build_deps(root.path(), publisher.clone(), MockTransformer::new());

    let kept = dataset_file(&root, "acme/2024/raster/site1/a.jpg", b"aa");
    let removed = dataset_file(&root, "acme/2024/raster/site1/b.jpg", b"bb");
    analyze_file(&deps, &kept).await.unwrap();
    analyze_file(&deps, &removed).await.unwrap();
    deps.queue.take_due().await.unwrap();

    fs::remove_file(&removed).unwrap();
    let record = deps.store.get(&removed).await.unwrap().unwrap();
    deps.store
        .put(&record.with_status(FileStatus::Removed))
        .await
        .unwrap();

    sweep_removed(&deps).await.unwrap();

    // the surviving file reprocesses, the removed record is gone
    let kept_record = deps.store.get(&kept).await.unwrap().unwrap();
    assert_eq!(kept_record.status, FileStatus::Queued);
    assert!(deps.store.get(&removed).await.unwrap().is_none());
    assert_eq!(deps.queue.take_due().await.unwrap().len(), 1);
    assert!(
        !publisher.calls().iter().any(|c| c.starts_with("remove_layer ")),
        "no backend removal while source files remain"
    );
}

#[tokio::test]
async fn sweep_without_removed_records_is_silent() {
    let root = TempDir::new().unwrap();
    let publisher = MockPublisher::new();
    let deps = build_deps(root.path(), publisher.clone(), MockTransformer::new());

    sweep_removed(&deps).await.unwrap();
    assert!(publisher.calls().is_empty());
}

#[tokio::test]
async fn backend_sweep_removes_only_empty_workspaces() {
    let root = TempDir::new().unwrap();
    let publisher = MockPublisher::new();
    let deps = build_deps(root.path(), publisher.clone(), MockTransformer::new());

    publisher.layers.lock().insert("husk_2023".into(), vec![]);
    publisher
        .layers
        .lock()
        .insert("acme_2024".into(), vec!["acme_2024_site1".into()]);

    sweep_backend(&deps).await.unwrap();

    let calls = publisher.calls();
    assert!(calls.contains(&"remove_workspace husk_2023".to_string()));
    assert!(!calls.iter().any(|c| c.contains("remove_workspace acme_2024")));
}
