//! End-to-end pipeline behavior over the in-memory store and recording
//! mocks: analysis, dedup, publishing, failure recovery and style
//! propagation.

mod common;

use std::fs;
use std::path::PathBuf;

use common::{MockPublisher, MockTransformer, build_deps};
use geopipe::queue::{Job, analyze_file};
use geopipe::store::FileStatus;
use geopipe::{processor, DatasetKind};
use tempfile::TempDir;

fn dataset_file(root: &TempDir, relative: &str, content: &[u8]) -> String {
    let path = root.path().join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, content).unwrap();
    path.display().to_string()
}

#[tokio::test]
async fn multi_file_dataset_collapses_to_one_process_job() {
    let root = TempDir::new().unwrap();
    let deps = build_deps(root.path(), MockPublisher::new(), MockTransformer::new());

    for (name, content) in [("a.jpg", b"aa" as &[u8]), ("b.jpg", b"bb"), ("c.jpg", b"cc")] {
        let path = dataset_file(&root, &format!("acme/2024/raster/site1/{name}"), content);
        analyze_file(&deps, &path).await.unwrap();
    }

    assert_eq!(
        deps.store
            .list_by_status(FileStatus::Queued)
            .await
            .unwrap()
            .len(),
        3
    );
    let due = deps.queue.take_due().await.unwrap();
    assert_eq!(due.len(), 1, "three file changes, one consolidated job");
    match &due[0].entry.job {
        Job::Process { descriptor } => {
            assert_eq!(descriptor.kind, DatasetKind::Raster);
            assert_eq!(descriptor.dataset, "site1");
        }
        other => panic!("unexpected job: {other:?}"),
    }
}

#[tokio::test]
async fn raster_dataset_publishes_and_completes() {
    let root = TempDir::new().unwrap();
    let publisher = MockPublisher::new();
    let deps = build_deps(root.path(), publisher.clone(), MockTransformer::new());

    let path = dataset_file(&root, "acme/2024/raster/site1/a.jpg", b"tile");
    analyze_file(&deps, &path).await.unwrap();
    let descriptor = deps.store.get(&path).await.unwrap().unwrap().descriptor;

    processor::process_dataset(&deps, &descriptor).await.unwrap();

    let record = deps.store.get(&path).await.unwrap().unwrap();
    assert_eq!(record.status, FileStatus::Done);

    let calls = publisher.calls();
    assert!(calls.iter().any(|c| c.starts_with("ensure_workspace acme_2024")));
    assert!(calls.iter().any(|c| c.starts_with("ensure_coverage_store acme_2024:acme_2024_site1")));
    assert!(calls.iter().any(|c| c.contains("ensure_layer acme_2024:acme_2024_site1:acme_2024_site1")));
    // the group is rebuilt from the live layer list
    assert!(calls.iter().any(|c| c.starts_with("ensure_layer_group acme_2024:acme_2024 [acme_2024_site1]")));
}

#[tokio::test]
async fn processing_a_dataset_leaves_prefix_sharing_neighbors_queued() {
    let root = TempDir::new().unwrap();
    let publisher = MockPublisher::new();
    let deps = build_deps(root.path(), publisher.clone(), MockTransformer::new());

    // Stem-based groups: `wells` is a key prefix of `wells2`.
    let wells = dataset_file(&root, "acme/2024/points/wells.shp", b"w");
    let wells2 = dataset_file(&root, "acme/2024/points/wells2.shp", b"w2");
    analyze_file(&deps, &wells).await.unwrap();
    analyze_file(&deps, &wells2).await.unwrap();

    let descriptor = deps.store.get(&wells).await.unwrap().unwrap().descriptor;
    processor::process_dataset(&deps, &descriptor).await.unwrap();

    assert_eq!(
        deps.store.get(&wells).await.unwrap().unwrap().status,
        FileStatus::Done
    );
    assert_eq!(
        deps.store.get(&wells2).await.unwrap().unwrap().status,
        FileStatus::Queued,
        "the neighboring group must not ride along"
    );
    assert!(publisher.calls().iter().all(|c| !c.contains("wells2")));
}

#[tokio::test]
async fn republishing_an_unchanged_dataset_skips_the_backend() {
    let root = TempDir::new().unwrap();
    let publisher = MockPublisher::new();
    let deps = build_deps(root.path(), publisher.clone(), MockTransformer::new());

    let path = dataset_file(&root, "acme/2024/raster/site1/a.jpg", b"tile");
    analyze_file(&deps, &path).await.unwrap();
    let descriptor = deps.store.get(&path).await.unwrap().unwrap().descriptor;
    processor::process_dataset(&deps, &descriptor).await.unwrap();
    let published_calls = publisher.calls().len();

    // An mtime-only touch reaches the processor again, but the aggregate
    // content hash still matches the published fingerprint.
    deps.store
        .bulk_set_status(&descriptor.dir, FileStatus::Queued)
        .await
        .unwrap();
    processor::process_dataset(&deps, &descriptor).await.unwrap();
    assert_eq!(
        publisher.calls().len(),
        published_calls,
        "no backend traffic for unchanged content"
    );
    assert_eq!(
        deps.store.get(&path).await.unwrap().unwrap().status,
        FileStatus::Done
    );

    // Real content change: the full workflow runs again.
    dataset_file(&root, "acme/2024/raster/site1/a.jpg", b"tile v2");
    deps.store
        .bulk_set_status(&descriptor.dir, FileStatus::Queued)
        .await
        .unwrap();
    processor::process_dataset(&deps, &descriptor).await.unwrap();
    assert!(publisher.calls().len() > published_calls);
}

#[tokio::test]
async fn mid_workflow_failure_reverts_the_group_to_queued() {
    let root = TempDir::new().unwrap();
    let publisher = MockPublisher::new();
    let deps = build_deps(root.path(), publisher.clone(), MockTransformer::new());

    let path = dataset_file(&root, "acme/2024/raster/site1/a.jpg", b"tile");
    analyze_file(&deps, &path).await.unwrap();
    let descriptor = deps.store.get(&path).await.unwrap().unwrap().descriptor;

    publisher.fail_on("ensure_layer");
    let result = processor::process_dataset(&deps, &descriptor).await;
    assert!(result.is_err());

    let record = deps.store.get(&path).await.unwrap().unwrap();
    assert_eq!(record.status, FileStatus::Queued, "failed run leaves the group retryable");
}

#[tokio::test]
async fn vector_without_point_geometry_is_ignored_not_published() {
    let root = TempDir::new().unwrap();
    let publisher = MockPublisher::new();
    let deps = build_deps(root.path(), publisher.clone(), MockTransformer::without_points());

    let path = dataset_file(&root, "acme/2024/points/wells.shp", b"shp");
    analyze_file(&deps, &path).await.unwrap();
    let descriptor = deps.store.get(&path).await.unwrap().unwrap().descriptor;

    processor::process_dataset(&deps, &descriptor).await.unwrap();

    let record = deps.store.get(&path).await.unwrap().unwrap();
    assert_eq!(record.status, FileStatus::Ignored);
    let calls = publisher.calls();
    assert!(
        !calls.iter().any(|c| c.starts_with("ensure_shapefile_store")),
        "nothing published for a non-applicable dataset: {calls:?}"
    );
}

#[tokio::test]
async fn unchanged_done_file_is_a_no_op() {
    let root = TempDir::new().unwrap();
    let deps = build_deps(root.path(), MockPublisher::new(), MockTransformer::new());

    let path = dataset_file(&root, "acme/2024/analysis/ndvi.tif", b"raster");
    analyze_file(&deps, &path).await.unwrap();
    // drain the queue and mark the run complete
    assert_eq!(deps.queue.take_due().await.unwrap().len(), 1);
    let record = deps.store.get(&path).await.unwrap().unwrap();
    deps.store.put(&record.with_status(FileStatus::Done)).await.unwrap();

    analyze_file(&deps, &path).await.unwrap();

    let record = deps.store.get(&path).await.unwrap().unwrap();
    assert_eq!(record.status, FileStatus::Done);
    assert!(deps.queue.take_due().await.unwrap().is_empty(), "no new work for unchanged content");
}

#[tokio::test]
async fn changed_content_requeues_a_done_file() {
    let root = TempDir::new().unwrap();
    let deps = build_deps(root.path(), MockPublisher::new(), MockTransformer::new());

    let path = dataset_file(&root, "acme/2024/analysis/ndvi.tif", b"v1");
    analyze_file(&deps, &path).await.unwrap();
    deps.queue.take_due().await.unwrap();
    let record = deps.store.get(&path).await.unwrap().unwrap();
    deps.store.put(&record.with_status(FileStatus::Done)).await.unwrap();

    fs::write(PathBuf::from(&path), b"v2").unwrap();
    analyze_file(&deps, &path).await.unwrap();

    let record = deps.store.get(&path).await.unwrap().unwrap();
    assert_eq!(record.status, FileStatus::Queued);
    assert_eq!(deps.queue.take_due().await.unwrap().len(), 1);
}

#[tokio::test]
async fn style_document_requeues_matching_datasets() {
    let root = TempDir::new().unwrap();
    let publisher = MockPublisher::new();
    let deps = build_deps(root.path(), publisher.clone(), MockTransformer::new());

    // a published points dataset
    let wells = dataset_file(&root, "acme/2024/points/wells.shp", b"shp");
    analyze_file(&deps, &wells).await.unwrap();
    let wells_descriptor = deps.store.get(&wells).await.unwrap().unwrap().descriptor;
    processor::process_dataset(&deps, &wells_descriptor).await.unwrap();
    deps.queue.take_due().await.unwrap();

    // a style document for the points sub-kind arrives
    let sld = dataset_file(
        &root,
        "acme/2024/styles/points/green.sld",
        b"<StyledLayerDescriptor/>",
    );
    analyze_file(&deps, &sld).await.unwrap();
    let sld_descriptor = deps.store.get(&sld).await.unwrap().unwrap().descriptor;
    deps.queue.take_due().await.unwrap();
    processor::process_dataset(&deps, &sld_descriptor).await.unwrap();

    let calls = publisher.calls();
    assert!(calls.iter().any(|c| c.starts_with("ensure_style acme_2024:acme_2024_points_green")));

    let wells_record = deps.store.get(&wells).await.unwrap().unwrap();
    assert_eq!(wells_record.status, FileStatus::Queued, "points dataset requeued for restyle");
    let due = deps.queue.take_due().await.unwrap();
    assert!(
        due.iter().any(|j| matches!(&j.entry.job, Job::Process { descriptor } if descriptor.dir == wells_descriptor.dir)),
        "a process job exists for the restyled dataset"
    );
}
