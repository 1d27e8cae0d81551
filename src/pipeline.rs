//! Pipeline wiring: dependency container, startup recovery and the task
//! topology.
//!
//! One [`PipelineDeps`] instance is shared by every task: scanner, queue
//! dispatcher, worker pool and the two reconciliation watchers. Tests
//! build it from an in-memory store and mock collaborators.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::classify::DatasetDescriptor;
use crate::config::{ScannerMode, Settings, StoreBackend};
use crate::log_event;
use crate::publish::{GeoServerPublisher, PublishError, Publisher};
use crate::queue::{JobQueue, run_dispatcher, spawn_workers};
use crate::scanner::{run_native_scanner, run_polling_scanner};
use crate::store::{FileStatus, MemoryStore, RedisStore, StateStore, StoreError};
use crate::transform::{GdalTransformer, Transformer};
use crate::watchers::{run_backend_sweep, run_removal_watcher};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Shared collaborators of every pipeline task.
pub struct PipelineDeps {
    pub settings: Arc<Settings>,
    pub store: Arc<dyn StateStore>,
    pub queue: JobQueue,
    pub publisher: Arc<dyn Publisher>,
    pub transformer: Arc<dyn Transformer>,
}

impl PipelineDeps {
    /// Assemble from explicit parts. Tests inject mocks here.
    pub fn with_parts(
        settings: Settings,
        store: Arc<dyn StateStore>,
        publisher: Arc<dyn Publisher>,
        transformer: Arc<dyn Transformer>,
    ) -> Arc<Self> {
        let queue = JobQueue::new(
            Arc::clone(&store),
            Duration::from_secs(settings.queue.settle_delay_secs),
            settings.queue.max_attempts,
        );
        Arc::new(Self {
            settings: Arc::new(settings),
            store,
            queue,
            publisher,
            transformer,
        })
    }

    /// Build the production dependency set from settings.
    pub async fn build(settings: Settings) -> Result<Arc<Self>, PipelineError> {
        let store: Arc<dyn StateStore> = match settings.redis.backend {
            StoreBackend::Redis => {
                let store = RedisStore::connect(&settings.redis.url).await?;
                store.ping().await?;
                Arc::new(store)
            }
            StoreBackend::Memory => {
                tracing::warn!(
                    "[pipeline] memory store selected: state will not survive a restart"
                );
                Arc::new(MemoryStore::new())
            }
        };
        let publisher = Arc::new(GeoServerPublisher::new(
            &settings.geoserver,
            &settings.transform.target_srs,
        )?);
        let transformer = Arc::new(GdalTransformer::new(&settings));
        Ok(Self::with_parts(settings, store, publisher, transformer))
    }
}

/// Startup recovery: clear crash leftovers and resume interrupted work.
///
/// Locks from a dead process would otherwise stall every group until their
/// TTL; records frozen in `processing` would never be retried; `queued`
/// records without a pending job would wait for the next file change.
pub async fn recover(deps: &PipelineDeps) -> Result<(), StoreError> {
    let locks = deps.store.release_all_locks().await?;
    let reverted = deps.store.revert_processing_to_queued().await?;
    if locks > 0 || reverted > 0 {
        log_event!(
            "pipeline",
            "startup recovery",
            "{locks} stale locks released, {reverted} records requeued"
        );
    }

    let mut pending: BTreeMap<String, DatasetDescriptor> = BTreeMap::new();
    for record in deps.store.list_by_status(FileStatus::Queued).await? {
        pending.insert(record.basepath.clone(), record.descriptor);
    }
    for (dir, descriptor) in pending {
        if deps.queue.enqueue_process(&descriptor).await? {
            log_event!("pipeline", "resuming queued dataset", "{dir}");
        }
    }
    Ok(())
}

/// Run the full pipeline until ctrl-c.
pub async fn run(deps: Arc<PipelineDeps>) -> Result<(), PipelineError> {
    recover(&deps).await?;

    let (tx, rx) = mpsc::channel(1024);
    let workers = spawn_workers(Arc::clone(&deps), rx);
    log_event!("pipeline", "worker pool started", "{} workers", workers.len());

    tokio::spawn(run_dispatcher(Arc::clone(&deps), tx));

    let scanner_deps = Arc::clone(&deps);
    match deps.settings.scanner.mode {
        ScannerMode::Native => {
            tokio::spawn(async move {
                if let Err(e) = run_native_scanner(scanner_deps).await {
                    tracing::error!("[pipeline] native scanner stopped: {e}");
                }
            });
        }
        ScannerMode::Polling => {
            tokio::spawn(async move {
                if let Err(e) = run_polling_scanner(scanner_deps).await {
                    tracing::error!("[pipeline] polling scanner stopped: {e}");
                }
            });
        }
    }

    tokio::spawn(run_removal_watcher(Arc::clone(&deps)));
    tokio::spawn(run_backend_sweep(Arc::clone(&deps)));

    log_event!("pipeline", "running", "watching {}", deps.settings.watch.root.display());
    let _ = tokio::signal::ctrl_c().await;
    log_event!("pipeline", "shutdown requested");
    Ok(())
}
