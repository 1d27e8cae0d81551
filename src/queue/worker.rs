//! Queue dispatch loop and worker pool.
//!
//! One dispatcher claims due jobs on an interval (under its own named lock
//! so concurrent pipeline instances never double-claim) and fans them out
//! over an mpsc channel to a bounded pool of workers.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};

use super::{ClaimedJob, Job, RetryDisposition};
use crate::pipeline::PipelineDeps;
use crate::processor::{self, ProcessError};
use crate::store::StoreError;

const DISPATCH_LOCK: &str = "queue-dispatch";
const DISPATCH_LOCK_TTL: Duration = Duration::from_secs(60);

/// Errors from executing a single job.
#[derive(Error, Debug)]
pub enum WorkError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("hashing failed: {0}")]
    Hashing(#[from] std::io::Error),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Run the dispatcher loop forever: claim due jobs each tick and hand them
/// to the worker pool.
pub async fn run_dispatcher(deps: Arc<PipelineDeps>, tx: mpsc::Sender<ClaimedJob>) {
    let interval = Duration::from_millis(deps.settings.queue.dispatch_interval_ms);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if let Err(e) = dispatch_tick(&deps, &tx).await {
            tracing::error!("[queue] dispatch tick failed: {e}");
        }
    }
}

async fn dispatch_tick(
    deps: &PipelineDeps,
    tx: &mpsc::Sender<ClaimedJob>,
) -> Result<(), StoreError> {
    if !deps
        .store
        .acquire_lock(DISPATCH_LOCK, DISPATCH_LOCK_TTL)
        .await?
    {
        return Ok(());
    }
    let claimed = deps.queue.take_due().await;
    deps.store.release_lock(DISPATCH_LOCK).await?;

    for job in claimed? {
        if tx.send(job).await.is_err() {
            // worker pool gone, nothing left to do
            return Ok(());
        }
    }
    Ok(())
}

/// Spawn the worker pool. Each worker pulls claimed jobs off the shared
/// receiver, executes them, and requeues failures with backoff.
pub fn spawn_workers(
    deps: Arc<PipelineDeps>,
    rx: mpsc::Receiver<ClaimedJob>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let rx = Arc::new(Mutex::new(rx));
    let count = deps.settings.queue.workers.max(1);
    (0..count)
        .map(|id| {
            let deps = Arc::clone(&deps);
            let rx = Arc::clone(&rx);
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    match job {
                        Some(claimed) => run_job(&deps, claimed, id).await,
                        None => break,
                    }
                }
            })
        })
        .collect()
}

async fn run_job(deps: &PipelineDeps, claimed: ClaimedJob, worker_id: usize) {
    let label = match &claimed.entry.job {
        Job::Analyze { path } => format!("analyze {path}"),
        Job::Process { descriptor } => format!("process {}", descriptor.dir),
    };
    crate::debug_event!("worker", "job started", "#{worker_id} {label}");

    let result = execute(deps, &claimed.entry.job).await;

    match result {
        Ok(()) => {
            crate::debug_event!("worker", "job completed", "#{worker_id} {label}");
        }
        Err(e) => {
            tracing::warn!("[worker] job failed: {label}: {e}");
            match deps.queue.requeue_failed(&claimed).await {
                Ok(RetryDisposition::Retried(_)) => {}
                Ok(RetryDisposition::Exhausted) => {
                    // Records stay queued; a later scan or restart retries.
                }
                Err(requeue_err) => {
                    tracing::error!("[worker] could not requeue {label}: {requeue_err}");
                }
            }
        }
    }
}

/// Execute one job. Public for the one-shot `scan` command and tests.
pub(crate) async fn execute(deps: &PipelineDeps, job: &Job) -> Result<(), WorkError> {
    match job {
        Job::Analyze { path } => super::analyze_file(deps, path).await,
        Job::Process { descriptor } => {
            processor::process_dataset(deps, descriptor).await?;
            Ok(())
        }
    }
}
