//! Backend sweep: removes workspaces with no layers left.
//!
//! A workspace ends up empty when every dataset under a customer/year was
//! deleted; the removal watcher drops the layers, this sweep drops the
//! husk.

use std::sync::Arc;
use std::time::Duration;

use crate::log_event;
use crate::pipeline::PipelineDeps;

use super::WatchTaskError;

const BACKEND_LOCK: &str = "backend-sweep";

pub async fn run_backend_sweep(deps: Arc<PipelineDeps>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(
        deps.settings.watchers.backend_interval_secs,
    ));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = sweep_backend(&deps).await {
            tracing::error!("[backend-sweep] sweep failed: {e}");
        }
    }
}

pub async fn sweep_backend(deps: &PipelineDeps) -> Result<(), WatchTaskError> {
    let ttl = Duration::from_secs(deps.settings.locks.watcher_ttl_secs);
    if !deps.store.acquire_lock(BACKEND_LOCK, ttl).await? {
        return Ok(());
    }
    let result = sweep(deps).await;
    if let Err(e) = deps.store.release_lock(BACKEND_LOCK).await {
        tracing::error!("[backend-sweep] failed to release lock: {e}");
    }
    result
}

async fn sweep(deps: &PipelineDeps) -> Result<(), WatchTaskError> {
    for workspace in deps.publisher.list_workspaces().await? {
        let layers = deps.publisher.list_layers(&workspace).await?;
        if layers.is_empty() {
            log_event!("backend-sweep", "removing empty workspace", "{workspace}");
            deps.publisher.remove_workspace(&workspace).await?;
        }
    }
    Ok(())
}
