//! Reconciliation watchers.
//!
//! The publishing backend is a projection of the state store and the
//! filesystem; these periodic tasks repair drift in both directions:
//! removals on disk propagate to the backend, and orphaned backend
//! workspaces are swept away.

mod backend;
mod removal;

pub use backend::{run_backend_sweep, sweep_backend};
pub use removal::{run_removal_watcher, sweep_removed};

use thiserror::Error;

use crate::publish::PublishError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum WatchTaskError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}
