//! Change detection over the watched dataset tree.
//!
//! Two interchangeable strategies feed the same handler: a native
//! (notify-based) watcher for low-latency setups and a polling walker for
//! network mounts where inotify is unreliable. Both emit [`ChangeEvent`]s
//! after the [`ScanFilter`] has dropped generated artifacts and unknown
//! extensions.

mod debounce;
mod native;
mod polling;

pub use debounce::Debouncer;
pub use native::{run_native_scanner, startup_replay};
pub use polling::{run_polling_scanner, scan_once};

/// Named lock serializing scan activity across pipeline instances. Held
/// by every polling pass and by the native scanner's startup replay.
pub(crate) const SCANNER_LOCK: &str = "scanner";

use std::path::Path;

use thiserror::Error;

use crate::classify::classify;
use crate::config::{Settings, extension_of};
use crate::pipeline::PipelineDeps;
use crate::store::{FileStatus, StoreError, normalize_path_key};
use crate::{debug_event, log_event};

#[derive(Error, Debug)]
pub enum ScanError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("watch setup failed: {0}")]
    Notify(#[from] notify::Error),

    #[error("scan io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A filtered filesystem observation, paths normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Added(String),
    Changed(String),
    Removed(String),
}

/// Decides which paths enter the pipeline at all.
#[derive(Debug, Clone)]
pub struct ScanFilter {
    extensions: Vec<String>,
    output_marker: String,
}

impl ScanFilter {
    pub fn new(settings: &Settings) -> Self {
        Self {
            extensions: settings.extensions.all(),
            output_marker: settings.watch.output_marker.clone(),
        }
    }

    /// Accept only recognized extensions, and never pipeline-generated
    /// artifacts (those carry the output marker in their file name).
    pub fn accepts(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        if name.to_lowercase().contains(&self.output_marker) {
            return false;
        }
        match extension_of(path) {
            Some(ext) => self.extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)),
            None => false,
        }
    }
}

/// Route one filtered change into the pipeline.
pub async fn handle_event(deps: &PipelineDeps, event: ChangeEvent) -> Result<(), StoreError> {
    match event {
        ChangeEvent::Added(path) | ChangeEvent::Changed(path) => {
            deps.queue.enqueue_analyze(&path).await?;
        }
        ChangeEvent::Removed(path) => {
            let key = normalize_path_key(&path);
            let Some(descriptor) =
                classify(Path::new(&key), &deps.settings.extensions, true)
            else {
                debug_event!("scanner", "unclassifiable removal dropped", "{key}");
                return Ok(());
            };
            match deps.store.get(&key).await? {
                Some(record) => {
                    deps.store
                        .put(&record.with_status(FileStatus::Removed))
                        .await?;
                    log_event!(
                        "scanner",
                        "file removed",
                        "{key} (dataset {})",
                        descriptor.dir
                    );
                }
                None => {
                    debug_event!("scanner", "removal of untracked file", "{key}");
                }
            }
        }
    }
    Ok(())
}
