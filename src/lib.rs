pub mod classify;
pub mod config;
pub mod hashing;
pub mod logging;
pub mod pipeline;
pub mod processor;
pub mod publish;
pub mod queue;
pub mod scanner;
pub mod store;
pub mod transform;
pub mod watchers;

pub use classify::{DatasetDescriptor, DatasetKind, StyleKind, classify};
pub use config::Settings;
pub use pipeline::PipelineDeps;
pub use store::{FileRecord, FileStatus, StateStore};
