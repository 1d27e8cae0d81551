//! Publishing backend interface.
//!
//! The map server is a derived projection of the state store: workspaces,
//! stores, layers, styles and layer groups. All operations here are
//! idempotent ensure/remove verbs, and "not found" / "already exists" are
//! expected outcomes, never transport failures.

mod geoserver;
pub mod names;

pub use geoserver::GeoServerPublisher;
pub use names::{BackendNames, sanitize};

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

/// Errors from publish operations. "Not found" and "already exists" are
/// handled inside the implementations and never surface as errors.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("backend request failed: {0}")]
    Transport(String),

    #[error("backend rejected {operation} for {resource}: status {status}")]
    Rejected {
        operation: &'static str,
        resource: String,
        status: u16,
    },

    #[error("unexpected backend response: {0}")]
    Response(String),
}

impl From<reqwest::Error> for PublishError {
    fn from(e: reqwest::Error) -> Self {
        PublishError::Transport(e.to_string())
    }
}

/// Idempotent publishing operations against the map server.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn workspace_exists(&self, workspace: &str) -> Result<bool, PublishError>;

    async fn ensure_workspace(&self, workspace: &str) -> Result<(), PublishError>;

    /// Create or replace a raster coverage store backed by the artifact.
    async fn ensure_coverage_store(
        &self,
        workspace: &str,
        store: &str,
        artifact: &Path,
    ) -> Result<(), PublishError>;

    /// Create or replace a shapefile store backed by the artifact.
    async fn ensure_shapefile_store(
        &self,
        workspace: &str,
        store: &str,
        artifact: &Path,
    ) -> Result<(), PublishError>;

    /// Publish the raster layer of a coverage store.
    async fn ensure_layer(
        &self,
        workspace: &str,
        store: &str,
        layer: &str,
    ) -> Result<(), PublishError>;

    /// Publish a vector layer with a default style.
    async fn ensure_vector_layer(
        &self,
        workspace: &str,
        store: &str,
        layer: &str,
        style: &str,
        native_name: &str,
    ) -> Result<(), PublishError>;

    /// Create or update a style from SLD content.
    async fn ensure_style(
        &self,
        workspace: &str,
        style: &str,
        sld: &str,
    ) -> Result<(), PublishError>;

    /// Replace a layer group with the given layers/styles.
    async fn ensure_layer_group(
        &self,
        workspace: &str,
        group: &str,
        layers: &[String],
        styles: &[String],
    ) -> Result<(), PublishError>;

    async fn remove_layer(&self, workspace: &str, layer: &str) -> Result<(), PublishError>;

    async fn remove_layer_group(&self, workspace: &str, group: &str) -> Result<(), PublishError>;

    async fn remove_workspace(&self, workspace: &str) -> Result<(), PublishError>;

    async fn list_layers(&self, workspace: &str) -> Result<Vec<String>, PublishError>;

    async fn list_workspaces(&self) -> Result<Vec<String>, PublishError>;
}

/// Recompute and republish a workspace's layer group from its *live* layer
/// list. Never built from a cached set: other datasets in the group may have
/// changed concurrently.
pub async fn rebuild_layer_group(
    publisher: &dyn Publisher,
    workspace: &str,
    group: &str,
) -> Result<(), PublishError> {
    let layers = publisher.list_layers(workspace).await?;
    if layers.is_empty() {
        crate::log_event!(
            "publish",
            "no layers in workspace, layer group not recreated",
            "{workspace}"
        );
        return Ok(());
    }
    publisher
        .ensure_layer_group(workspace, group, &layers, &[])
        .await
}
