//! Shared fixtures: in-memory pipeline dependencies with recording mocks.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use geopipe::classify::DatasetDescriptor;
use geopipe::config::Settings;
use geopipe::pipeline::PipelineDeps;
use geopipe::publish::{PublishError, Publisher};
use geopipe::store::MemoryStore;
use geopipe::transform::{TransformError, Transformer};

/// Records every backend call and tracks published layers per workspace.
#[derive(Default)]
pub struct MockPublisher {
    pub calls: Mutex<Vec<String>>,
    pub layers: Mutex<BTreeMap<String, Vec<String>>>,
    /// Operation name that should fail (e.g. "ensure_layer").
    pub fail_on: Mutex<Option<&'static str>>,
}

impl MockPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn fail_on(&self, operation: &'static str) {
        *self.fail_on.lock() = Some(operation);
    }

    fn record(&self, operation: &'static str, detail: String) -> Result<(), PublishError> {
        self.calls.lock().push(format!("{operation} {detail}"));
        if *self.fail_on.lock() == Some(operation) {
            return Err(PublishError::Rejected {
                operation,
                resource: detail,
                status: 500,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn workspace_exists(&self, workspace: &str) -> Result<bool, PublishError> {
        Ok(self.layers.lock().contains_key(workspace))
    }

    async fn ensure_workspace(&self, workspace: &str) -> Result<(), PublishError> {
        self.record("ensure_workspace", workspace.to_string())?;
        self.layers.lock().entry(workspace.to_string()).or_default();
        Ok(())
    }

    async fn ensure_coverage_store(
        &self,
        workspace: &str,
        store: &str,
        artifact: &Path,
    ) -> Result<(), PublishError> {
        self.record(
            "ensure_coverage_store",
            format!("{workspace}:{store} {}", artifact.display()),
        )
    }

    async fn ensure_shapefile_store(
        &self,
        workspace: &str,
        store: &str,
        artifact: &Path,
    ) -> Result<(), PublishError> {
        self.record(
            "ensure_shapefile_store",
            format!("{workspace}:{store} {}", artifact.display()),
        )
    }

    async fn ensure_layer(
        &self,
        workspace: &str,
        store: &str,
        layer: &str,
    ) -> Result<(), PublishError> {
        self.record("ensure_layer", format!("{workspace}:{store}:{layer}"))?;
        let mut layers = self.layers.lock();
        let entry = layers.entry(workspace.to_string()).or_default();
        if !entry.contains(&layer.to_string()) {
            entry.push(layer.to_string());
        }
        Ok(())
    }

    async fn ensure_vector_layer(
        &self,
        workspace: &str,
        store: &str,
        layer: &str,
        style: &str,
        native_name: &str,
    ) -> Result<(), PublishError> {
        self.record(
            "ensure_vector_layer",
            format!("{workspace}:{store}:{layer} style={style} native={native_name}"),
        )?;
        let mut layers = self.layers.lock();
        let entry = layers.entry(workspace.to_string()).or_default();
        if !entry.contains(&layer.to_string()) {
            entry.push(layer.to_string());
        }
        Ok(())
    }

    async fn ensure_style(
        &self,
        workspace: &str,
        style: &str,
        _sld: &str,
    ) -> Result<(), PublishError> {
        self.record("ensure_style", format!("{workspace}:{style}"))
    }

    async fn ensure_layer_group(
        &self,
        workspace: &str,
        group: &str,
        layers: &[String],
        _styles: &[String],
    ) -> Result<(), PublishError> {
        self.record(
            "ensure_layer_group",
            format!("{workspace}:{group} [{}]", layers.join(",")),
        )
    }

    async fn remove_layer(&self, workspace: &str, layer: &str) -> Result<(), PublishError> {
        self.record("remove_layer", format!("{workspace}:{layer}"))?;
        if let Some(entry) = self.layers.lock().get_mut(workspace) {
            entry.retain(|l| l != layer);
        }
        Ok(())
    }

    async fn remove_layer_group(&self, workspace: &str, group: &str) -> Result<(), PublishError> {
        self.record("remove_layer_group", format!("{workspace}:{group}"))
    }

    async fn remove_workspace(&self, workspace: &str) -> Result<(), PublishError> {
        self.record("remove_workspace", workspace.to_string())?;
        self.layers.lock().remove(workspace);
        Ok(())
    }

    async fn list_layers(&self, workspace: &str) -> Result<Vec<String>, PublishError> {
        Ok(self
            .layers
            .lock()
            .get(workspace)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_workspaces(&self) -> Result<Vec<String>, PublishError> {
        Ok(self.layers.lock().keys().cloned().collect())
    }
}

/// Produces artifact paths without touching GDAL or the filesystem.
pub struct MockTransformer {
    /// Whether vector datasets carry point geometry.
    pub vector_applicable: bool,
}

impl MockTransformer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            vector_applicable: true,
        })
    }

    pub fn without_points() -> Arc<Self> {
        Arc::new(Self {
            vector_applicable: false,
        })
    }
}

#[async_trait]
impl Transformer for MockTransformer {
    async fn raster(&self, descriptor: &DatasetDescriptor) -> Result<PathBuf, TransformError> {
        Ok(PathBuf::from(format!("{}/raster_output.tif", descriptor.dir)))
    }

    async fn vector(
        &self,
        descriptor: &DatasetDescriptor,
    ) -> Result<Option<PathBuf>, TransformError> {
        if !self.vector_applicable {
            return Ok(None);
        }
        Ok(Some(PathBuf::from(format!(
            "{}_output.shp",
            descriptor.dir
        ))))
    }

    async fn analysis(&self, descriptor: &DatasetDescriptor) -> Result<PathBuf, TransformError> {
        Ok(PathBuf::from(format!("{}_output.tif", descriptor.dir)))
    }
}

/// Settings pointed at a temp root, with an immediate settle window.
pub fn test_settings(root: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.watch.root = root.to_path_buf();
    settings.queue.settle_delay_secs = 0;
    settings
}

pub fn build_deps(
    root: &Path,
    publisher: Arc<MockPublisher>,
    transformer: Arc<MockTransformer>,
) -> Arc<PipelineDeps> {
    PipelineDeps::with_parts(
        test_settings(root),
        Arc::new(MemoryStore::new()),
        publisher,
        transformer,
    )
}
