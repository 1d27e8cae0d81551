//! Backend naming convention.
//!
//! Names are bit-exact for interoperability with the map server: workspace
//! and layer group are `<customer>_<year>`, stores are
//! `<customer>_<year>_<dataset>`, vector and analysis layers carry a type
//! suffix, and everything is lowercased with spaces replaced by underscores
//! before use.

use crate::classify::{DatasetDescriptor, DatasetKind};

/// Resolved backend names for one dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendNames {
    pub workspace: String,
    pub layer_group: String,
    pub store: String,
    pub layer: String,
    /// Source-native layer name inside the store (vector datasets only).
    pub native_name: String,
    pub style: String,
}

/// Lowercase and replace spaces, as the backend expects.
pub fn sanitize(name: &str) -> String {
    name.to_lowercase().replace(' ', "_")
}

impl BackendNames {
    pub fn for_dataset(descriptor: &DatasetDescriptor) -> Self {
        let workspace = sanitize(&format!("{}_{}", descriptor.customer, descriptor.year));
        let layer_group = workspace.clone();
        let base = sanitize(&format!(
            "{}_{}_{}",
            descriptor.customer, descriptor.year, descriptor.dataset
        ));

        match descriptor.kind {
            DatasetKind::Raster => Self {
                workspace,
                layer_group,
                store: base.clone(),
                layer: base,
                native_name: String::new(),
                style: String::new(),
            },
            DatasetKind::Points => Self {
                workspace,
                layer_group,
                store: base.clone(),
                layer: format!("{base}_points"),
                native_name: sanitize(&format!("{}_output", descriptor.dataset)),
                style: format!("{base}_points_default"),
            },
            DatasetKind::Analysis => Self {
                workspace,
                layer_group,
                store: base.clone(),
                layer: format!("{base}_analysis"),
                native_name: String::new(),
                style: format!("{base}_analysis_default"),
            },
            DatasetKind::Styles(_) => Self {
                workspace,
                layer_group,
                store: base.clone(),
                layer: base.clone(),
                native_name: String::new(),
                // dataset is `<sub>/<stem>`; flatten for the style name
                style: base.replace('/', "_"),
            },
        }
    }
}
