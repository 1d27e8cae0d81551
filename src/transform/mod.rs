//! Dataset transformation: raw uploads to publishable artifacts.
//!
//! Transformers produce artifacts whose names carry the generated-output
//! marker, which keeps them invisible to the scanner and the aggregate
//! hash. A vector dataset without point geometry is not an error, it is a
//! `None` outcome the processor records as ignored.

mod gdal;

pub use gdal::GdalTransformer;

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

use crate::classify::DatasetDescriptor;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("io error during transform: {0}")]
    Io(#[from] std::io::Error),

    #[error("no input files for dataset {0}")]
    NoInput(String),

    #[error("{program} failed with {status}: {stderr}")]
    CommandFailed {
        program: &'static str,
        status: String,
        stderr: String,
    },
}

/// Converts raw dataset files into artifacts the publisher can serve.
#[async_trait]
pub trait Transformer: Send + Sync {
    /// Mosaic, reproject and pyramid a raster tile directory into one
    /// GeoTIFF. Returns the artifact path.
    async fn raster(&self, descriptor: &DatasetDescriptor) -> Result<PathBuf, TransformError>;

    /// Convert a vector dataset to a point shapefile. `Ok(None)` means the
    /// source carries no point geometry and must not be published.
    async fn vector(
        &self,
        descriptor: &DatasetDescriptor,
    ) -> Result<Option<PathBuf>, TransformError>;

    /// Standardize an analysis raster (reproject, compress, pyramid).
    async fn analysis(&self, descriptor: &DatasetDescriptor) -> Result<PathBuf, TransformError>;
}
