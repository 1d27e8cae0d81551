//! GDAL/OGR command-line transformer.
//!
//! Shells out to the standard GDAL utilities rather than binding libgdal:
//! the commands are stable, the datasets are large, and a crashed utility
//! must never take the pipeline down with it.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use crate::classify::DatasetDescriptor;
use crate::config::Settings;
use crate::{debug_event, log_event};

use super::{TransformError, Transformer};

/// Source formats OGR is asked to probe for point geometry, in preference
/// order. Sidecar extensions (.shx, .prj) are never primary inputs.
const VECTOR_SOURCES: [&str; 4] = [".shp", ".geojson", ".kml", ".kmz"];

/// GeoTIFF creation options shared by the raster and analysis paths.
const TIF_OPTIONS: [&str; 2] = ["-a_nodata", "0"];

pub struct GdalTransformer {
    target_srs: String,
    raster_extensions: Vec<String>,
    analysis_extensions: Vec<String>,
    output_marker: String,
}

impl GdalTransformer {
    pub fn new(settings: &Settings) -> Self {
        Self {
            target_srs: settings.transform.target_srs.clone(),
            raster_extensions: settings.extensions.raster.clone(),
            analysis_extensions: settings.extensions.analysis.clone(),
            output_marker: settings.watch.output_marker.clone(),
        }
    }

    /// Reproject, compress and tile into a GeoTIFF, then build pyramids.
    async fn standardize_tif(&self, input: &Path, output: &Path) -> Result<(), TransformError> {
        let mut translate = Command::new("gdal_translate");
        translate
            .arg(input)
            .arg(output)
            .args(["-a_srs", &self.target_srs])
            .args(["-co", "COMPRESS=JPEG"])
            .args(["-co", "PHOTOMETRIC=YCBCR"])
            .args(["-co", "BIGTIFF=YES"])
            .args(["-co", "TILED=YES"])
            .args(["-co", "NUM_THREADS=8"])
            .args(TIF_OPTIONS);
        run("gdal_translate", translate).await?;

        let mut addo = Command::new("gdaladdo");
        addo.args(["-r", "average"])
            .arg(output)
            .args(["--config", "GDAL_NUM_THREADS", "8"])
            .args(["--config", "BIGTIFF_OVERVIEW", "IF_NEEDED"]);
        run("gdaladdo", addo).await?;
        Ok(())
    }
}

#[async_trait]
impl Transformer for GdalTransformer {
    async fn raster(&self, descriptor: &DatasetDescriptor) -> Result<PathBuf, TransformError> {
        let dir = PathBuf::from(&descriptor.dir);
        let vrt = dir.join(format!("raster{}.vrt", self.output_marker));
        let tif = dir.join(format!("raster{}.tif", self.output_marker));
        let file_list = dir.join("file_list.txt");

        let mut tiles = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_lowercase();
            if name.contains(&self.output_marker) {
                continue;
            }
            if self
                .raster_extensions
                .iter()
                .any(|ext| name.ends_with(ext.as_str()))
            {
                tiles.push(path.display().to_string());
            }
        }
        if tiles.is_empty() {
            return Err(TransformError::NoInput(descriptor.dir.clone()));
        }
        tiles.sort();

        log_event!(
            "transform",
            "mosaicking raster tiles",
            "{} tiles in {}",
            tiles.len(),
            descriptor.dir
        );
        tokio::fs::write(&file_list, tiles.join("\n")).await?;

        let mut buildvrt = Command::new("gdalbuildvrt");
        buildvrt.arg(&vrt).arg("-input_file_list").arg(&file_list);
        let result = async {
            run("gdalbuildvrt", buildvrt).await?;
            self.standardize_tif(&vrt, &tif).await
        }
        .await;

        // The tile list is scratch either way.
        let _ = tokio::fs::remove_file(&file_list).await;
        result?;

        log_event!("transform", "raster artifact ready", "{}", tif.display());
        Ok(tif)
    }

    async fn vector(
        &self,
        descriptor: &DatasetDescriptor,
    ) -> Result<Option<PathBuf>, TransformError> {
        let mut input = None;
        for ext in VECTOR_SOURCES {
            let candidate = PathBuf::from(format!("{}{ext}", descriptor.dir));
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                input = Some(candidate);
                break;
            }
        }
        let input = input.ok_or_else(|| TransformError::NoInput(descriptor.dir.clone()))?;

        let mut info = Command::new("ogrinfo");
        info.arg("-so").arg(&input);
        let summary = run("ogrinfo", info).await?;
        if !summary.contains("Point") {
            debug_event!(
                "transform",
                "no point geometry, dataset not publishable",
                "{}",
                input.display()
            );
            return Ok(None);
        }

        let parent = Path::new(&descriptor.dir)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let output = parent.join(format!(
            "{}{}.shp",
            descriptor.dataset, self.output_marker
        ));

        let mut convert = Command::new("ogr2ogr");
        convert
            .args(["-f", "ESRI Shapefile"])
            .arg(&output)
            .arg(&input)
            .args(["-nlt", "POINT", "-overwrite"]);
        run("ogr2ogr", convert).await?;

        log_event!("transform", "vector artifact ready", "{}", output.display());
        Ok(Some(output))
    }

    async fn analysis(&self, descriptor: &DatasetDescriptor) -> Result<PathBuf, TransformError> {
        let mut input = None;
        for ext in &self.analysis_extensions {
            let candidate = PathBuf::from(format!("{}{ext}", descriptor.dir));
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                input = Some(candidate);
                break;
            }
        }
        let input = input.ok_or_else(|| TransformError::NoInput(descriptor.dir.clone()))?;
        let output = PathBuf::from(format!("{}{}.tif", descriptor.dir, self.output_marker));

        self.standardize_tif(&input, &output).await?;
        log_event!(
            "transform",
            "analysis artifact ready",
            "{}",
            output.display()
        );
        Ok(output)
    }
}

async fn run(program: &'static str, mut command: Command) -> Result<String, TransformError> {
    let output = command.output().await?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(TransformError::CommandFailed {
            program,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
