//! Per-type publish workflows.
//!
//! Each workflow transforms (where applicable) and pushes the dataset into
//! the backend. The caller owns the group lock and the record status
//! transitions; workflows only say whether the dataset was published or is
//! not applicable.

use std::collections::BTreeMap;

use crate::classify::{DatasetDescriptor, DatasetKind, StyleKind};
use crate::log_event;
use crate::pipeline::PipelineDeps;
use crate::publish::{BackendNames, rebuild_layer_group};
use crate::store::FileStatus;

use super::{Outcome, ProcessError};

/// Fallback point style uploaded alongside the first vector layer of a
/// dataset. Replaced wholesale when a style document arrives.
const DEFAULT_POINT_SLD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<StyledLayerDescriptor version="1.0.0"
    xmlns="http://www.opengis.net/sld"
    xmlns:ogc="http://www.opengis.net/ogc"
    xmlns:xlink="http://www.w3.org/1999/xlink"
    xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
    xsi:schemaLocation="http://www.opengis.net/sld http://schemas.opengis.net/sld/1.0.0/StyledLayerDescriptor.xsd">
  <NamedLayer>
    <Name>default_point</Name>
    <UserStyle>
      <Name>default_point</Name>
      <FeatureTypeStyle>
        <Rule>
          <PointSymbolizer>
            <Graphic>
              <Mark>
                <WellKnownName>circle</WellKnownName>
                <Fill>
                  <CssParameter name="fill">#FF0000</CssParameter>
                </Fill>
              </Mark>
              <Size>6</Size>
            </Graphic>
          </PointSymbolizer>
        </Rule>
      </FeatureTypeStyle>
    </UserStyle>
  </NamedLayer>
</StyledLayerDescriptor>
"#;

pub(super) async fn run(
    deps: &PipelineDeps,
    descriptor: &DatasetDescriptor,
) -> Result<Outcome, ProcessError> {
    let names = BackendNames::for_dataset(descriptor);

    let outcome = match descriptor.kind {
        DatasetKind::Raster => raster(deps, descriptor, &names).await?,
        DatasetKind::Points => points(deps, descriptor, &names).await?,
        DatasetKind::Analysis => analysis(deps, descriptor, &names).await?,
        DatasetKind::Styles(sub) => styles(deps, descriptor, &names, sub).await?,
    };

    // The group always reflects the live layer list, whatever this run
    // changed.
    rebuild_layer_group(
        deps.publisher.as_ref(),
        &names.workspace,
        &names.layer_group,
    )
    .await?;

    Ok(outcome)
}

async fn raster(
    deps: &PipelineDeps,
    descriptor: &DatasetDescriptor,
    names: &BackendNames,
) -> Result<Outcome, ProcessError> {
    let artifact = deps.transformer.raster(descriptor).await?;
    deps.publisher.ensure_workspace(&names.workspace).await?;
    deps.publisher
        .ensure_coverage_store(&names.workspace, &names.store, &artifact)
        .await?;
    deps.publisher
        .ensure_layer(&names.workspace, &names.store, &names.layer)
        .await?;
    Ok(Outcome::Published)
}

async fn points(
    deps: &PipelineDeps,
    descriptor: &DatasetDescriptor,
    names: &BackendNames,
) -> Result<Outcome, ProcessError> {
    let Some(artifact) = deps.transformer.vector(descriptor).await? else {
        return Ok(Outcome::NotApplicable);
    };
    deps.publisher.ensure_workspace(&names.workspace).await?;
    deps.publisher
        .ensure_shapefile_store(&names.workspace, &names.store, &artifact)
        .await?;
    deps.publisher
        .ensure_style(&names.workspace, &names.style, DEFAULT_POINT_SLD)
        .await?;
    deps.publisher
        .ensure_vector_layer(
            &names.workspace,
            &names.store,
            &names.layer,
            &names.style,
            &names.native_name,
        )
        .await?;
    Ok(Outcome::Published)
}

async fn analysis(
    deps: &PipelineDeps,
    descriptor: &DatasetDescriptor,
    names: &BackendNames,
) -> Result<Outcome, ProcessError> {
    let artifact = deps.transformer.analysis(descriptor).await?;
    deps.publisher.ensure_workspace(&names.workspace).await?;
    deps.publisher
        .ensure_coverage_store(&names.workspace, &names.store, &artifact)
        .await?;
    deps.publisher
        .ensure_layer(&names.workspace, &names.store, &names.layer)
        .await?;
    Ok(Outcome::Published)
}

/// Upload the style document, then requeue every dataset of the matching
/// sub-kind so their next publish picks the new style up.
async fn styles(
    deps: &PipelineDeps,
    descriptor: &DatasetDescriptor,
    names: &BackendNames,
    sub: StyleKind,
) -> Result<Outcome, ProcessError> {
    let sld = tokio::fs::read_to_string(&descriptor.dir).await?;
    deps.publisher.ensure_workspace(&names.workspace).await?;
    deps.publisher
        .ensure_style(&names.workspace, &names.style, &sld)
        .await?;

    let affected_kind = match sub {
        StyleKind::Points => DatasetKind::Points,
        StyleKind::Analysis => DatasetKind::Analysis,
    };
    // `dir` of a style record is the document path itself,
    // `<...>/<year>/styles/<sub>/<file>.sld`; the affected datasets live
    // under the sibling `<...>/<year>/<sub>/` tree.
    let Some(cut) = descriptor.dir.rfind("/styles/") else {
        return Ok(Outcome::Published);
    };
    let prefix = format!("{}/{}/", &descriptor.dir[..cut], sub.as_str());

    let mut groups: BTreeMap<String, DatasetDescriptor> = BTreeMap::new();
    for record in deps.store.list_by_prefix(&prefix).await? {
        if record.descriptor.kind != affected_kind {
            continue;
        }
        if matches!(record.status, FileStatus::Removed | FileStatus::Ignored) {
            continue;
        }
        groups.insert(record.basepath.clone(), record.descriptor);
    }
    for (dir, affected) in groups {
        deps.store
            .bulk_set_status(&dir, FileStatus::Queued)
            .await?;
        deps.queue.enqueue_process(&affected).await?;
        log_event!("processor", "dataset requeued for restyle", "{dir}");
    }

    Ok(Outcome::Published)
}
