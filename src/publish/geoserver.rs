//! GeoServer REST implementation of [`Publisher`].
//!
//! Every existence probe treats HTTP 404 as "not there" rather than an
//! error. Stores are replaced (delete with `recurse=true`, then create)
//! instead of patched, which keeps republish idempotent after partial
//! failures.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{Value, json};

use crate::config::GeoServerConfig;
use crate::{debug_event, log_event};

use super::{PublishError, Publisher};

/// SRS advertised for published vector layers.
const VECTOR_SRS: &str = "EPSG:4326";

pub struct GeoServerPublisher {
    client: Client,
    base_url: String,
    username: String,
    password: String,
    /// SRS advertised for raster coverages.
    raster_srs: String,
}

impl GeoServerPublisher {
    pub fn new(config: &GeoServerConfig, raster_srs: &str) -> Result<Self, PublishError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            raster_srs: raster_srs.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/rest/{path}", self.base_url)
    }

    async fn get(&self, path: &str) -> Result<Response, PublishError> {
        let resp = self
            .client
            .get(self.url(path))
            .basic_auth(&self.username, Some(&self.password))
            .header("Accept", "application/json")
            .send()
            .await?;
        Ok(resp)
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Response, PublishError> {
        let resp = self
            .client
            .post(self.url(path))
            .basic_auth(&self.username, Some(&self.password))
            .json(body)
            .send()
            .await?;
        Ok(resp)
    }

    async fn put_json(&self, path: &str, body: &Value) -> Result<Response, PublishError> {
        let resp = self
            .client
            .put(self.url(path))
            .basic_auth(&self.username, Some(&self.password))
            .json(body)
            .send()
            .await?;
        Ok(resp)
    }

    async fn delete(&self, path: &str) -> Result<Response, PublishError> {
        let resp = self
            .client
            .delete(self.url(path))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        Ok(resp)
    }

    /// 404 means the resource is absent, any other non-success is an error.
    async fn exists(&self, path: &str) -> Result<bool, PublishError> {
        let resp = self.get(path).await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            s => Err(PublishError::Rejected {
                operation: "probe",
                resource: path.to_string(),
                status: s.as_u16(),
            }),
        }
    }

    fn check(
        operation: &'static str,
        resource: &str,
        resp: &Response,
    ) -> Result<(), PublishError> {
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(PublishError::Rejected {
                operation,
                resource: resource.to_string(),
                status: status.as_u16(),
            })
        }
    }

    /// Delete a store so it can be recreated. A missing store is fine.
    async fn drop_store(&self, path: &str) -> Result<(), PublishError> {
        if self.exists(path).await? {
            let resp = self.delete(&format!("{path}?recurse=true")).await?;
            Self::check("delete store", path, &resp)?;
            debug_event!("publish", "existing store removed", "{path}");
        }
        Ok(())
    }
}

fn file_url(artifact: &Path) -> String {
    let path = artifact.display().to_string().replace('\\', "/");
    format!("file:///{}", path.trim_start_matches('/'))
}

#[async_trait]
impl Publisher for GeoServerPublisher {
    async fn workspace_exists(&self, workspace: &str) -> Result<bool, PublishError> {
        self.exists(&format!("workspaces/{workspace}")).await
    }

    async fn ensure_workspace(&self, workspace: &str) -> Result<(), PublishError> {
        if self.workspace_exists(workspace).await? {
            debug_event!("publish", "workspace already exists", "{workspace}");
            return Ok(());
        }
        let body = json!({ "workspace": { "name": workspace } });
        let resp = self.post_json("workspaces", &body).await?;
        Self::check("create workspace", workspace, &resp)?;
        log_event!("publish", "workspace created", "{workspace}");
        Ok(())
    }

    async fn ensure_coverage_store(
        &self,
        workspace: &str,
        store: &str,
        artifact: &Path,
    ) -> Result<(), PublishError> {
        let path = format!("workspaces/{workspace}/coveragestores/{store}");
        self.drop_store(&path).await?;

        let body = json!({
            "coverageStore": {
                "name": store,
                "type": "GeoTIFF",
                "enabled": true,
                "workspace": workspace,
                "url": file_url(artifact),
            }
        });
        let resp = self
            .post_json(&format!("workspaces/{workspace}/coveragestores"), &body)
            .await?;
        Self::check("create coverage store", store, &resp)?;
        log_event!("publish", "coverage store created", "{workspace}:{store}");
        Ok(())
    }

    async fn ensure_shapefile_store(
        &self,
        workspace: &str,
        store: &str,
        artifact: &Path,
    ) -> Result<(), PublishError> {
        let path = format!("workspaces/{workspace}/datastores/{store}");
        self.drop_store(&path).await?;

        let body = json!({
            "dataStore": {
                "name": store,
                "type": "Shapefile",
                "enabled": true,
                "workspace": workspace,
                "connectionParameters": {
                    "entry": [
                        { "@key": "url", "$": file_url(artifact) },
                        { "@key": "charset", "$": "UTF-8" },
                    ]
                }
            }
        });
        let resp = self
            .post_json(&format!("workspaces/{workspace}/datastores"), &body)
            .await?;
        Self::check("create shapefile store", store, &resp)?;
        log_event!("publish", "shapefile store created", "{workspace}:{store}");
        Ok(())
    }

    async fn ensure_layer(
        &self,
        workspace: &str,
        store: &str,
        layer: &str,
    ) -> Result<(), PublishError> {
        let body = json!({
            "coverage": {
                "name": layer,
                "nativeName": "raster",
                "title": layer,
                "srs": self.raster_srs,
                "enabled": true,
            }
        });
        let resp = self
            .post_json(
                &format!("workspaces/{workspace}/coveragestores/{store}/coverages"),
                &body,
            )
            .await?;
        Self::check("create layer", layer, &resp)?;
        log_event!("publish", "layer created", "{workspace}:{layer}");
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
        let body = json!({
            "featureType": {
                "name": layer,
                "nativeName": native_name,
                "title": layer,
                "srs": VECTOR_SRS,
                "enabled": true,
                "advertised": false,
            }
        });
        let resp = self
            .post_json(
                &format!("workspaces/{workspace}/datastores/{store}/featuretypes"),
                &body,
            )
            .await?;
        Self::check("create vector layer", layer, &resp)?;

        // Attach the default style in a second call, the feature type
        // endpoint does not accept one inline.
        let style_body = json!({
            "layer": { "defaultStyle": { "name": style } }
        });
        let resp = self
            .put_json(&format!("layers/{workspace}:{layer}"), &style_body)
            .await?;
        Self::check("apply style", layer, &resp)?;
        log_event!("publish", "vector layer created", "{workspace}:{layer} ({style})");
        Ok(())
    }

    async fn ensure_style(
        &self,
        workspace: &str,
        style: &str,
        sld: &str,
    ) -> Result<(), PublishError> {
        let style_path = format!("workspaces/{workspace}/styles/{style}");
        let (method_path, update) = if self.exists(&style_path).await? {
            (style_path.clone(), true)
        } else {
            (format!("workspaces/{workspace}/styles?name={style}"), false)
        };

        let builder = if update {
            self.client.put(self.url(&method_path))
        } else {
            self.client.post(self.url(&method_path))
        };
        let resp = builder
            .basic_auth(&self.username, Some(&self.password))
            .header("Content-Type", "application/vnd.ogc.sld+xml")
            .body(sld.to_string())
            .send()
            .await?;
        Self::check(
            if update { "update style" } else { "create style" },
            &style_path,
            &resp,
        )?;
        log_event!(
            "publish",
            if update { "style updated" } else { "style created" },
            "{workspace}:{style}"
        );
        Ok(())
    }

    async fn ensure_layer_group(
        &self,
        workspace: &str,
        group: &str,
        layers: &[String],
        styles: &[String],
    ) -> Result<(), PublishError> {
        let group_path = format!("workspaces/{workspace}/layergroups/{group}");
        if self.exists(&group_path).await? {
            let resp = self.delete(&group_path).await?;
            Self::check("delete layer group", &group_path, &resp)?;
            debug_event!("publish", "existing layer group removed", "{group}");
        }

        let layer_entries: Vec<Value> =
            layers.iter().map(|l| json!({ "name": l })).collect();
        let style_entries: Vec<Value> =
            styles.iter().map(|s| json!({ "name": s })).collect();
        let body = json!({
            "layerGroup": {
                "name": group,
                "mode": "SINGLE",
                "title": group,
                "workspace": { "name": workspace },
                "layers": { "layer": layer_entries },
                "styles": { "style": style_entries },
            }
        });
        let resp = self
            .post_json(&format!("workspaces/{workspace}/layergroups"), &body)
            .await?;
        Self::check("create layer group", group, &resp)?;
        log_event!("publish", "layer group created", "{workspace}:{group}");
        Ok(())
    }

    async fn remove_layer(&self, workspace: &str, layer: &str) -> Result<(), PublishError> {
        let path = format!("workspaces/{workspace}/layers/{layer}");
        let resp = self.delete(&path).await?;
        match resp.status() {
            StatusCode::NOT_FOUND => {
                debug_event!("publish", "layer already gone", "{workspace}:{layer}");
                Ok(())
            }
            s if s.is_success() => {
                log_event!("publish", "layer removed", "{workspace}:{layer}");
                Ok(())
            }
            s => Err(PublishError::Rejected {
                operation: "delete layer",
                resource: path,
                status: s.as_u16(),
            }),
        }
    }

    async fn remove_layer_group(&self, workspace: &str, group: &str) -> Result<(), PublishError> {
        let path = format!("workspaces/{workspace}/layergroups/{group}");
        if !self.exists(&path).await? {
            debug_event!("publish", "layer group already gone", "{group}");
            return Ok(());
        }
        let resp = self.delete(&path).await?;
        Self::check("delete layer group", &path, &resp)?;
        log_event!("publish", "layer group removed", "{workspace}:{group}");
        Ok(())
    }

    async fn remove_workspace(&self, workspace: &str) -> Result<(), PublishError> {
        let path = format!("workspaces/{workspace}");
        if !self.exists(&path).await? {
            debug_event!("publish", "workspace already gone", "{workspace}");
            return Ok(());
        }
        let resp = self.delete(&format!("{path}?recurse=true")).await?;
        Self::check("delete workspace", &path, &resp)?;
        log_event!("publish", "workspace removed", "{workspace}");
        Ok(())
    }

    async fn list_layers(&self, workspace: &str) -> Result<Vec<String>, PublishError> {
        let resp = self.get(&format!("workspaces/{workspace}/layers")).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        Self::check("list layers", workspace, &resp)?;
        let body: Value = resp.json().await?;
        Ok(extract_names(&body, "layers", "layer"))
    }

    async fn list_workspaces(&self) -> Result<Vec<String>, PublishError> {
        let resp = self.get("workspaces").await?;
        Self::check("list workspaces", "workspaces", &resp)?;
        let body: Value = resp.json().await?;
        Ok(extract_names(&body, "workspaces", "workspace"))
    }
}

/// Pull `name` fields out of GeoServer's `{"<outer>": {"<inner>": [...]}}`
/// list shape. An empty collection is serialized as the string `""`.
fn extract_names(body: &Value, outer: &str, inner: &str) -> Vec<String> {
    body.get(outer)
        .and_then(|o| o.get(inner))
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|e| e.get("name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
