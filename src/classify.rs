//! Path classification: maps on-disk paths to typed dataset descriptors.
//!
//! The watched tree follows the convention
//! `<root>/<customer>/<year>/<type>/<dataset>[...]` where `<type>` is one of
//! `raster`, `points`, `analysis` or `styles`. Style documents nest one level
//! deeper: `styles/<points|analysis>/<file>.sld`.
//!
//! Classification is syntax-driven: the `<type>` segment is located
//! positionally (first recognized keyword with at least customer and year
//! before it), never by fixed offset, so the extra nesting of style paths and
//! varying root prefixes are handled uniformly. Paths that do not match the
//! convention yield `None`; callers treat that as "ignore", not as an error.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::{ExtensionsConfig, extension_of};

/// Sub-kind of a style document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StyleKind {
    Points,
    Analysis,
}

impl StyleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StyleKind::Points => "points",
            StyleKind::Analysis => "analysis",
        }
    }
}

/// Dataset type, as encoded by the `<type>` path segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    Raster,
    Points,
    Analysis,
    Styles(StyleKind),
}

impl DatasetKind {
    /// The `<type>` segment this kind occupies on disk.
    pub fn type_segment(&self) -> &'static str {
        match self {
            DatasetKind::Raster => "raster",
            DatasetKind::Points => "points",
            DatasetKind::Analysis => "analysis",
            DatasetKind::Styles(_) => "styles",
        }
    }
}

/// A classified dataset. `dir` is the canonical grouping key: every physical
/// file belonging to one dataset resolves to the same `dir`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    pub customer: String,
    pub year: String,
    pub kind: DatasetKind,
    /// Dataset name: directory name for rasters, file stem for
    /// points/analysis, `<sub>/<stem>` for styles.
    pub dataset: String,
    /// Canonical grouping key, forward slashes, includes the watch-root
    /// prefix of the observed path.
    pub dir: String,
}

const TYPE_KEYWORDS: [&str; 4] = ["raster", "points", "analysis", "styles"];

/// Classify a path into a dataset descriptor.
///
/// `deleted` marks a deletion event: the path may no longer exist, so only
/// path syntax is consulted (no filesystem stat). For live paths the
/// file/directory kind of the leaf is verified against the dataset type.
pub fn classify(
    path: &Path,
    extensions: &ExtensionsConfig,
    deleted: bool,
) -> Option<DatasetDescriptor> {
    let norm = path.to_str()?.replace('\\', "/");
    let norm = norm.trim_end_matches('/');
    let absolute = norm.starts_with('/');
    let segments: Vec<&str> = norm.split('/').filter(|s| !s.is_empty()).collect();

    // Locate the type segment positionally: the first recognized keyword
    // with room for <customer>/<year> before it.
    let ti = segments
        .iter()
        .enumerate()
        .position(|(i, s)| i >= 2 && TYPE_KEYWORDS.contains(&s.to_lowercase().as_str()))?;

    let customer = segments[ti - 2].to_string();
    let year = segments[ti - 1].to_string();
    let join = |upto: usize| -> String {
        let body = segments[..=upto].join("/");
        if absolute { format!("/{body}") } else { body }
    };

    match segments[ti].to_lowercase().as_str() {
        "raster" => {
            let dataset = *segments.get(ti + 1)?;
            if segments.len() == ti + 2 {
                // The leaf is the dataset itself and must be a directory.
                if extension_of(Path::new(dataset)).is_some() {
                    return None;
                }
                if !deleted && path.is_file() {
                    return None;
                }
            } else {
                // A file inside the dataset directory.
                let leaf = segments[segments.len() - 1];
                if !has_allowed_extension(leaf, &extensions.raster) {
                    return None;
                }
            }
            Some(DatasetDescriptor {
                customer,
                year,
                kind: DatasetKind::Raster,
                dataset: dataset.to_string(),
                dir: join(ti + 1),
            })
        }
        kw @ ("points" | "analysis") => {
            // Exactly one leaf file under the type directory.
            if segments.len() != ti + 2 {
                return None;
            }
            let leaf = segments[ti + 1];
            let allowed = if kw == "points" {
                &extensions.points
            } else {
                &extensions.analysis
            };
            if !has_allowed_extension(leaf, allowed) {
                return None;
            }
            if !deleted && path.is_dir() {
                return None;
            }
            let stem = file_stem(leaf);
            let kind = if kw == "points" {
                DatasetKind::Points
            } else {
                DatasetKind::Analysis
            };
            // Grouping by stem keeps multi-file sidecars (.shp/.shx/.prj)
            // in one dataset.
            let dir = format!("{}/{stem}", join(ti));
            Some(DatasetDescriptor {
                customer,
                year,
                kind,
                dataset: stem.to_string(),
                dir,
            })
        }
        "styles" => {
            if segments.len() != ti + 3 {
                return None;
            }
            let sub = match segments[ti + 1].to_lowercase().as_str() {
                "points" => StyleKind::Points,
                "analysis" => StyleKind::Analysis,
                _ => return None,
            };
            let leaf = segments[ti + 2];
            if !has_allowed_extension(leaf, &extensions.styles) {
                return None;
            }
            if !deleted && path.is_dir() {
                return None;
            }
            Some(DatasetDescriptor {
                customer,
                year,
                kind: DatasetKind::Styles(sub),
                dataset: format!("{}/{}", sub.as_str(), file_stem(leaf)),
                dir: join(ti + 2),
            })
        }
        _ => None,
    }
}

fn has_allowed_extension(leaf: &str, allowed: &[String]) -> bool {
    match extension_of(Path::new(leaf)) {
        Some(ext) => allowed.iter().any(|e| e.eq_ignore_ascii_case(&ext)),
        None => false,
    }
}

fn file_stem(leaf: &str) -> &str {
    leaf.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(leaf)
}
