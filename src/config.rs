//! Configuration module for the dataset pipeline.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file (`geopipe.toml`)
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `GEOPIPE_` and use double
//! underscores to separate nested levels:
//! - `GEOPIPE_QUEUE__WORKERS=4` sets `queue.workers`
//! - `GEOPIPE_REDIS__URL=redis://cache:6379` sets `redis.url`
//! - `GEOPIPE_SCANNER__MODE=polling` sets `scanner.mode`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "geopipe.toml";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Global debug mode
    #[serde(default = "default_false")]
    pub debug: bool,

    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub extensions: ExtensionsConfig,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub locks: LockConfig,

    #[serde(default)]
    pub redis: RedisConfig,

    #[serde(default)]
    pub geoserver: GeoServerConfig,

    #[serde(default)]
    pub watchers: WatchersConfig,

    #[serde(default)]
    pub transform: TransformConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatchConfig {
    /// Root directory watched for incoming datasets
    #[serde(default = "default_watch_root")]
    pub root: PathBuf,

    /// Path fragment marking pipeline-produced artifacts; such paths
    /// never re-enter the pipeline
    #[serde(default = "default_output_marker")]
    pub output_marker: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExtensionsConfig {
    /// Allowed extensions for raster tile datasets
    #[serde(default = "default_raster_extensions")]
    pub raster: Vec<String>,

    /// Allowed extensions for point vector datasets
    #[serde(default = "default_points_extensions")]
    pub points: Vec<String>,

    /// Allowed extensions for analysis raster datasets
    #[serde(default = "default_analysis_extensions")]
    pub analysis: Vec<String>,

    /// Allowed extensions for style documents
    #[serde(default = "default_styles_extensions")]
    pub styles: Vec<String>,
}

impl ExtensionsConfig {
    /// Every recognized extension across all dataset kinds.
    pub fn all(&self) -> Vec<String> {
        let mut out = Vec::new();
        out.extend(self.raster.iter().cloned());
        out.extend(self.points.iter().cloned());
        out.extend(self.analysis.iter().cloned());
        out.extend(self.styles.iter().cloned());
        out
    }

    /// Check whether a path carries one of the recognized extensions.
    pub fn recognizes(&self, path: &Path) -> bool {
        match extension_of(path) {
            Some(ext) => self.all().iter().any(|e| e.eq_ignore_ascii_case(&ext)),
            None => false,
        }
    }
}

/// Extract the `.ext` (with leading dot, lowercased) of a path.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScannerMode {
    /// Native filesystem notifications with a first-run replay
    Native,
    /// Interval snapshot diffing with a persisted snapshot
    Polling,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScannerConfig {
    #[serde(default = "default_scanner_mode")]
    pub mode: ScannerMode,

    /// Polling interval in milliseconds
    #[serde(default = "default_scan_interval_ms")]
    pub interval_ms: u64,

    /// How long a path must be quiet before a native event is forwarded
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct QueueConfig {
    /// Settle window: delay between enqueueing a process job and its
    /// release to a worker, letting multi-file datasets finish arriving
    #[serde(default = "default_settle_delay_secs")]
    pub settle_delay_secs: u64,

    /// Attempt budget per job before it is reported failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Number of concurrent workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Dispatcher tick in milliseconds
    #[serde(default = "default_dispatch_interval_ms")]
    pub dispatch_interval_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LockConfig {
    /// TTL for scanner locks, seconds
    #[serde(default = "default_scanner_lock_ttl")]
    pub scanner_ttl_secs: u64,

    /// TTL for per-dataset-group locks, seconds. Must exceed the
    /// worst-case transform+publish duration
    #[serde(default = "default_group_lock_ttl")]
    pub group_ttl_secs: u64,

    /// TTL for reconciliation watcher locks, seconds
    #[serde(default = "default_watcher_lock_ttl")]
    pub watcher_ttl_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    Memory,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// State store backend. `memory` is only suitable for a single
    /// process and is primarily used by tests
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GeoServerConfig {
    #[serde(default = "default_geoserver_url")]
    pub url: String,

    #[serde(default = "default_geoserver_username")]
    pub username: String,

    #[serde(default = "default_geoserver_password")]
    pub password: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatchersConfig {
    /// Removal watcher interval, seconds
    #[serde(default = "default_removal_interval_secs")]
    pub removal_interval_secs: u64,

    /// Backend sweep interval, seconds
    #[serde(default = "default_backend_interval_secs")]
    pub backend_interval_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TransformConfig {
    /// Target SRS for reprojection
    #[serde(default = "default_target_srs")]
    pub target_srs: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module overrides, e.g. `scanner = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_false() -> bool {
    false
}
fn default_watch_root() -> PathBuf {
    PathBuf::from("files")
}
fn default_output_marker() -> String {
    "_output".to_string()
}
fn default_raster_extensions() -> Vec<String> {
    vec![".jpg".into(), ".jpeg".into()]
}
fn default_points_extensions() -> Vec<String> {
    vec![
        ".shp".into(),
        ".shx".into(),
        ".prj".into(),
        ".geojson".into(),
        ".kml".into(),
        ".kmz".into(),
    ]
}
fn default_analysis_extensions() -> Vec<String> {
    vec![".tif".into(), ".tiff".into(), ".geotiff".into()]
}
fn default_styles_extensions() -> Vec<String> {
    vec![".sld".into()]
}
fn default_scanner_mode() -> ScannerMode {
    ScannerMode::Polling
}
fn default_scan_interval_ms() -> u64 {
    30_000
}
fn default_debounce_ms() -> u64 {
    500
}
fn default_settle_delay_secs() -> u64 {
    300
}
fn default_max_attempts() -> u32 {
    3
}
fn default_workers() -> usize {
    num_cpus::get().min(4)
}
fn default_dispatch_interval_ms() -> u64 {
    1_000
}
fn default_scanner_lock_ttl() -> u64 {
    60
}
fn default_group_lock_ttl() -> u64 {
    3_600
}
fn default_watcher_lock_ttl() -> u64 {
    1_800
}
fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}
fn default_backend() -> StoreBackend {
    StoreBackend::Redis
}
fn default_geoserver_url() -> String {
    "http://localhost:8080/geoserver".to_string()
}
fn default_geoserver_username() -> String {
    "admin".to_string()
}
fn default_geoserver_password() -> String {
    "geoserver".to_string()
}
fn default_removal_interval_secs() -> u64 {
    60
}
fn default_backend_interval_secs() -> u64 {
    300
}
fn default_target_srs() -> String {
    "EPSG:3006".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            debug: false,
            watch: WatchConfig::default(),
            extensions: ExtensionsConfig::default(),
            scanner: ScannerConfig::default(),
            queue: QueueConfig::default(),
            locks: LockConfig::default(),
            redis: RedisConfig::default(),
            geoserver: GeoServerConfig::default(),
            watchers: WatchersConfig::default(),
            transform: TransformConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            root: default_watch_root(),
            output_marker: default_output_marker(),
        }
    }
}

impl Default for ExtensionsConfig {
    fn default() -> Self {
        Self {
            raster: default_raster_extensions(),
            points: default_points_extensions(),
            analysis: default_analysis_extensions(),
            styles: default_styles_extensions(),
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            mode: default_scanner_mode(),
            interval_ms: default_scan_interval_ms(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            settle_delay_secs: default_settle_delay_secs(),
            max_attempts: default_max_attempts(),
            workers: default_workers(),
            dispatch_interval_ms: default_dispatch_interval_ms(),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            scanner_ttl_secs: default_scanner_lock_ttl(),
            group_ttl_secs: default_group_lock_ttl(),
            watcher_ttl_secs: default_watcher_lock_ttl(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            backend: default_backend(),
        }
    }
}

impl Default for GeoServerConfig {
    fn default() -> Self {
        Self {
            url: default_geoserver_url(),
            username: default_geoserver_username(),
            password: default_geoserver_password(),
        }
    }
}

impl Default for WatchersConfig {
    fn default() -> Self {
        Self {
            removal_interval_secs: default_removal_interval_secs(),
            backend_interval_secs: default_backend_interval_secs(),
        }
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            target_srs: default_target_srs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load settings with layering: defaults, then TOML file, then env.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    /// Load settings from an explicit config file path.
    pub fn load_from(config_path: &Path) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("GEOPIPE_").split("__"))
            .extract()
    }

    /// Write a commented default configuration file.
    ///
    /// Returns an error if the file exists and `force` is false.
    pub fn init_config_file(force: bool) -> std::io::Result<PathBuf> {
        let path = PathBuf::from(CONFIG_FILE);
        if path.exists() && !force {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{CONFIG_FILE} already exists (use --force to overwrite)"),
            ));
        }
        std::fs::write(&path, DEFAULT_CONFIG_TEMPLATE)?;
        Ok(path)
    }
}

const DEFAULT_CONFIG_TEMPLATE: &str = r#"# geopipe configuration
version = 1
debug = false

[watch]
# Root directory watched for incoming datasets, laid out as
# <root>/<customer>/<year>/<type>/<dataset>
root = "files"
# Pipeline-produced artifacts carry this marker and are never re-ingested
output_marker = "_output"

[extensions]
raster = [".jpg", ".jpeg"]
points = [".shp", ".shx", ".prj", ".geojson", ".kml", ".kmz"]
analysis = [".tif", ".tiff", ".geotiff"]
styles = [".sld"]

[scanner]
# "polling" (snapshot diff) or "native" (filesystem notifications)
mode = "polling"
interval_ms = 30000
debounce_ms = 500

[queue]
# Seconds a dataset may keep receiving files before processing fires
settle_delay_secs = 300
max_attempts = 3
dispatch_interval_ms = 1000
# workers = 4

[locks]
scanner_ttl_secs = 60
group_ttl_secs = 3600
watcher_ttl_secs = 1800

[redis]
url = "redis://localhost:6379"
backend = "redis"

[geoserver]
url = "http://localhost:8080/geoserver"
username = "admin"
password = "geoserver"

[watchers]
removal_interval_secs = 60
backend_interval_secs = 300

[transform]
target_srs = "EPSG:3006"

[logging]
default = "info"

[logging.modules]
# scanner = "debug"
"#;
