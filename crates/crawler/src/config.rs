//! Configuration for the crawler

use crate::error::{CrawlerError, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default regex splitting a composite RNA ID into plate barcode and coordinate.
pub const DEFAULT_BARCODE_REGEX: &str = r"^[\W_]*([\w-]*)_([A-Z]\d{2})[\W_]*$";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Primary store (samples, history, imports, priority samples)
    #[serde(default = "default_samples_db")]
    pub samples_db: PathBuf,

    /// Warehouse (`lighthouse_sample`)
    #[serde(default = "default_warehouse_db")]
    pub warehouse_db: PathBuf,

    /// Plate tracking store
    #[serde(default = "default_plate_tracking_db")]
    pub plate_tracking_db: PathBuf,

    /// Cherry-pick event log
    #[serde(default = "default_events_db")]
    pub events_db: PathBuf,

    /// Root of the per-centre download directories
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Rows per warehouse transaction
    #[serde(default = "default_warehouse_batch_size")]
    pub warehouse_batch_size: usize,

    #[serde(default)]
    pub legacy: LegacyConfig,

    #[serde(default)]
    pub centres: Vec<CentreConfig>,
}

/// Settings for the one-shot legacy version backfill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyConfig {
    /// Root sample ids per event log query
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Cherry-picks before this instant were made under v0 rules
    #[serde(default)]
    pub v0_v1_cutoff: Option<DateTime<Utc>>,

    /// Cherry-picks before this instant (and after the v0 cutoff) were made under v1 rules
    #[serde(default)]
    pub v1_v2_cutoff: Option<DateTime<Utc>>,
}

/// One originating lab.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CentreConfig {
    pub name: String,

    /// Download sub-directory name
    pub prefix: String,

    /// Used when a row leaves `Lab ID` empty
    #[serde(default)]
    pub lab_id_default: String,

    #[serde(default = "default_barcode_field")]
    pub barcode_field: String,

    /// `None` or empty takes the barcode field verbatim as the plate barcode
    #[serde(default = "default_barcode_regex")]
    pub barcode_regex: Option<String>,

    pub backups_folder: PathBuf,

    /// Which download directory entries are result files
    pub file_regex: String,

    #[serde(default)]
    pub file_names_to_ignore: Vec<String>,

    #[serde(default = "default_labware_class")]
    pub biomek_labware_class: String,
}

/// A centre with its regexes compiled.
#[derive(Debug, Clone)]
pub struct CompiledCentre {
    pub config: CentreConfig,
    pub barcode_regex: Option<Regex>,
    pub file_regex: Regex,
}

fn default_home() -> PathBuf {
    crawler_logging::crawler_home().unwrap_or_else(|_| PathBuf::from(".crawler"))
}

fn default_samples_db() -> PathBuf {
    default_home().join("samples.sqlite3")
}

fn default_warehouse_db() -> PathBuf {
    default_home().join("warehouse.sqlite3")
}

fn default_plate_tracking_db() -> PathBuf {
    default_home().join("plate_tracking.sqlite3")
}

fn default_events_db() -> PathBuf {
    default_home().join("events.sqlite3")
}

fn default_download_dir() -> PathBuf {
    default_home().join("downloads")
}

fn default_warehouse_batch_size() -> usize {
    15_000
}

fn default_chunk_size() -> usize {
    10_000
}

fn default_barcode_field() -> String {
    "RNA ID".to_string()
}

fn default_barcode_regex() -> Option<String> {
    Some(DEFAULT_BARCODE_REGEX.to_string())
}

fn default_labware_class() -> String {
    "KingFisher_96_2ml".to_string()
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            samples_db: default_samples_db(),
            warehouse_db: default_warehouse_db(),
            plate_tracking_db: default_plate_tracking_db(),
            events_db: default_events_db(),
            download_dir: default_download_dir(),
            warehouse_batch_size: default_warehouse_batch_size(),
            legacy: LegacyConfig::default(),
            centres: Vec::new(),
        }
    }
}

impl Default for LegacyConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            v0_v1_cutoff: None,
            v1_v2_cutoff: None,
        }
    }
}

impl CrawlerConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: CrawlerConfig =
            toml::from_str(content).map_err(|e| CrawlerError::Config(e.to_string()))?;
        if config.warehouse_batch_size == 0 {
            return Err(CrawlerError::Config("warehouse_batch_size must be positive".to_string()));
        }
        if config.legacy.chunk_size == 0 {
            return Err(CrawlerError::Config("legacy.chunk_size must be positive".to_string()));
        }
        Ok(config)
    }

    pub fn centre(&self, name: &str) -> Option<&CentreConfig> {
        self.centres.iter().find(|c| c.name == name)
    }

    /// Compile every centre, failing on the first invalid regex.
    pub fn compile_centres(&self) -> Result<Vec<CompiledCentre>> {
        self.centres.iter().map(CentreConfig::compile).collect()
    }
}

impl CentreConfig {
    pub fn compile(&self) -> Result<CompiledCentre> {
        let barcode_regex = self
            .barcode_regex
            .as_deref()
            .filter(|pattern| !pattern.is_empty())
            .map(Regex::new)
            .transpose()
            .map_err(|e| CrawlerError::Config(format!("centre '{}': invalid barcode_regex: {e}", self.name)))?;
        let file_regex = Regex::new(&self.file_regex)
            .map_err(|e| CrawlerError::Config(format!("centre '{}': invalid file_regex: {e}", self.name)))?;

        Ok(CompiledCentre {
            config: self.clone(),
            barcode_regex,
            file_regex,
        })
    }

    /// `<download_dir>/<prefix>`
    pub fn download_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.prefix)
    }
}

impl CompiledCentre {
    /// Whether `name` is a result file for this centre. The file regex is
    /// anchored at the start of the name, not the end.
    pub fn matches_file_name(&self, name: &str) -> bool {
        self.file_regex.find(name).map_or(false, |m| m.start() == 0)
    }
}
