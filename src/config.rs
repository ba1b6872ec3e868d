//! Application configuration.
//!
//! One `panelvault.toml` file, loaded once at startup into an [`AppConfig`]
//! that is passed by reference to every component. Nothing reads
//! configuration from globals.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! library_root = "comics"      # Tree of .cbz/.cbr files to index
//! data_dir = "data"            # Catalog database and thumbnail cache
//! temp_dir = "tmp"             # Per-user extracted books
//! scan_interval_secs = 3600    # Seconds between background cycles
//!
//! [thumbnails]
//! width = 300
//! height = 400
//! quality = 85                 # JPEG quality (1-100)
//! exact_resize_tolerance_px = 6
//! rotate_ratio_threshold = 1.15
//! invalidation_cooldown_secs = 60
//!
//! [processing]
//! workers = 4                  # Clamped to the number of CPU cores
//! batch_size = 20
//!
//! [post_process]
//! enabled = false
//! script = "pad.sh"            # Required when enabled
//!
//! [listing]
//! per_page = 15
//! recent_days = 7
//!
//! [reader]
//! keep_books = 10              # Extracted books kept per user
//! ```
//!
//! ## Partial Configuration
//!
//! Config files are sparse — override just the values you want. User values
//! are merged over the stock defaults, unknown keys are rejected, and the
//! result is validated before use.

use crate::cache::ThumbCache;
use crate::imaging::{PostProcessHook, Quality, ThumbnailConfig};
use crate::types::Geometry;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Application configuration loaded from `panelvault.toml`.
///
/// All fields have sensible defaults. Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Root of the comic library.
    pub library_root: String,
    /// Catalog database and thumbnail cache.
    pub data_dir: String,
    /// Scratch space for extracted books.
    pub temp_dir: String,
    /// Seconds between background reconcile + thumbnail cycles.
    pub scan_interval_secs: u64,
    pub thumbnails: ThumbnailsConfig,
    pub processing: ProcessingConfig,
    pub post_process: PostProcessConfig,
    pub listing: ListingConfig,
    pub reader: ReaderConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            library_root: "comics".to_string(),
            data_dir: "data".to_string(),
            temp_dir: "tmp".to_string(),
            scan_interval_secs: 3600,
            thumbnails: ThumbnailsConfig::default(),
            processing: ProcessingConfig::default(),
            post_process: PostProcessConfig::default(),
            listing: ListingConfig::default(),
            reader: ReaderConfig::default(),
        }
    }
}

impl AppConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.thumbnails;
        if t.width == 0 || t.height == 0 {
            return Err(ConfigError::Validation(
                "thumbnails.width and thumbnails.height must be non-zero".into(),
            ));
        }
        if !(1..=100).contains(&t.quality) {
            return Err(ConfigError::Validation(
                "thumbnails.quality must be 1-100".into(),
            ));
        }
        if !(t.rotate_ratio_threshold > 0.0) {
            return Err(ConfigError::Validation(
                "thumbnails.rotate_ratio_threshold must be positive".into(),
            ));
        }
        if self.processing.workers == 0 || self.processing.batch_size == 0 {
            return Err(ConfigError::Validation(
                "processing.workers and processing.batch_size must be non-zero".into(),
            ));
        }
        if self.post_process.enabled && self.post_process.script.is_none() {
            return Err(ConfigError::Validation(
                "post_process.script is required when post_process.enabled = true".into(),
            ));
        }
        if self.listing.per_page == 0 {
            return Err(ConfigError::Validation(
                "listing.per_page must be non-zero".into(),
            ));
        }
        if self.scan_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "scan_interval_secs must be non-zero".into(),
            ));
        }
        Ok(())
    }

    pub fn library_root(&self) -> PathBuf {
        PathBuf::from(&self.library_root)
    }

    pub fn catalog_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join("panelvault.db")
    }

    pub fn cache(&self) -> ThumbCache {
        ThumbCache::under(Path::new(&self.data_dir))
    }

    /// Root of the per-user book workspaces: `<temp_dir>/Books`.
    pub fn books_dir(&self) -> PathBuf {
        Path::new(&self.temp_dir).join("Books")
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    /// Geometry of the served thumbnail.
    pub fn geometry(&self) -> Geometry {
        Geometry::Box {
            width: self.thumbnails.width,
            height: self.thumbnails.height,
        }
    }

    pub fn thumbnail_config(&self) -> ThumbnailConfig {
        let t = &self.thumbnails;
        ThumbnailConfig {
            width: t.width,
            height: t.height,
            tolerance_px: t.exact_resize_tolerance_px,
            rotate_threshold: t.rotate_ratio_threshold,
            quality: Quality::new(t.quality),
        }
    }

    /// The post-process hook, when enabled.
    pub fn hook(&self) -> Option<PostProcessHook> {
        match (&self.post_process.enabled, &self.post_process.script) {
            (true, Some(script)) => Some(PostProcessHook::new(script)),
            _ => None,
        }
    }
}

/// Thumbnail generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThumbnailsConfig {
    pub width: u32,
    pub height: u32,
    pub quality: u32,
    /// Width delta (at target height) under which covers are resized exactly.
    pub exact_resize_tolerance_px: u32,
    /// Width/height ratio above which covers are rotated upright.
    pub rotate_ratio_threshold: f64,
    /// Minimum seconds between cache invalidation sweeps.
    pub invalidation_cooldown_secs: u64,
}

impl Default for ThumbnailsConfig {
    fn default() -> Self {
        Self {
            width: 300,
            height: 400,
            quality: 85,
            exact_resize_tolerance_px: 6,
            rotate_ratio_threshold: 1.15,
            invalidation_cooldown_secs: 60,
        }
    }
}

impl ThumbnailsConfig {
    pub fn invalidation_cooldown(&self) -> Duration {
        Duration::from_secs(self.invalidation_cooldown_secs)
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Thumbnail workers. Values larger than the core count are clamped down.
    pub workers: usize,
    /// Comics claimed per batch.
    pub batch_size: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_size: 20,
        }
    }
}

/// Resolve the effective worker count: `min(workers, cores)`, at least 1.
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.workers.min(cores).max(1)
}

/// External border/pad hook.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PostProcessConfig {
    pub enabled: bool,
    pub script: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ListingConfig {
    pub per_page: u32,
    /// Window of the "recent" listing.
    pub recent_days: u32,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            per_page: 15,
            recent_days: 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReaderConfig {
    /// Extracted books kept per user before the oldest are removed.
    pub keep_books: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self { keep_books: 10 }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(AppConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value. `Ok(None)` if it doesn't exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Load config from a file path.
///
/// A missing file yields the defaults. User values are merged on top of
/// stock defaults, unknown keys are rejected, and the result is validated.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let merged = match load_raw_config(path)? {
        Some(overlay) => merge_toml(base, overlay),
        None => base,
    };
    let config: AppConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Returns a fully-commented stock `panelvault.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# panelvault configuration
# ========================
# All settings are optional. Values shown below are the defaults.
# Unknown keys will cause an error.

# Tree of .cbz/.cbr archives to index. Symlinked subdirectories are followed.
library_root = "comics"

# Catalog database (panelvault.db) and the thumbnail cache (cache/).
data_dir = "data"

# Scratch space for books extracted for reading: <temp_dir>/Books/<user>/<id>/
temp_dir = "tmp"

# Seconds between background reconcile + thumbnail cycles (watch mode).
scan_interval_secs = 3600

[thumbnails]
# Target box for cover thumbnails, in pixels.
width = 300
height = 400
# JPEG quality (1-100).
quality = 85
# Covers whose width at the target height is within this many pixels of the
# target width are resized to the exact box; others are fitted inside it.
exact_resize_tolerance_px = 6
# Covers wider than this width/height ratio (double-page spreads) are
# rotated 90 degrees before thumbnailing.
rotate_ratio_threshold = 1.15
# Minimum seconds between sweeps that re-queue comics whose thumbnail file
# has gone missing.
invalidation_cooldown_secs = 60

[processing]
# Parallel thumbnail workers. Clamped to the number of CPU cores.
workers = 4
# Comics claimed from the catalog per batch.
batch_size = 20

[post_process]
# Run an external script to pad non-exact covers out to the full box:
#   bash <script> -T <W>x<H> <native.jpg> <output.jpg>
# A missing script marks the affected comics as errored.
enabled = false
# script = "pad.sh"

[listing]
# Comics per page.
per_page = 15
# How far back the "recent" listing reaches, in days.
recent_days = 7

[reader]
# Extracted books kept per user; older ones are deleted after each cycle.
keep_books = 10
"##
}
