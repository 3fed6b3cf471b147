use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{GridWatchError, GridWatchResult};
use crate::monitor::engine::EngineConfig;
use crate::monitor::sampler::SamplerSettings;
use crate::perception::catalog::{builtin_catalog, MonsterAsset};
use crate::perception::change_detector::ChangeConfig;
use crate::perception::grid::GridConfig;
use crate::perception::matcher::MatchConfig;

const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Index into the monitors reported by the OS.
    #[serde(default)]
    pub monitor_index: usize,
    /// Driving timer period; processing is further capped by
    /// `detection.min_scan_interval_ms`.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

fn default_tick_interval_ms() -> u64 {
    16
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            monitor_index: 0,
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_min_scan_interval_ms")]
    pub min_scan_interval_ms: u64,
    #[serde(default = "default_sample_size")]
    pub sample_size: u32,
    #[serde(default = "default_change_threshold")]
    pub change_threshold: f64,
}

fn default_min_scan_interval_ms() -> u64 {
    100
}

fn default_sample_size() -> u32 {
    10
}

fn default_change_threshold() -> f64 {
    40.0
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_scan_interval_ms: default_min_scan_interval_ms(),
            sample_size: default_sample_size(),
            change_threshold: default_change_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    #[serde(default = "default_compare_size")]
    pub compare_size: u32,
    /// Reference pixels with alpha at or below this are background.
    #[serde(default = "default_alpha_cutoff")]
    pub alpha_cutoff: u8,
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f64,
    #[serde(default = "default_assets_dir")]
    pub assets_dir: PathBuf,
    /// Per-image fetch limit; a slower asset is skipped.
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    /// Matching priority order; ties go to the earlier entry.
    #[serde(default = "builtin_catalog")]
    pub catalog: Vec<MonsterAsset>,
}

fn default_compare_size() -> u32 {
    64
}

fn default_alpha_cutoff() -> u8 {
    50
}

fn default_match_threshold() -> f64 {
    65.0
}

fn default_assets_dir() -> PathBuf {
    PathBuf::from("assets")
}

fn default_fetch_timeout_ms() -> u64 {
    10_000
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            compare_size: default_compare_size(),
            alpha_cutoff: default_alpha_cutoff(),
            match_threshold: default_match_threshold(),
            assets_dir: default_assets_dir(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            catalog: builtin_catalog(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_jpeg_quality")]
    pub capture_jpeg_quality: u8,
    /// When set, the cell snapshot is written here as JSON after every change.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

fn default_jpeg_quality() -> u8 {
    80
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            capture_jpeg_quality: default_jpeg_quality(),
            snapshot_path: None,
        }
    }
}

impl AppConfig {
    pub fn change_config(&self) -> ChangeConfig {
        ChangeConfig {
            change_threshold: self.detection.change_threshold,
        }
    }

    pub fn match_config(&self) -> MatchConfig {
        MatchConfig {
            compare_size: self.matching.compare_size.max(1),
            alpha_cutoff: self.matching.alpha_cutoff,
            match_threshold: self.matching.match_threshold,
            assets_dir: self.matching.assets_dir.clone(),
            fetch_timeout: Duration::from_millis(self.matching.fetch_timeout_ms.max(1)),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            sample_size: self.detection.sample_size.max(1),
            capture_jpeg_quality: self.output.capture_jpeg_quality.clamp(1, 100),
        }
    }

    pub fn sampler_settings(&self) -> SamplerSettings {
        SamplerSettings {
            tick_interval: Duration::from_millis(self.capture.tick_interval_ms.max(1)),
            min_scan_interval: Duration::from_millis(self.detection.min_scan_interval_ms),
        }
    }
}

/// Looks for config.toml next to the executable, then in the working
/// directory, then under the user config dir.
fn resolve_config_path() -> GridWatchResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join(CONFIG_FILE);
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join(CONFIG_FILE);
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    if let Some(dir) = dirs::config_dir() {
        let candidate = dir.join("gridwatch").join(CONFIG_FILE);
        if candidate.exists() {
            tracing::debug!(path = %candidate.display(), "config found in user config dir");
            return Ok(candidate);
        }
    }

    Err(GridWatchError::Config(
        "config.toml not found next to executable, in working directory or user config dir".into(),
    ))
}

pub fn load_config() -> GridWatchResult<AppConfig> {
    let path = resolve_config_path()?;
    load_config_from(&path)
}

pub fn load_config_from(path: &Path) -> GridWatchResult<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    config.grid.validate()?;
    tracing::info!(
        path = %path.display(),
        rows = config.grid.rows,
        cols = config.grid.cols,
        catalog = config.matching.catalog.len(),
        "config loaded"
    );
    Ok(config)
}

/// Writes to the resolved config file, or to the working directory if none
/// exists yet.
pub fn save_config(config: &AppConfig) -> GridWatchResult<()> {
    let path = match resolve_config_path() {
        Ok(path) => path,
        Err(_) => std::env::current_dir()?.join(CONFIG_FILE),
    };
    save_config_to(config, &path)
}

pub fn save_config_to(config: &AppConfig, path: &Path) -> GridWatchResult<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}
