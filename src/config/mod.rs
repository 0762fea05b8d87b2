//! Application Configuration
//!
//! Pipeline settings stored in TOML format.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::geometry::SpanMode;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// General settings
    pub general: GeneralConfig,
    /// Image provider settings
    pub provider: ProviderConfig,
    /// Coordinate transform settings
    pub transform: TransformSettings,
    /// Annotation output settings
    pub annotate: AnnotateSettings,
}

/// General settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Publish under the local prefix instead of the remote one
    pub local: bool,
    pub local_prefix: String,
    pub remote_prefix: String,
    /// Language of textual bodies and labels
    pub language: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            local: false,
            local_prefix: "http://localhost:8000".to_string(),
            remote_prefix: "https://directory.geohistoricaldata.org".to_string(),
            language: "fr".to_string(),
        }
    }
}

impl GeneralConfig {
    /// Prefix of every published document id
    pub fn prefix(&self) -> &str {
        if self.local {
            &self.local_prefix
        } else {
            &self.remote_prefix
        }
    }
}

/// Where canvas shapes come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeSource {
    /// Fetch the remote manifest
    #[default]
    Online,
    /// Read a previously saved manifest from `cache_dir`
    Cached,
}

/// A manifest provider entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub label: String,
    pub homepage: String,
    pub logo: Option<String>,
}

/// Image provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Image server base URL
    pub base: String,
    pub source: ShapeSource,
    /// Saved remote manifests
    pub cache_dir: Option<PathBuf>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Extra attempts after a failed request
    pub retries: u32,
    pub retry_backoff_ms: u64,
    /// Holder of the scans
    pub image_agent: Agent,
    /// Publisher of the annotations
    pub project_agent: Agent,
    /// Branding logo shown on published manifests
    pub logo: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base: "https://gallica.bnf.fr".to_string(),
            source: ShapeSource::Online,
            cache_dir: None,
            timeout_secs: 30,
            retries: 2,
            retry_backoff_ms: 500,
            image_agent: Agent {
                id: "https://gallica.bnf.fr".to_string(),
                label: "Gallica & The SoDUCo Project".to_string(),
                homepage: "https://gallica.bnf.fr".to_string(),
                logo: Some(
                    "https://gallica.bnf.fr/accueil/sites/all/modules/custom/gallica_tetierev3/images/Logo_BnF.png"
                        .to_string(),
                ),
            },
            project_agent: Agent {
                id: "https://soduco.geohistoricaldata.org".to_string(),
                label: "The SoDUCo Project".to_string(),
                homepage: "https://soduco.geohistoricaldata.org".to_string(),
                logo: Some(
                    "https://soduco.geohistoricaldata.org/public/images/soduco_logo.png".to_string(),
                ),
            },
            logo: "https://www.bnf.fr/sites/default/files/logo.svg".to_string(),
        }
    }
}

/// Line segment detector tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LsdSettings {
    /// Image scale applied before detection
    pub scale: f64,
    /// Gaussian sigma factor, `sigma = sigma_scale / scale`
    pub sigma_scale: f64,
    /// Gradient quantization error bound
    pub quant: f64,
    /// Angle tolerance in degrees
    pub ang_th: f64,
    /// Detection threshold, `-log10(NFA) > log_eps`
    pub log_eps: f64,
    /// Minimal density of aligned points in a rectangle
    pub density_th: f64,
    /// Bins of the gradient pseudo-ordering
    pub n_bins: usize,
}

impl Default for LsdSettings {
    fn default() -> Self {
        Self {
            scale: 0.5,
            sigma_scale: 0.6,
            quant: 2.0,
            ang_th: 22.5,
            log_eps: 2.0,
            density_th: 0.7,
            n_bins: 1024,
        }
    }
}

/// Coordinate transform settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformSettings {
    /// Width the OCR rasters were normalised to
    pub normalized_width: f64,
    /// Accepted deviation from vertical, degrees
    pub vertical_tolerance_deg: f64,
    /// Fraction of the width ignored on each side
    pub border_ratio: f64,
    /// Page workers; 1 keeps the sequential loop
    pub workers: usize,
    pub lsd: LsdSettings,
}

impl Default for TransformSettings {
    fn default() -> Self {
        Self {
            normalized_width: 2048.0,
            vertical_tolerance_deg: 5.0,
            border_ratio: 0.1,
            workers: 1,
            lsd: LsdSettings::default(),
        }
    }
}

/// Transcript export mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptMode {
    #[default]
    Off,
    /// Write CSV files next to the annotations
    Csv,
    /// Link the export API
    Remote,
}

/// Annotation output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotateSettings {
    pub transcript: TranscriptMode,
    pub export_api: String,
    /// Entity width on its line: `proportional` or `window`
    pub span_mode: SpanMode,
}

impl Default for AnnotateSettings {
    fn default() -> Self {
        Self {
            transcript: TranscriptMode::Off,
            export_api: "https://api.geohistoricaldata.org/directories/export.csv".to_string(),
            span_mode: SpanMode::Proportional,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Invalid config {}", path.display()))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Default config file location
pub fn default_config_path() -> Result<PathBuf> {
    Ok(crate::storage::get_config_dir()?.join("config.toml"))
}

/// Explicit path, else the default file when present, else defaults
pub fn resolve_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        return load_config(path);
    }
    let path = default_config_path()?;
    if path.exists() {
        load_config(&path)
    } else {
        Ok(AppConfig::default())
    }
}
