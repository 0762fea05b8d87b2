//! Storage Layer
//!
//! Per-user directories for settings and saved remote manifests.

use anyhow::Result;
use std::path::PathBuf;

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("org", "geohistoricaldata", "directory-iiif")
        .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))
}

/// Get the application cache directory, used for saved canvas manifests
pub fn get_cache_dir() -> Result<PathBuf> {
    let cache_dir = project_dirs()?.cache_dir().to_path_buf();
    std::fs::create_dir_all(&cache_dir)?;

    Ok(cache_dir)
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = project_dirs()?.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}
