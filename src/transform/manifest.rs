//! Per-page transform manifests
//!
//! `{ "angle": <degrees>, "ratio": <canvas width / normalised width> }`,
//! saved once per page so later runs can skip segment detection.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransformManifest {
    /// Skew angle in degrees
    pub angle: f64,
    pub ratio: f64,
}

impl TransformManifest {
    pub fn from_radians(angle: f64, ratio: f64) -> Self {
        Self {
            angle: angle.to_degrees(),
            ratio,
        }
    }

    pub fn angle_radians(&self) -> f64 {
        self.angle.to_radians()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        serde_json::from_str(&content).map_err(|e| PipelineError::json(path, e))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| PipelineError::json(path, e))?;
        std::fs::write(path, content).map_err(|e| PipelineError::io(path, e))
    }
}

/// Manifest read for `view`: `<dir>/<view>-manifest.json`
pub fn input_path(dir: &Path, view: u32) -> PathBuf {
    dir.join(format!("{}-manifest.json", view))
}

/// Manifest written for `view`: `<dir>/<view>.json`
pub fn output_path(dir: &Path, view: u32) -> PathBuf {
    dir.join(format!("{}.json", view))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;
    use tempfile::TempDir;

    #[test]
    fn test_degrees_on_disk() {
        let dir = TempDir::new().unwrap();
        let path = output_path(dir.path(), 7);
        TransformManifest::from_radians(FRAC_PI_2, 1.25).save(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!((raw["angle"].as_f64().unwrap() - 90.0).abs() < 1e-9);
        assert!((raw["ratio"].as_f64().unwrap() - 1.25).abs() < 1e-12);

        let loaded = TransformManifest::load(&path).unwrap();
        assert!((loaded.angle_radians() - FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn test_cache_paths() {
        let dir = Path::new("/cache");
        assert_eq!(input_path(dir, 3), PathBuf::from("/cache/3-manifest.json"));
        assert_eq!(output_path(dir, 3), PathBuf::from("/cache/3.json"));
    }
}
