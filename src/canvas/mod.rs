//! Canvas Shapes
//!
//! Pixel dimensions of the image server's canvases, read from the
//! provider's Presentation 2 manifest of a document. One table is built per
//! directory, before any page is processed, and only read afterwards.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use crate::config::{ProviderConfig, ShapeSource};
use crate::error::{PipelineError, Result};

/// Canvas size in image server pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CanvasShape {
    pub height: u32,
    pub width: u32,
}

/// Canvas id to shape mapping for one document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanvasShapes {
    table: HashMap<String, CanvasShape>,
}

#[derive(Deserialize)]
struct RemoteManifest {
    #[serde(default)]
    sequences: Vec<RemoteSequence>,
}

#[derive(Deserialize)]
struct RemoteSequence {
    #[serde(default)]
    canvases: Vec<RemoteCanvas>,
}

#[derive(Deserialize)]
struct RemoteCanvas {
    #[serde(rename = "@id")]
    id: String,
    #[serde(flatten)]
    shape: CanvasShape,
}

impl CanvasShapes {
    /// Build the table from a manifest body
    pub fn from_manifest(body: &str) -> serde_json::Result<Self> {
        let manifest: RemoteManifest = serde_json::from_str(body)?;
        let table = manifest
            .sequences
            .into_iter()
            .flat_map(|sequence| sequence.canvases)
            .map(|canvas| (canvas.id, canvas.shape))
            .collect();
        Ok(Self { table })
    }

    #[cfg(test)]
    pub fn insert(&mut self, canvas_id: impl Into<String>, shape: CanvasShape) {
        self.table.insert(canvas_id.into(), shape);
    }

    pub fn get(&self, canvas_id: &str) -> Option<CanvasShape> {
        self.table.get(canvas_id).copied()
    }

    /// Like [`get`](Self::get), failing with `CanvasMissing`
    pub fn lookup(&self, canvas_id: &str) -> Result<CanvasShape> {
        self.get(canvas_id).ok_or_else(|| PipelineError::CanvasMissing {
            canvas_id: canvas_id.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Canvas id of image server view `ark_view`
pub fn canvas_id(base: &str, ark: &str, ark_view: i64) -> String {
    format!("{}/iiif/{}/canvas/f{}", base, ark, ark_view)
}

/// Presentation manifest of a document on the image server
pub fn manifest_url(base: &str, ark: &str) -> String {
    format!("{}/iiif/{}/manifest.json", base, ark)
}

/// File name of a saved manifest
pub fn cache_file_name(ark: &str) -> String {
    let stem: String = ark
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    format!("{}.json", stem)
}

/// Source of canvas shape tables
pub trait CanvasShapeProvider: Send + Sync {
    /// Shape table of the document `ark`; failure aborts the directory
    fn shapes(&self, ark: &str) -> Result<CanvasShapes>;
}

/// Fetches manifests from the image server
pub struct OnlineShapes {
    base: String,
    timeout: Duration,
    retries: u32,
    backoff: Duration,
    cache_dir: Option<PathBuf>,
}

impl OnlineShapes {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            base: config.base.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.timeout_secs),
            retries: config.retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
            cache_dir: config.cache_dir.clone(),
        }
    }

    async fn fetch_async(&self, url: &str) -> std::result::Result<String, String> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| e.to_string())?;

        let mut attempt = 0;
        loop {
            let outcome = match client.get(url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    resp.text().await.map_err(|e| e.to_string())
                }
                Ok(resp) => Err(format!("server returned {}", resp.status())),
                Err(e) => Err(e.to_string()),
            };

            match outcome {
                Ok(body) => return Ok(body),
                Err(reason) if attempt < self.retries => {
                    attempt += 1;
                    warn!("GET {} failed ({}), retry {}/{}", url, reason, attempt, self.retries);
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                Err(reason) => return Err(reason),
            }
        }
    }

    fn save(&self, ark: &str, body: &str) {
        let Some(dir) = &self.cache_dir else {
            return;
        };
        let path = dir.join(cache_file_name(ark));
        let result = std::fs::create_dir_all(dir).and_then(|_| std::fs::write(&path, body));
        match result {
            Ok(()) => debug!("Saved manifest to {:?}", path),
            Err(e) => warn!("Could not save manifest to {:?}: {}", path, e),
        }
    }
}

impl CanvasShapeProvider for OnlineShapes {
    fn shapes(&self, ark: &str) -> Result<CanvasShapes> {
        let url = manifest_url(&self.base, ark);
        let failure = |reason: String| PipelineError::FetchFailure {
            url: url.clone(),
            reason,
        };

        info!("Fetching canvas shapes from {}", url);
        let rt = Runtime::new().map_err(|e| failure(e.to_string()))?;
        let body = rt.block_on(self.fetch_async(&url)).map_err(failure)?;

        let shapes = CanvasShapes::from_manifest(&body)
            .map_err(|e| failure(format!("invalid manifest: {}", e)))?;
        self.save(ark, &body);

        if shapes.is_empty() {
            warn!("Manifest of {} lists no canvas", ark);
        }
        info!("{} canvases for {}", shapes.len(), ark);
        Ok(shapes)
    }
}

/// Reads manifests saved by [`OnlineShapes`]
pub struct CachedShapes {
    dir: PathBuf,
}

impl CachedShapes {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, ark: &str) -> PathBuf {
        self.dir.join(cache_file_name(ark))
    }
}

impl CanvasShapeProvider for CachedShapes {
    fn shapes(&self, ark: &str) -> Result<CanvasShapes> {
        let path = self.path_for(ark);
        let failure = |reason: String| PipelineError::FetchFailure {
            url: path.display().to_string(),
            reason,
        };

        let body = std::fs::read_to_string(&path).map_err(|e| failure(e.to_string()))?;
        let shapes = CanvasShapes::from_manifest(&body)
            .map_err(|e| failure(format!("invalid manifest: {}", e)))?;
        debug!("{} cached canvases for {}", shapes.len(), ark);
        Ok(shapes)
    }
}

/// In-memory tables, keyed by ark
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct StaticShapes {
    tables: HashMap<String, CanvasShapes>,
}

#[cfg(test)]
impl StaticShapes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, ark: impl Into<String>, shapes: CanvasShapes) -> Self {
        self.tables.insert(ark.into(), shapes);
        self
    }
}

#[cfg(test)]
impl CanvasShapeProvider for StaticShapes {
    fn shapes(&self, ark: &str) -> Result<CanvasShapes> {
        self.tables
            .get(ark)
            .cloned()
            .ok_or_else(|| PipelineError::FetchFailure {
                url: ark.to_string(),
                reason: "no static table".to_string(),
            })
    }
}

/// Provider selected by the configuration
pub fn provider_from_config(
    config: &ProviderConfig,
    default_cache: impl FnOnce() -> Option<PathBuf>,
) -> Box<dyn CanvasShapeProvider> {
    match config.source {
        ShapeSource::Online => Box::new(OnlineShapes::new(config)),
        ShapeSource::Cached => {
            let dir = config
                .cache_dir
                .clone()
                .or_else(default_cache)
                .unwrap_or_else(|| Path::new(".").to_path_buf());
            Box::new(CachedShapes::new(dir))
        }
    }
}
