//! Batch processing
//!
//! A TOML catalog lists the directories of the corpus. The batch loop
//! transforms and annotates each selected directory, skipping work whose
//! output already exists, and never stops on a single directory's failure.

pub mod collection;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use crate::annotate::{AnnotateJob, DirectoryAnnotator};
use crate::canvas::CanvasShapeProvider;
use crate::config::AppConfig;
use crate::error::ErrorScope;
use crate::transform::{DirectoryTransformer, TransformJob};

/// Input and output locations, relative to the catalog file
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogPaths {
    /// Raw OCR pages, one sub-directory per code
    pub annotations_dir: PathBuf,
    /// Source PDFs, `<code>.pdf`
    pub pdf_dir: PathBuf,
    /// Cached transform manifests, one sub-directory per code
    pub manifest_in_dir: PathBuf,
    /// Transform manifests written by this run
    pub manifest_out_dir: PathBuf,
    /// Transformed pages, `<code>_annotations`
    pub transform_dir: PathBuf,
    /// Root of the published `iiif/`, `txt/` and `iiif_collection/` trees
    pub output_root: PathBuf,
}

impl Default for CatalogPaths {
    fn default() -> Self {
        Self {
            annotations_dir: PathBuf::from("annotations"),
            pdf_dir: PathBuf::from("pdf"),
            manifest_in_dir: PathBuf::from("manifest"),
            manifest_out_dir: PathBuf::from("transform-manifest"),
            transform_dir: PathBuf::from("transform"),
            output_root: PathBuf::from("."),
        }
    }
}

impl CatalogPaths {
    fn resolve_against(&mut self, root: &Path) {
        for path in [
            &mut self.annotations_dir,
            &mut self.pdf_dir,
            &mut self.manifest_in_dir,
            &mut self.manifest_out_dir,
            &mut self.transform_dir,
            &mut self.output_root,
        ] {
            if path.is_relative() {
                *path = root.join(&*path);
            }
        }
    }
}

/// One catalog row
#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryRow {
    /// File code, names the input directory and the PDF
    pub code: String,
    #[serde(default)]
    pub work: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub year: Option<String>,
    /// Online record of the scan, contains the ark
    pub url: String,
    /// Image server view minus PDF view
    #[serde(default)]
    pub diff: i64,
    /// First PDF page of the address list, used for thumbnails
    #[serde(default = "default_start_page")]
    pub start_page: i64,
    #[serde(default)]
    pub collection: String,
    #[serde(default)]
    pub series: String,
    #[serde(default = "default_selected")]
    pub selected: bool,
}

fn default_start_page() -> i64 {
    1
}

fn default_selected() -> bool {
    true
}

impl DirectoryRow {
    /// Ark found in the row's URL, from the first `ark` onwards
    pub fn ark(&self) -> Option<&str> {
        self.url.find("ark").map(|idx| &self.url[idx..])
    }

    /// Image server view of the first listed page
    pub fn start_view(&self) -> i64 {
        self.start_page + self.diff
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
    }
    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
    }))
}

fn default_title() -> String {
    "SoDUCo Directory Collection".to_string()
}

/// Corpus catalog
#[derive(Debug, Clone, Deserialize)]
pub struct Catalog {
    /// Label of the root collection
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default)]
    pub paths: CatalogPaths,
    #[serde(default, rename = "directory")]
    pub directories: Vec<DirectoryRow>,
}

impl Catalog {
    /// Read a catalog; relative paths are taken from the catalog's folder
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog {}", path.display()))?;
        let mut catalog: Catalog = toml::from_str(&content)
            .with_context(|| format!("Invalid catalog {}", path.display()))?;

        let root = path.parent().unwrap_or_else(|| Path::new("."));
        catalog.paths.resolve_against(root);
        Ok(catalog)
    }

    /// Selected rows, first row of each code only
    pub fn selected(&self) -> Vec<&DirectoryRow> {
        let mut seen = HashSet::new();
        self.directories
            .iter()
            .filter(|row| row.selected)
            .filter(|row| seen.insert(row.code.as_str()))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOptions {
    /// Stop after the coordinate transform
    pub only_transform: bool,
    /// Rebuild annotations even when already published
    pub force: bool,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub transformed: usize,
    pub annotated: usize,
    pub ignored: usize,
    pub failed: usize,
}

/// Runs the whole catalog against one shape provider
pub struct BatchRunner<'a> {
    config: &'a AppConfig,
    provider: &'a dyn CanvasShapeProvider,
}

impl<'a> BatchRunner<'a> {
    pub fn new(config: &'a AppConfig, provider: &'a dyn CanvasShapeProvider) -> Self {
        Self { config, provider }
    }

    pub fn run(&self, catalog: &Catalog, options: BatchOptions) -> BatchSummary {
        let mut summary = BatchSummary::default();

        for row in catalog.selected() {
            let Some(ark) = row.ark() else {
                debug!("Ignoring {}: no ark in {}", row.code, row.url);
                summary.ignored += 1;
                continue;
            };
            info!(
                "{} / {} ({}) = {}",
                row.code,
                row.work.as_deref().unwrap_or("-"),
                row.year.as_deref().unwrap_or("-"),
                ark
            );
            self.run_row(&catalog.paths, row, ark, options, &mut summary);
        }

        info!(
            "All done: {} transformed, {} annotated, {} ignored, {} failed",
            summary.transformed, summary.annotated, summary.ignored, summary.failed
        );
        summary
    }

    fn run_row(
        &self,
        paths: &CatalogPaths,
        row: &DirectoryRow,
        ark: &str,
        options: BatchOptions,
        summary: &mut BatchSummary,
    ) {
        let input_dir = paths.annotations_dir.join(&row.code);
        if !input_dir.exists() {
            debug!("Ignoring {}: no path {:?}", row.code, input_dir);
            summary.ignored += 1;
            return;
        }

        let pdf = paths.pdf_dir.join(format!("{}.pdf", row.code));
        let manifest_in = paths.manifest_in_dir.join(&row.code);
        if !manifest_in.is_dir() && !pdf.is_file() {
            debug!("Ignoring {}: no file {:?} and no path {:?}", row.code, pdf, manifest_in);
            summary.ignored += 1;
            return;
        }

        let transformed = paths.transform_dir.join(format!("{}_annotations", row.code));
        if !transformed.exists() {
            let job = TransformJob {
                ark: ark.to_string(),
                input_dir,
                pdf: pdf.is_file().then_some(pdf),
                diff: row.diff,
                output_dir: transformed.clone(),
                manifest_in: Some(manifest_in),
                manifest_out: Some(paths.manifest_out_dir.join(&row.code)),
            };
            let transformer = DirectoryTransformer::new(
                &self.config.transform,
                &self.config.provider.base,
                self.provider,
            );
            match transformer.run(&job) {
                Ok(_) => summary.transformed += 1,
                Err(e) => {
                    if e.scope() == ErrorScope::Directory {
                        error!("Directory {} with {} not processed: {}", row.code, ark, e);
                    } else {
                        error!("Transform of {} failed: {}", row.code, e);
                    }
                    summary.failed += 1;
                    return;
                }
            }
        } else {
            debug!("Ignoring transformation for {}: already in {:?}", row.code, transformed);
            let published = paths.output_root.join("iiif").join(ark);
            if published.exists() && !options.force {
                debug!("Ignoring annotations for {}: already in {:?}", row.code, published);
                return;
            }
        }

        if options.only_transform {
            return;
        }

        let job = AnnotateJob {
            name: row.code.clone(),
            ark: ark.to_string(),
            input_dir: transformed,
            diff: row.diff,
            output_root: paths.output_root.clone(),
        };
        match DirectoryAnnotator::new(self.config, self.provider).run(&job) {
            Ok(_) => summary.annotated += 1,
            Err(e) => {
                error!("Directory {} with {} not annotated: {}", row.code, ark, e);
                summary.failed += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{canvas_id, CanvasShape, CanvasShapes, StaticShapes};
    use crate::transform::TransformManifest;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    const BASE: &str = "https://gallica.bnf.fr";
    const ARK: &str = "ark:/12148/bpt6k6314697s";

    const CATALOG: &str = r#"
        title = "Annuaires"

        [paths]
        annotations_dir = "ents"
        transform_dir = "/data/transform"

        [[directory]]
        code = "Bottin1_1820"
        work = "Almanach du commerce"
        year = 1820
        url = "https://gallica.bnf.fr/ark:/12148/bpt6k6314697s"
        diff = 2
        start_page = 10
        collection = "Bottin"
        series = "Almanach"

        [[directory]]
        code = "Bottin1_1820"
        url = "https://gallica.bnf.fr/ark:/12148/duplicate"

        [[directory]]
        code = "Didot_1850"
        year = "1850-1851"
        url = "https://example.org/no-identifier"
        selected = false
    "#;

    #[test]
    fn test_load_catalog() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", CATALOG).unwrap();
        let catalog = Catalog::load(file.path()).unwrap();
        let root = file.path().parent().unwrap();

        assert_eq!(catalog.title, "Annuaires");
        assert_eq!(catalog.paths.annotations_dir, root.join("ents"));
        assert_eq!(catalog.paths.transform_dir, PathBuf::from("/data/transform"));
        assert_eq!(catalog.paths.pdf_dir, root.join("pdf"));
        assert_eq!(catalog.directories.len(), 3);
        assert_eq!(catalog.directories[0].year.as_deref(), Some("1820"));
        assert_eq!(catalog.directories[2].year.as_deref(), Some("1850-1851"));
    }

    #[test]
    fn test_selected_rows_first_per_code() {
        let catalog: Catalog = toml::from_str(CATALOG).unwrap();
        let rows = catalog.selected();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ark(), Some(ARK));
        assert_eq!(rows[0].start_view(), 12);
    }

    #[test]
    fn test_ark_from_url() {
        let catalog: Catalog = toml::from_str(CATALOG).unwrap();
        assert_eq!(catalog.directories[2].ark(), None);
    }

    fn corpus(root: &Path) -> Catalog {
        let ents = root.join("annotations/Bottin1_1820");
        std::fs::create_dir_all(&ents).unwrap();
        let page = serde_json::json!([
            {"id": 1, "type": "ENTRY", "box": [10, 10, 100, 20], "text": "Dupont, boulanger",
             "children": ["1-2"], "ents": [{"label": "PER", "text": "Dupont"}]},
            {"id": 2, "type": "LINE", "box": [10, 10, 100, 20], "text": "Dupont, boulanger"}
        ]);
        std::fs::write(ents.join("1.json"), page.to_string()).unwrap();

        let cache = root.join("manifest/Bottin1_1820");
        std::fs::create_dir_all(&cache).unwrap();
        TransformManifest { angle: 90.0, ratio: 1.0 }
            .save(&crate::transform::manifest::input_path(&cache, 1))
            .unwrap();

        let mut catalog: Catalog = toml::from_str(CATALOG).unwrap();
        catalog.paths = CatalogPaths::default();
        catalog.paths.resolve_against(root);
        catalog
    }

    fn provider() -> StaticShapes {
        let mut table = CanvasShapes::default();
        table.insert(canvas_id(BASE, ARK, 3), CanvasShape { height: 3000, width: 2048 });
        StaticShapes::new().with_table(ARK, table)
    }

    #[test]
    fn test_batch_transforms_then_annotates() {
        let dir = TempDir::new().unwrap();
        let catalog = corpus(dir.path());
        let config = AppConfig::default();
        let provider = provider();

        let summary = BatchRunner::new(&config, &provider).run(&catalog, BatchOptions::default());
        assert_eq!(summary.transformed, 1);
        assert_eq!(summary.annotated, 1);
        assert_eq!(summary.failed, 0);

        assert!(dir.path().join("transform/Bottin1_1820_annotations/1.json").exists());
        assert!(dir.path().join("transform-manifest/Bottin1_1820/1.json").exists());
        let published = dir.path().join("iiif").join(ARK);
        assert!(published.join("p3.json").exists());
        assert!(published.join("manifest.json").exists());

        // second run finds both outputs in place
        let again = BatchRunner::new(&config, &provider).run(&catalog, BatchOptions::default());
        assert_eq!(again, BatchSummary::default());

        let forced = BatchRunner::new(&config, &provider).run(
            &catalog,
            BatchOptions {
                force: true,
                ..BatchOptions::default()
            },
        );
        assert_eq!(forced.transformed, 0);
        assert_eq!(forced.annotated, 1);
    }

    #[test]
    fn test_only_transform() {
        let dir = TempDir::new().unwrap();
        let catalog = corpus(dir.path());
        let config = AppConfig::default();

        let summary = BatchRunner::new(&config, &provider()).run(
            &catalog,
            BatchOptions {
                only_transform: true,
                force: false,
            },
        );
        assert_eq!(summary.transformed, 1);
        assert_eq!(summary.annotated, 0);
        assert!(!dir.path().join("iiif").exists());
    }

    #[test]
    fn test_fetch_failure_counts_and_continues() {
        let dir = TempDir::new().unwrap();
        let catalog = corpus(dir.path());
        let config = AppConfig::default();

        let summary = BatchRunner::new(&config, &StaticShapes::new()).run(&catalog, BatchOptions::default());
        assert_eq!(summary.failed, 1);
        assert!(!dir.path().join("transform/Bottin1_1820_annotations").exists());
    }

    #[test]
    fn test_unknown_canvas_fails_the_directory() {
        let dir = TempDir::new().unwrap();
        let catalog = corpus(dir.path());
        let config = AppConfig::default();
        // the table knows f4 only, page 1 maps to f3
        let mut table = CanvasShapes::default();
        table.insert(canvas_id(BASE, ARK, 4), CanvasShape { height: 3000, width: 2048 });
        let provider = StaticShapes::new().with_table(ARK, table);

        let summary = BatchRunner::new(&config, &provider).run(&catalog, BatchOptions::default());
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.annotated, 0);
        assert!(!dir.path().join("transform/Bottin1_1820_annotations").exists());
        assert!(!dir.path().join("iiif").join(ARK).exists());
    }

    #[test]
    fn test_missing_inputs_are_ignored() {
        let dir = TempDir::new().unwrap();
        let mut catalog: Catalog = toml::from_str(CATALOG).unwrap();
        catalog.paths.resolve_against(dir.path());
        let config = AppConfig::default();

        let summary = BatchRunner::new(&config, &provider()).run(&catalog, BatchOptions::default());
        assert_eq!(summary.ignored, 1);
        assert_eq!(summary.transformed, 0);
    }
}
