//! Coordinate Transformer
//!
//! Maps every OCR box of a directory from the normalised PDF raster space
//! into the image server's canvas space: uniform scaling by
//! `canvas_width / normalized_width` followed by the skew shear of
//! [`crate::geometry::transform_box`].

pub mod manifest;

use crossbeam_channel::unbounded;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::f64::consts::FRAC_PI_2;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::canvas::{canvas_id, CanvasShape, CanvasShapeProvider};
use crate::config::TransformSettings;
use crate::error::{PipelineError, Result};
use crate::geometry::transform_box;
use crate::ocr::{self, PageFile};
use crate::vision::{self, SourcePdf};

pub use manifest::TransformManifest;

/// One directory to transform
#[derive(Debug, Clone)]
pub struct TransformJob {
    pub ark: String,
    /// OCR pages, `<view>.json`
    pub input_dir: PathBuf,
    /// Source PDF, used when no input manifest directory exists
    pub pdf: Option<PathBuf>,
    /// Image server view minus PDF view
    pub diff: i64,
    pub output_dir: PathBuf,
    /// Cached `<view>-manifest.json` files
    pub manifest_in: Option<PathBuf>,
    /// Where `<view>.json` manifests are written
    pub manifest_out: Option<PathBuf>,
}

/// Pages written and pages skipped with the reason
#[derive(Debug, Default)]
pub struct TransformReport {
    pub written: Vec<u32>,
    pub skipped: Vec<(u32, PipelineError)>,
}

/// Where a page's angle comes from
enum AngleSource {
    Cache(PathBuf),
    Pdf(PathBuf),
    Upright,
}

/// Transforms directories against one canvas shape provider
pub struct DirectoryTransformer<'a> {
    settings: &'a TransformSettings,
    base: &'a str,
    provider: &'a dyn CanvasShapeProvider,
}

/// A page and the canvas it is projected onto
struct PageWork<'a> {
    page: &'a PageFile,
    canvas: CanvasShape,
}

/// Read-only state shared by every page of a run
struct PageContext<'a> {
    job: &'a TransformJob,
    angles: AngleSource,
    /// Pages whose manifest has already been written
    cached: Mutex<HashSet<u32>>,
}

impl<'a> DirectoryTransformer<'a> {
    pub fn new(
        settings: &'a TransformSettings,
        base: &'a str,
        provider: &'a dyn CanvasShapeProvider,
    ) -> Self {
        Self {
            settings,
            base: base.trim_end_matches('/'),
            provider,
        }
    }

    /// Transform every page of the job's input directory
    ///
    /// The shape table is fetched and every page's canvas resolved before
    /// anything else. A fetch failure or a canvas missing from the table
    /// returns early and writes nothing. Page failures are logged and
    /// reported, the other pages still go through.
    pub fn run(&self, job: &TransformJob) -> Result<TransformReport> {
        let shapes = self.provider.shapes(&job.ark)?;
        let pages = ocr::list_pages(&job.input_dir)?;

        let mut work = Vec::with_capacity(pages.len());
        for page in &pages {
            let id = canvas_id(self.base, &job.ark, page.view as i64 + job.diff);
            match shapes.lookup(&id) {
                Ok(canvas) => work.push(PageWork { page, canvas }),
                Err(e) => {
                    error!("{} view {}: {}, nothing written", job.ark, page.view, e);
                    return Err(e);
                }
            }
        }

        let angles = match (&job.manifest_in, &job.pdf) {
            (Some(dir), _) if dir.is_dir() => AngleSource::Cache(dir.clone()),
            (_, Some(pdf)) => AngleSource::Pdf(pdf.clone()),
            _ => AngleSource::Upright,
        };
        let ctx = PageContext {
            job,
            angles,
            cached: Mutex::new(HashSet::new()),
        };
        // each worker opens its own document, this one only serves the sequential loop
        let pdf = ctx.open_pdf()?;

        create_dir(&job.output_dir)?;
        if let Some(dir) = &job.manifest_out {
            create_dir(dir)?;
        }

        info!(
            "Transforming {} pages of {} into {:?}",
            work.len(),
            job.ark,
            job.output_dir
        );

        let outcomes = if self.settings.workers > 1 {
            drop(pdf);
            self.run_pool(&ctx, &work)
        } else {
            work.iter()
                .map(|item| (item.page.view, self.transform_page(&ctx, pdf.as_ref(), item)))
                .collect()
        };

        let mut report = TransformReport::default();
        for (view, outcome) in outcomes {
            match outcome {
                Ok(()) => report.written.push(view),
                Err(e) => {
                    error!("{} view {} not transformed: {}", job.ark, view, e);
                    report.skipped.push((view, e));
                }
            }
        }
        report.written.sort_unstable();
        report.skipped.sort_by_key(|(view, _)| *view);

        info!(
            "{}: {} pages transformed, {} skipped",
            job.ark,
            report.written.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    fn run_pool(&self, ctx: &PageContext<'_>, work: &[PageWork<'_>]) -> Vec<(u32, Result<()>)> {
        let (tx, rx) = unbounded::<&PageWork<'_>>();
        for (queued, item) in work.iter().enumerate() {
            if tx.send(item).is_err() {
                warn!("Work queue closed, {} views not queued", work.len() - queued);
                break;
            }
        }
        drop(tx);

        let results = Mutex::new(Vec::with_capacity(work.len()));
        std::thread::scope(|scope| {
            for _ in 0..self.settings.workers {
                let rx = rx.clone();
                let results = &results;
                scope.spawn(move || {
                    let pdf = ctx.open_pdf();
                    while let Ok(item) = rx.recv() {
                        let view = item.page.view;
                        let outcome = match &pdf {
                            Ok(pdf) => self.transform_page(ctx, pdf.as_ref(), item),
                            Err(e) => Err(PipelineError::DocumentRead {
                                view,
                                reason: e.to_string(),
                            }),
                        };
                        results.lock().push((view, outcome));
                    }
                });
            }
        });
        results.into_inner()
    }

    fn page_angle(&self, ctx: &PageContext<'_>, pdf: Option<&SourcePdf>, view: u32) -> Result<f64> {
        match (&ctx.angles, pdf) {
            (AngleSource::Cache(dir), _) => {
                let cached = TransformManifest::load(&manifest::input_path(dir, view))?;
                Ok(cached.angle_radians())
            }
            (AngleSource::Pdf(_), Some(pdf)) => {
                let page = vision::estimate_pdf_page(pdf, view, self.settings)?;
                debug!(
                    "View {}: raster {}x{}, {} segments",
                    view, page.width, page.height, page.estimate.segments
                );
                Ok(page.estimate.angle)
            }
            _ => Ok(FRAC_PI_2),
        }
    }

    fn transform_page(
        &self,
        ctx: &PageContext<'_>,
        pdf: Option<&SourcePdf>,
        item: &PageWork<'_>,
    ) -> Result<()> {
        let page = item.page;
        let view = page.view;
        let angle = self.page_angle(ctx, pdf, view)?;
        let ratio = item.canvas.width as f64 / self.settings.normalized_width;

        let mut entries = ocr::load_page_values(&page.path)?;
        let boxes = ocr::map_boxes(&mut entries, |bbox| transform_box(bbox, ratio, angle));
        ocr::save_page(&entries, &ctx.job.output_dir.join(page.file_name()))?;

        // cached only once the page itself is written, at most once per page
        if let Some(dir) = &ctx.job.manifest_out {
            if ctx.cached.lock().insert(view) {
                TransformManifest::from_radians(angle, ratio)
                    .save(&manifest::output_path(dir, view))?;
            }
        }

        debug!(
            "View {}: {} boxes, angle {:.3}°, ratio {:.4}",
            view,
            boxes,
            angle.to_degrees(),
            ratio
        );
        Ok(())
    }
}

impl PageContext<'_> {
    fn open_pdf(&self) -> Result<Option<SourcePdf>> {
        match &self.angles {
            AngleSource::Pdf(path) => SourcePdf::open(path).map(Some),
            _ => Ok(None),
        }
    }
}

fn create_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| PipelineError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{CanvasShapes, StaticShapes};
    use crate::geometry::BBox;
    use crate::vision::pdf::fixtures::write_pdf;
    use serde_json::Value;
    use tempfile::TempDir;

    const BASE: &str = "https://gallica.bnf.fr";
    const ARK: &str = "ark:/12148/bpt6k1234";

    fn page_json(box_x: f64) -> String {
        serde_json::json!([
            {"id": 1, "type": "ENTRY", "box": [box_x, 100.0, 200.0, 50.0], "text": "Dupont", "children": []},
            {"id": 2, "type": "LINE", "box": null, "text": ""}
        ])
        .to_string()
    }

    fn provider(views: &[i64], width: u32) -> StaticShapes {
        let mut table = CanvasShapes::default();
        for view in views {
            table.insert(canvas_id(BASE, ARK, *view), CanvasShape { height: 6000, width });
        }
        StaticShapes::new().with_table(ARK, table)
    }

    fn job(root: &Path, manifest_in: Option<PathBuf>) -> TransformJob {
        TransformJob {
            ark: ARK.to_string(),
            input_dir: root.join("in"),
            pdf: None,
            diff: 2,
            output_dir: root.join("out"),
            manifest_in,
            manifest_out: Some(root.join("manifests")),
        }
    }

    fn write_inputs(root: &Path, views: &[u32]) {
        std::fs::create_dir_all(root.join("in")).unwrap();
        for view in views {
            std::fs::write(root.join("in").join(format!("{}.json", view)), page_json(10.0)).unwrap();
        }
    }

    #[test]
    fn test_upright_scaling() {
        let dir = TempDir::new().unwrap();
        write_inputs(dir.path(), &[1]);
        // view 1 + diff 2 -> canvas f3, twice the normalised width
        let shapes = provider(&[3], 4096);
        let settings = TransformSettings::default();

        let report = DirectoryTransformer::new(&settings, BASE, &shapes)
            .run(&job(dir.path(), None))
            .unwrap();
        assert_eq!(report.written, vec![1]);

        let entries = ocr::load_page(&dir.path().join("out/1.json")).unwrap();
        let bbox = entries[0].bbox.unwrap();
        assert!((bbox.x - 20.0).abs() < 1e-9);
        assert!((bbox.y - 200.0).abs() < 1e-9);
        assert!((bbox.w - 400.0).abs() < 1e-9);
        assert!((bbox.h - 100.0).abs() < 1e-9);
        assert!(entries[1].bbox.is_none());

        let cached = TransformManifest::load(&dir.path().join("manifests/1.json")).unwrap();
        assert!((cached.angle - 90.0).abs() < 1e-9);
        assert!((cached.ratio - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_cached_angle_is_used() {
        let dir = TempDir::new().unwrap();
        write_inputs(dir.path(), &[1]);
        let cache = dir.path().join("cache");
        std::fs::create_dir_all(&cache).unwrap();
        // the cached ratio is ignored, only the angle is reused
        TransformManifest { angle: 60.0, ratio: 9.0 }
            .save(&manifest::input_path(&cache, 1))
            .unwrap();

        let shapes = provider(&[3], 2048);
        let settings = TransformSettings::default();
        DirectoryTransformer::new(&settings, BASE, &shapes)
            .run(&job(dir.path(), Some(cache)))
            .unwrap();

        let entries = ocr::load_page(&dir.path().join("out/1.json")).unwrap();
        let expected = transform_box(&BBox::new(10.0, 100.0, 200.0, 50.0), 1.0, 60f64.to_radians());
        let bbox = entries[0].bbox.unwrap();
        assert!((bbox.x - expected.x).abs() < 1e-9);
        assert!((bbox.w - expected.w).abs() < 1e-9);

        let written = TransformManifest::load(&dir.path().join("manifests/1.json")).unwrap();
        assert!((written.ratio - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_fetch_failure_writes_nothing() {
        let dir = TempDir::new().unwrap();
        write_inputs(dir.path(), &[1, 2]);
        let settings = TransformSettings::default();
        let shapes = StaticShapes::new();

        let err = DirectoryTransformer::new(&settings, BASE, &shapes)
            .run(&job(dir.path(), None))
            .unwrap_err();
        assert!(matches!(err, PipelineError::FetchFailure { .. }));
        assert!(!dir.path().join("out").exists());
        assert!(!dir.path().join("manifests").exists());
    }

    #[test]
    fn test_missing_canvas_aborts_directory() {
        let dir = TempDir::new().unwrap();
        write_inputs(dir.path(), &[1, 2]);
        // only view 2 (canvas f4) is known
        let shapes = provider(&[4], 2048);
        let settings = TransformSettings::default();

        let err = DirectoryTransformer::new(&settings, BASE, &shapes)
            .run(&job(dir.path(), None))
            .unwrap_err();
        assert!(
            matches!(&err, PipelineError::CanvasMissing { canvas_id } if canvas_id.ends_with("/canvas/f3")),
            "{}",
            err
        );
        assert_eq!(err.scope(), crate::error::ErrorScope::Directory);
        assert!(!dir.path().join("out").exists());
        assert!(!dir.path().join("manifests").exists());
    }

    #[test]
    fn test_trailing_slash_base_resolves_canvases() {
        let dir = TempDir::new().unwrap();
        write_inputs(dir.path(), &[1]);
        let shapes = provider(&[3], 2048);
        let settings = TransformSettings::default();
        let base = format!("{}/", BASE);

        let report = DirectoryTransformer::new(&settings, &base, &shapes)
            .run(&job(dir.path(), None))
            .unwrap();
        assert_eq!(report.written, vec![1]);
    }

    #[test]
    fn test_pdf_angles_and_page_failures() {
        let dir = TempDir::new().unwrap();
        write_inputs(dir.path(), &[1, 2, 3]);
        // uniform raster: no segment, upright page
        let pdf = write_pdf(dir.path(), vec![200; 32 * 32], 32, 32);
        let shapes = provider(&[3, 4, 5], 2048);
        let settings = TransformSettings::default();
        let mut job = job(dir.path(), None);
        job.pdf = Some(pdf);

        let report = DirectoryTransformer::new(&settings, BASE, &shapes)
            .run(&job)
            .unwrap();
        assert_eq!(report.written, vec![1]);
        assert_eq!(report.skipped.len(), 2);
        assert!(matches!(report.skipped[0], (2, PipelineError::DocumentRead { view: 2, .. })));
        assert!(matches!(
            report.skipped[1],
            (3, PipelineError::InvalidViewIndex { view: 3, pages: 2 })
        ));

        let entries = ocr::load_page(&dir.path().join("out/1.json")).unwrap();
        let bbox = entries[0].bbox.unwrap();
        assert!((bbox.x - 10.0).abs() < 1e-9);
        assert!((bbox.w - 200.0).abs() < 1e-9);
        let cached = TransformManifest::load(&dir.path().join("manifests/1.json")).unwrap();
        assert!((cached.angle - 90.0).abs() < 1e-9);
        for view in [2, 3] {
            assert!(!dir.path().join(format!("out/{}.json", view)).exists());
            assert!(!dir.path().join(format!("manifests/{}.json", view)).exists());
        }
    }

    #[test]
    fn test_only_well_formed_boxes_are_rewritten() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("in")).unwrap();
        let raw = r#"[{"id":1,"type":"LINE","box":[],"text_ocr":null},{"id":2,"type":"LINE","box":[1,2,3],"text":"a"},{"id":3,"type":"LINE","box":[1,2,3,4],"note":{"k":[1]}}]"#;
        std::fs::write(dir.path().join("in/1.json"), raw).unwrap();
        let shapes = provider(&[3], 4096);
        let settings = TransformSettings::default();

        DirectoryTransformer::new(&settings, BASE, &shapes)
            .run(&job(dir.path(), None))
            .unwrap();

        let input: Vec<Value> = serde_json::from_str(raw).unwrap();
        let output = ocr::load_page_values(&dir.path().join("out/1.json")).unwrap();
        assert_eq!(output[..2], input[..2]);
        let rewritten: Vec<f64> = output[2]["box"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_f64().unwrap())
            .collect();
        for (got, want) in rewritten.iter().zip([2.0, 4.0, 6.0, 8.0]) {
            assert!((got - want).abs() < 1e-9, "{:?}", rewritten);
        }
        assert_eq!(output[2]["note"], input[2]["note"]);
        assert!(output[0].get("text").is_none());
        assert!(output[0].get("children").is_none());
    }

    #[test]
    fn test_padded_page_names_are_kept() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("in")).unwrap();
        std::fs::write(dir.path().join("in/0012.json"), page_json(10.0)).unwrap();
        let shapes = provider(&[14], 2048);
        let settings = TransformSettings::default();

        let report = DirectoryTransformer::new(&settings, BASE, &shapes)
            .run(&job(dir.path(), None))
            .unwrap();
        assert_eq!(report.written, vec![12]);
        assert!(dir.path().join("out/0012.json").exists());
        assert!(!dir.path().join("out/12.json").exists());
    }

    #[test]
    fn test_unreadable_page_leaves_no_cache_entry() {
        let dir = TempDir::new().unwrap();
        write_inputs(dir.path(), &[1]);
        std::fs::write(dir.path().join("in/2.json"), "{ not json").unwrap();
        let shapes = provider(&[3, 4], 2048);
        let settings = TransformSettings::default();

        let report = DirectoryTransformer::new(&settings, BASE, &shapes)
            .run(&job(dir.path(), None))
            .unwrap();
        assert_eq!(report.written, vec![1]);
        assert!(matches!(report.skipped[0], (2, PipelineError::Json { .. })));
        assert!(dir.path().join("manifests/1.json").exists());
        assert!(!dir.path().join("manifests/2.json").exists());
    }

    #[test]
    fn test_worker_pool_matches_sequential() {
        let views: Vec<u32> = (1..=12).collect();
        let canvases: Vec<i64> = views.iter().map(|v| *v as i64 + 2).collect();
        let shapes = provider(&canvases, 3072);

        let sequential = TempDir::new().unwrap();
        write_inputs(sequential.path(), &views);
        let settings = TransformSettings::default();
        DirectoryTransformer::new(&settings, BASE, &shapes)
            .run(&job(sequential.path(), None))
            .unwrap();

        let pooled = TempDir::new().unwrap();
        write_inputs(pooled.path(), &views);
        let settings = TransformSettings {
            workers: 4,
            ..TransformSettings::default()
        };
        let report = DirectoryTransformer::new(&settings, BASE, &shapes)
            .run(&job(pooled.path(), None))
            .unwrap();
        assert_eq!(report.written, views);

        for view in &views {
            let name = format!("out/{}.json", view);
            let a = std::fs::read_to_string(sequential.path().join(&name)).unwrap();
            let b = std::fs::read_to_string(pooled.path().join(&name)).unwrap();
            assert_eq!(a, b);
            assert!(pooled.path().join(format!("manifests/{}.json", view)).exists());
        }
    }
}
