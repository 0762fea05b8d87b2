//! Annotation Assembler
//!
//! Turns the transformed OCR pages of a directory into one IIIF annotation
//! page per canvas and a directory manifest. Each ENTRY with named entities
//! becomes a tagging annotation whose SVG target outlines the entry and the
//! part of its lines each entity was read from.

pub mod transcript;

use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use crate::canvas::{canvas_id, CanvasShape, CanvasShapeProvider, CanvasShapes};
use crate::config::{AppConfig, TranscriptMode};
use crate::error::Result;
use crate::geometry::{span_to_box, union_box, SpanMode};
use crate::iiif::{
    self, lang, svg_target, AgentRecord, Annotation, AnnotationPage, Body, Canvas, ExternalItem,
    Manifest, Motivation, Overlay, Service, Target, PRESENTATION_CONTEXT,
};
use crate::ocr::{self, resolve_children, EntryKind, OcrEntry, PageFile};

pub use transcript::TranscriptRow;

/// One directory to annotate
#[derive(Debug, Clone)]
pub struct AnnotateJob {
    /// Directory name, used as manifest label and transcript source
    pub name: String,
    pub ark: String,
    /// Transformed OCR pages, `<view>.json`
    pub input_dir: PathBuf,
    /// Image server view minus PDF view
    pub diff: i64,
    pub output_root: PathBuf,
}

/// Lifecycle of one page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Pending,
    CanvasResolved,
    EntriesProcessed,
    Written,
    /// Terminal, the page produced no output
    Skipped,
}

#[derive(Debug, Clone)]
pub struct PageReport {
    pub view: u32,
    pub ark_view: i64,
    pub state: PageState,
    pub annotations: usize,
    pub rows: usize,
}

#[derive(Debug, Default)]
pub struct AnnotateReport {
    pub pages: Vec<PageReport>,
    pub manifest: PathBuf,
}

impl AnnotateReport {
    pub fn written(&self) -> usize {
        self.pages.iter().filter(|p| p.state == PageState::Written).count()
    }

    pub fn skipped(&self) -> usize {
        self.pages.iter().filter(|p| p.state == PageState::Skipped).count()
    }
}

/// Identifiers of one directory's published documents
struct Urls<'a> {
    prefix: &'a str,
    base: &'a str,
    ark: &'a str,
}

impl Urls<'_> {
    fn manifest(&self) -> String {
        format!("{}/iiif/{}/manifest.json", self.prefix, self.ark)
    }

    fn canvas(&self, ark_view: i64) -> String {
        format!("{}/iiif/{}/p{}", self.base, self.ark, ark_view)
    }

    fn thumbnail(&self, ark_view: i64) -> String {
        format!("{}/{}/f{}.thumbnail", self.base, self.ark, ark_view)
    }

    fn image_service(&self, ark_view: i64) -> String {
        format!("{}/iiif/{}/f{}", self.base, self.ark, ark_view)
    }

    fn annotation_page(&self, ark_view: i64) -> String {
        format!("{}/iiif/{}/p{}.json", self.prefix, self.ark, ark_view)
    }

    fn tag(&self, ark_view: i64, entry: &OcrEntry) -> String {
        format!("{}/iiif/{}/p{}-tag-{}", self.prefix, self.ark, ark_view, entry.id)
    }

    fn transcript(&self, ark_view: i64) -> String {
        format!("{}/txt/{}/p{}.csv", self.prefix, self.ark, ark_view)
    }
}

/// Overlays of one entry: its box, then each located entity.
///
/// Entities are searched in reading order. The cursor only moves forward,
/// so an entity is never looked up on a line above the previous match.
pub fn entry_overlays(entry: &OcrEntry, page: &[OcrEntry], mode: SpanMode) -> Vec<Overlay> {
    let children = resolve_children(entry, page);
    let entry_box = union_box(children.iter().filter_map(|c| c.bbox)).or(entry.bbox);

    let mut overlays = Vec::new();
    if let Some(bbox) = entry_box {
        overlays.push(Overlay::new(bbox, entry.kind.as_str()));
    }

    let mut cursor = 0;
    for ent in &entry.ents {
        match span_to_box(&ent.text, &children[cursor..], mode) {
            Some(found) => {
                overlays.extend(found.boxes.into_iter().map(|b| Overlay::new(b, &ent.label)));
                cursor += found.index;
            }
            None => debug!(
                "Entry {}: {} {:?} not found in its lines",
                entry.id, ent.label, ent.text
            ),
        }
    }
    overlays
}

/// Builds annotation documents for directories
pub struct DirectoryAnnotator<'a> {
    config: &'a AppConfig,
    provider: &'a dyn CanvasShapeProvider,
}

impl<'a> DirectoryAnnotator<'a> {
    pub fn new(config: &'a AppConfig, provider: &'a dyn CanvasShapeProvider) -> Self {
        Self { config, provider }
    }

    /// Annotate every page of the job, then write the manifest.
    ///
    /// A shape fetch failure returns before anything is written. Pages whose
    /// canvas is missing are skipped; their siblings still go through.
    pub fn run(&self, job: &AnnotateJob) -> Result<AnnotateReport> {
        let shapes = self.provider.shapes(&job.ark)?;
        let pages = ocr::list_pages(&job.input_dir)?;
        let urls = Urls {
            prefix: self.config.general.prefix(),
            base: self.config.provider.base.trim_end_matches('/'),
            ark: &job.ark,
        };
        let language = &self.config.general.language;

        info!("Annotating {} pages of {} ({})", pages.len(), job.name, job.ark);

        let mut manifest = Manifest {
            context: PRESENTATION_CONTEXT,
            id: urls.manifest(),
            kind: "Manifest",
            label: lang(language, job.name.clone()),
            behavior: vec!["individuals".to_string()],
            provider: vec![
                AgentRecord::from_agent(&self.config.provider.image_agent),
                AgentRecord::from_agent(&self.config.provider.project_agent),
            ],
            logo: Some(self.config.provider.logo.clone()),
            items: Vec::new(),
        };

        let mut report = AnnotateReport::default();
        for page in &pages {
            let (page_report, canvas) = self.process_page(job, &urls, &shapes, page);
            if let Some(canvas) = canvas {
                manifest.items.push(canvas);
            }
            report.pages.push(page_report);
        }

        report.manifest = self.iiif_dir(job).join("manifest.json");
        iiif::write_document(&report.manifest, &manifest)?;

        info!(
            "{}: {} pages written, {} skipped",
            job.name,
            report.written(),
            report.skipped()
        );
        Ok(report)
    }

    fn iiif_dir(&self, job: &AnnotateJob) -> PathBuf {
        job.output_root.join("iiif").join(&job.ark)
    }

    fn process_page(
        &self,
        job: &AnnotateJob,
        urls: &Urls<'_>,
        shapes: &CanvasShapes,
        page: &PageFile,
    ) -> (PageReport, Option<Canvas>) {
        let ark_view = page.view as i64 + job.diff;
        let mut report = PageReport {
            view: page.view,
            ark_view,
            state: PageState::Pending,
            annotations: 0,
            rows: 0,
        };

        let shape = match shapes.lookup(&canvas_id(urls.base, &job.ark, ark_view)) {
            Ok(shape) => shape,
            Err(e) => {
                error!("{} page {} skipped: {}", job.name, report.view, e);
                report.state = PageState::Skipped;
                return (report, None);
            }
        };
        report.state = PageState::CanvasResolved;

        match self.build_page(job, urls, page, shape, &mut report) {
            Ok(canvas) => {
                report.state = PageState::Written;
                debug!(
                    "View {} -> p{}: {} annotations",
                    report.view, report.ark_view, report.annotations
                );
                (report, Some(canvas))
            }
            Err(e) => {
                error!("{} page {} skipped: {}", job.name, report.view, e);
                report.state = PageState::Skipped;
                (report, None)
            }
        }
    }

    fn build_page(
        &self,
        job: &AnnotateJob,
        urls: &Urls<'_>,
        page: &PageFile,
        shape: CanvasShape,
        report: &mut PageReport,
    ) -> Result<Canvas> {
        let CanvasShape { height, width } = shape;
        let ark_view = report.ark_view;
        let language = &self.config.general.language;
        let canvas_id = urls.canvas(ark_view);
        let entries = ocr::load_page(&page.path)?;

        let mut annotations = Vec::new();
        let mut rows = Vec::new();
        for entry in entries.iter().filter(|e| e.kind == EntryKind::Entry) {
            let text = entry.display_text();
            if entry.ents.is_empty() {
                if !text.is_empty() {
                    rows.push(TranscriptRow::from_text(&job.name, ark_view, text));
                }
                continue;
            }

            let overlays = entry_overlays(entry, &entries, self.config.annotate.span_mode);
            annotations.push(Annotation::new(
                urls.tag(ark_view, entry),
                Motivation::Tagging,
                Body::TextualBody {
                    language: language.clone(),
                    format: "text/plain",
                    value: text.to_string(),
                },
                Target::Region(svg_target(&canvas_id, &overlays)),
            ));
            rows.push(TranscriptRow::from_entities(&job.name, ark_view, &entry.ents));
        }
        report.state = PageState::EntriesProcessed;
        report.annotations = annotations.len();
        report.rows = rows.len();

        let page_path = self.iiif_dir(job).join(format!("p{}.json", ark_view));
        let document = AnnotationPage::document(urls.annotation_page(ark_view), annotations);
        iiif::write_document(&page_path, &document)?;

        let rendering = if rows.is_empty() {
            Vec::new()
        } else {
            self.rendering(job, urls, page.view, ark_view, &rows)?
        };

        Ok(Canvas {
            id: canvas_id.clone(),
            kind: "Canvas",
            label: lang(language, format!("Page {}", ark_view)),
            height,
            width,
            thumbnail: vec![ExternalItem::image(urls.thumbnail(ark_view), "image/jpeg")],
            items: vec![AnnotationPage::embedded(
                format!("{}-page", canvas_id),
                vec![Annotation::new(
                    format!("{}-image", canvas_id),
                    Motivation::Painting,
                    Body::Image {
                        id: format!("{}/full/full/0/default.jpg", urls.image_service(ark_view)),
                        format: "image/jpeg",
                        height,
                        width,
                        service: vec![Service::ImageService1 {
                            id: urls.image_service(ark_view),
                            profile: "level2",
                        }],
                    },
                    Target::Canvas(canvas_id.clone()),
                )],
            )],
            annotations: vec![AnnotationPage::reference(urls.annotation_page(ark_view))],
            rendering,
        })
    }

    fn rendering(
        &self,
        job: &AnnotateJob,
        urls: &Urls<'_>,
        pdf_view: u32,
        ark_view: i64,
        rows: &[TranscriptRow],
    ) -> Result<Vec<ExternalItem>> {
        let label = Some(lang(&self.config.general.language, "Transcript"));
        let id = match self.config.annotate.transcript {
            TranscriptMode::Off => return Ok(Vec::new()),
            TranscriptMode::Csv => {
                let path = transcript_path(&job.output_root, &job.ark, ark_view);
                transcript::write_csv(&path, rows)?;
                urls.transcript(ark_view)
            }
            TranscriptMode::Remote => format!(
                "{}?source=eq.{}&page=eq.{:04}",
                self.config.annotate.export_api, job.name, pdf_view
            ),
        };
        Ok(vec![ExternalItem::text(id, label, "text/csv")])
    }
}

/// `<root>/txt/<ark>/p<ark_view>.csv`
pub fn transcript_path(root: &Path, ark: &str, ark_view: i64) -> PathBuf {
    root.join("txt").join(ark).join(format!("p{}.csv", ark_view))
}
