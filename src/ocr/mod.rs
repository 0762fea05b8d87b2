//! OCR page documents
//!
//! One JSON array of entries per directory page, named `<view>.json`.
//! Typed entries for the annotator, raw values for the box rewrite so that
//! fields the pipeline does not interpret are carried through untouched.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{PipelineError, Result};
use crate::geometry::{BBox, TextLine};

/// Entry identifier, numeric or textual depending on the OCR export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryId {
    Number(i64),
    Text(String),
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryId::Number(n) => write!(f, "{}", n),
            EntryId::Text(s) => f.write_str(s),
        }
    }
}

/// Kind of OCR unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntryKind {
    Page,
    Entry,
    Line,
    Other(String),
}

impl From<String> for EntryKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "PAGE" => EntryKind::Page,
            "ENTRY" => EntryKind::Entry,
            "LINE" => EntryKind::Line,
            _ => EntryKind::Other(value),
        }
    }
}

impl From<EntryKind> for String {
    fn from(value: EntryKind) -> Self {
        match value {
            EntryKind::Page => "PAGE".to_string(),
            EntryKind::Entry => "ENTRY".to_string(),
            EntryKind::Line => "LINE".to_string(),
            EntryKind::Other(s) => s,
        }
    }
}

impl EntryKind {
    pub fn as_str(&self) -> &str {
        match self {
            EntryKind::Page => "PAGE",
            EntryKind::Entry => "ENTRY",
            EntryKind::Line => "LINE",
            EntryKind::Other(s) => s,
        }
    }
}

/// Named entity attached to an entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub label: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<serde_json::Value>,
}

/// One OCR unit of a page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrEntry {
    pub id: EntryId,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(rename = "box", default, deserialize_with = "bbox_or_none")]
    pub bbox: Option<BBox>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_ocr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ner_xml: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub children: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub ents: Vec<Entity>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl OcrEntry {
    /// Text displayed in annotations: the raw OCR text when present
    pub fn display_text(&self) -> &str {
        match self.text_ocr.as_deref() {
            Some(t) if !t.is_empty() => t,
            _ => &self.text,
        }
    }
}

impl TextLine for OcrEntry {
    fn line_text(&self) -> &str {
        &self.text
    }

    fn line_box(&self) -> Option<BBox> {
        self.bbox
    }
}

/// Child references look like `<parent>-<id>`; only the last segment names the entry
pub fn child_suffix(reference: &str) -> &str {
    reference.rsplit('-').next().unwrap_or(reference)
}

/// Resolve an entry's child references against the page, dropping unknown ids
pub fn resolve_children<'a>(entry: &OcrEntry, page: &'a [OcrEntry]) -> Vec<&'a OcrEntry> {
    entry
        .children
        .iter()
        .filter_map(|reference| {
            let suffix = child_suffix(reference);
            page.iter().find(|candidate| candidate.id.to_string() == suffix)
        })
        .collect()
}

/// A page file of a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFile {
    /// PDF view number taken from the file stem
    pub view: u32,
    pub path: PathBuf,
}

impl PageFile {
    /// Name the page was listed under, zero padding included
    pub fn file_name(&self) -> &OsStr {
        self.path.file_name().unwrap_or_default()
    }
}

/// List the `<view>.json` files of a directory in ascending view order
pub fn list_pages(dir: &Path) -> Result<Vec<PageFile>> {
    let read_dir = std::fs::read_dir(dir).map_err(|e| PipelineError::io(dir, e))?;

    let mut pages = Vec::new();
    for item in read_dir {
        let item = item.map_err(|e| PipelineError::io(dir, e))?;
        let path = item.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match parse_view(&path) {
            Ok(view) => pages.push(PageFile { view, path }),
            Err(e) => warn!("Skipping {}", e),
        }
    }

    pages.sort_by_key(|p| p.view);
    Ok(pages)
}

fn parse_view(path: &Path) -> Result<u32> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| PipelineError::PageName(path.to_path_buf()))
}

/// Read one page document
pub fn load_page(path: &Path) -> Result<Vec<OcrEntry>> {
    let content = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
    serde_json::from_str(&content).map_err(|e| PipelineError::json(path, e))
}

/// Read one page document as raw JSON values
pub fn load_page_values(path: &Path) -> Result<Vec<Value>> {
    let content = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
    serde_json::from_str(&content).map_err(|e| PipelineError::json(path, e))
}

/// Write one page document
pub fn save_page(entries: &[Value], path: &Path) -> Result<()> {
    let content = serde_json::to_string_pretty(entries).map_err(|e| PipelineError::json(path, e))?;
    std::fs::write(path, content).map_err(|e| PipelineError::io(path, e))
}

/// Replace every well-formed `box` of a page with `map(box)`.
///
/// Only an array of exactly four numbers is rewritten. Anything else,
/// including the rest of the entry, is left as read. Returns the number of
/// boxes rewritten.
pub fn map_boxes(entries: &mut [Value], map: impl Fn(&BBox) -> BBox) -> usize {
    let mut count = 0;
    for entry in entries.iter_mut() {
        let Some(slot) = entry.get_mut("box") else {
            continue;
        };
        if let Some(bbox) = well_formed_box(slot) {
            let out = map(&bbox);
            *slot = serde_json::json!([out.x, out.y, out.w, out.h]);
            count += 1;
        }
    }
    count
}

fn well_formed_box(value: &Value) -> Option<BBox> {
    match value.as_array()?.as_slice() {
        [x, y, w, h] => Some(BBox::new(x.as_f64()?, y.as_f64()?, w.as_f64()?, h.as_f64()?)),
        _ => None,
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn bbox_or_none<'de, D>(deserializer: D) -> std::result::Result<Option<BBox>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<f64>>::deserialize(deserializer)?;
    Ok(raw.and_then(|v| match v.as_slice() {
        [x, y, w, h] => Some(BBox::new(*x, *y, *w, *h)),
        _ => None,
    }))
}
