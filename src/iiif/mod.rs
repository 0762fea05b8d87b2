//! IIIF Presentation 3 records
//!
//! Minimal typed records for the documents the pipeline publishes. Each
//! record serializes straight to its final JSON shape: references carry no
//! `items`, optional members are left out when empty.

pub mod svg;

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::config::Agent;
use crate::error::{PipelineError, Result};

pub use svg::{svg_target, Overlay, SpecificResource};

pub const PRESENTATION_CONTEXT: &str = "http://iiif.io/api/presentation/3/context.json";

/// Language map, `{"fr": ["Page 12"]}`
pub type LangMap = BTreeMap<String, Vec<String>>;

pub fn lang(language: &str, value: impl Into<String>) -> LangMap {
    BTreeMap::from([(language.to_string(), vec![value.into()])])
}

/// Linked external resource: thumbnails, logos, homepages, renderings
#[derive(Debug, Clone, Serialize)]
pub struct ExternalItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<LangMap>,
    pub format: &'static str,
}

impl ExternalItem {
    pub fn image(id: impl Into<String>, format: &'static str) -> Self {
        Self {
            id: id.into(),
            kind: "Image",
            label: None,
            format,
        }
    }

    pub fn text(id: impl Into<String>, label: Option<LangMap>, format: &'static str) -> Self {
        Self {
            id: id.into(),
            kind: "Text",
            label,
            format,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub label: LangMap,
    pub homepage: Vec<ExternalItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub logo: Vec<ExternalItem>,
}

impl AgentRecord {
    pub fn from_agent(agent: &Agent) -> Self {
        Self {
            id: agent.id.clone(),
            kind: "Agent",
            label: lang("en", agent.label.clone()),
            homepage: vec![ExternalItem::text(
                agent.homepage.clone(),
                Some(lang("en", agent.label.clone())),
                "text/html",
            )],
            logo: agent
                .logo
                .iter()
                .map(|logo| ExternalItem::image(logo.clone(), "image/png"))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Service {
    ImageService1 { id: String, profile: &'static str },
}

/// Annotation body
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Body {
    Image {
        id: String,
        format: &'static str,
        height: u32,
        width: u32,
        service: Vec<Service>,
    },
    TextualBody {
        language: String,
        format: &'static str,
        value: String,
    },
}

/// Annotation target: a whole canvas or a region of it
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Target {
    Canvas(String),
    Region(SpecificResource),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Motivation {
    Painting,
    Tagging,
}

#[derive(Debug, Clone, Serialize)]
pub struct Annotation {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub motivation: Motivation,
    pub body: Body,
    pub target: Target,
}

impl Annotation {
    pub fn new(id: String, motivation: Motivation, body: Body, target: Target) -> Self {
        Self {
            id,
            kind: "Annotation",
            motivation,
            body,
            target,
        }
    }
}

/// Annotation page, embedded with items or referenced by id
#[derive(Debug, Clone, Serialize)]
pub struct AnnotationPage {
    #[serde(rename = "@context", skip_serializing_if = "Option::is_none")]
    pub context: Option<&'static str>,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<Annotation>>,
}

impl AnnotationPage {
    pub fn embedded(id: String, items: Vec<Annotation>) -> Self {
        Self {
            context: None,
            id,
            kind: "AnnotationPage",
            items: Some(items),
        }
    }

    /// Standalone document published on its own
    pub fn document(id: String, items: Vec<Annotation>) -> Self {
        Self {
            context: Some(PRESENTATION_CONTEXT),
            ..Self::embedded(id, items)
        }
    }

    pub fn reference(id: String) -> Self {
        Self {
            context: None,
            id,
            kind: "AnnotationPage",
            items: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Canvas {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub label: LangMap,
    pub height: u32,
    pub width: u32,
    pub thumbnail: Vec<ExternalItem>,
    pub items: Vec<AnnotationPage>,
    pub annotations: Vec<AnnotationPage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rendering: Vec<ExternalItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    #[serde(rename = "@context")]
    pub context: &'static str,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub label: LangMap,
    pub behavior: Vec<String>,
    pub provider: Vec<AgentRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    pub items: Vec<Canvas>,
}

/// Member of a collection, always by reference
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum CollectionItem {
    Collection {
        id: String,
        label: LangMap,
    },
    Manifest {
        id: String,
        label: LangMap,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        thumbnail: Vec<ExternalItem>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct Collection {
    #[serde(rename = "@context")]
    pub context: &'static str,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub label: LangMap,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub behavior: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub provider: Vec<AgentRecord>,
    pub items: Vec<CollectionItem>,
}

impl Collection {
    pub fn new(id: String, label: LangMap) -> Self {
        Self {
            context: PRESENTATION_CONTEXT,
            id,
            kind: "Collection",
            label,
            behavior: Vec::new(),
            provider: Vec::new(),
            items: Vec::new(),
        }
    }

    /// Reference to this collection for a parent's `items`
    pub fn as_item(&self) -> CollectionItem {
        CollectionItem::Collection {
            id: self.id.clone(),
            label: self.label.clone(),
        }
    }
}

/// Write any record as pretty JSON, creating parent directories
pub fn write_document<T: Serialize>(path: &Path, document: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
    }
    let content =
        serde_json::to_string_pretty(document).map_err(|e| PipelineError::json(path, e))?;
    std::fs::write(path, content).map_err(|e| PipelineError::io(path, e))
}
