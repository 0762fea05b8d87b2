//! SVG overlay selectors
//!
//! One `<path>` outline per (box, label) pair, styled by label.

use serde::Serialize;

use crate::geometry::BBox;

/// Stroke style of an overlay outline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayStyle {
    pub color: &'static str,
    pub opacity: f64,
    pub width: u32,
}

const DEFAULT_STYLE: OverlayStyle = OverlayStyle {
    color: "#ff0000",
    opacity: 1.0,
    width: 1,
};

/// Style of a box label; unknown labels get opaque red 1px
pub fn style_for(label: &str) -> OverlayStyle {
    let (color, opacity, width) = match label {
        "PAGE" => ("#0000ff", 0.5, 5),
        "ENTRY" => ("#ff0000", 0.1, 4),
        "LINE" => ("#00ff00", 1.0, 1),
        "PER" => ("#7aecec", 1.0, 2),
        "ACT" => ("#ff9561", 1.0, 2),
        "LOC" => ("#bfeeb7", 1.0, 2),
        "CARDINAL" => ("#feca74", 1.0, 2),
        _ => return DEFAULT_STYLE,
    };
    OverlayStyle {
        color,
        opacity,
        width,
    }
}

/// A labelled box to outline
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub bbox: BBox,
    pub label: String,
}

impl Overlay {
    pub fn new(bbox: BBox, label: impl Into<String>) -> Self {
        Self {
            bbox,
            label: label.into(),
        }
    }
}

/// Closed outline going down, right, then back up
pub fn svg_path(bbox: &BBox, style: &OverlayStyle) -> String {
    format!(
        "<path xmlns=\"http://www.w3.org/2000/svg\" d=\"M{},{}v{}h{}v-{}z\" fill=\"none\" stroke=\"{}\" stroke-opacity=\"{}\" stroke-width=\"{}\"/>",
        bbox.x, bbox.y, bbox.h, bbox.w, bbox.h, style.color, style.opacity, style.width
    )
}

/// Whole `<svg>` document for a set of overlays
pub fn svg_document(overlays: &[Overlay]) -> String {
    let paths: String = overlays
        .iter()
        .map(|o| svg_path(&o.bbox, &style_for(&o.label)))
        .collect();
    format!("<svg xmlns=\"http://www.w3.org/2000/svg\">{}</svg>", paths)
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Selector {
    SvgSelector { value: String },
}

/// Region of a canvas targeted by an annotation
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum SpecificResource {
    SpecificResource { source: String, selector: Selector },
}

/// Target outlining `overlays` on canvas `source`
pub fn svg_target(source: &str, overlays: &[Overlay]) -> SpecificResource {
    SpecificResource::SpecificResource {
        source: source.to_string(),
        selector: Selector::SvgSelector {
            value: svg_document(overlays),
        },
    }
}
