//! Box geometry shared by the transformer and the annotation assembler
//!
//! Boxes are `[x, y, w, h]` in pixels, axis aligned in whatever space the
//! caller works in.

use serde::{Deserialize, Serialize};

/// Axis-aligned box `(x, y, width, height)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl From<[f64; 4]> for BBox {
    fn from(v: [f64; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [f64; 4] {
    fn from(b: BBox) -> Self {
        [b.x, b.y, b.w, b.h]
    }
}

impl BBox {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    /// Top-left and bottom-right corners
    pub fn corners(&self) -> ((f64, f64), (f64, f64)) {
        ((self.x, self.y), (self.x + self.w, self.y + self.h))
    }

    /// Build a box back from two corners
    pub fn from_corners(p1: (f64, f64), p2: (f64, f64)) -> Self {
        Self::new(p1.0, p1.1, p2.0 - p1.0, p2.1 - p1.1)
    }

    /// Whether `other` lies inside this box horizontally
    #[cfg(test)]
    pub fn contains_x_range(&self, other: &BBox) -> bool {
        other.x >= self.x && other.x + other.w <= self.x + self.w
    }
}

/// Smallest box covering every input box, `None` for an empty input
pub fn union_box<I>(boxes: I) -> Option<BBox>
where
    I: IntoIterator<Item = BBox>,
{
    let mut iter = boxes.into_iter();
    let first = iter.next()?;
    let ((mut min_x, mut min_y), (mut max_x, mut max_y)) = first.corners();

    for b in iter {
        let ((x1, y1), (x2, y2)) = b.corners();
        min_x = min_x.min(x1).min(x2);
        min_y = min_y.min(y1).min(y2);
        max_x = max_x.max(x1).max(x2);
        max_y = max_y.max(y1).max(y2);
    }

    Some(BBox::new(min_x, min_y, max_x - min_x, max_y - min_y))
}

/// Horizontal shear approximating the deskew rotation.
///
/// Keyed off the vertical skew angle: at `angle = pi/2` this is the identity.
pub fn shear(p: (f64, f64), angle: f64) -> (f64, f64) {
    let c = -angle.cos();
    (p.0 - p.1 * c, p.1)
}

/// Scale a source-raster box by `ratio` then shear both corners independently
pub fn transform_box(bbox: &BBox, ratio: f64, angle: f64) -> BBox {
    let (p1, p2) = bbox.corners();
    let scaled1 = (p1.0 * ratio, p1.1 * ratio);
    let scaled2 = (p2.0 * ratio, p2.1 * ratio);
    BBox::from_corners(shear(scaled1, angle), shear(scaled2, angle))
}

/// A text line with a box, as seen by the span matcher
pub trait TextLine {
    fn line_text(&self) -> &str;
    fn line_box(&self) -> Option<BBox>;
}

impl<T: TextLine + ?Sized> TextLine for &T {
    fn line_text(&self) -> &str {
        (**self).line_text()
    }

    fn line_box(&self) -> Option<BBox> {
        (**self).line_box()
    }
}

/// How the matched character window is turned into a horizontal fraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanMode {
    /// `start = index / len`, `width = len(needle) / len`
    #[default]
    Proportional,
    /// `start = index / len`, `end = (index + len(needle)) / len`, `width = end - start`
    Window,
}

/// Boxes produced for one needle and the line index that matched last
#[derive(Debug, Clone, PartialEq)]
pub struct SpanMatch {
    pub boxes: Vec<BBox>,
    pub index: usize,
}

/// Locate `needle` among `lines` and project it onto the matching line's box.
///
/// The first line containing the whole needle wins. Otherwise a hyphenated
/// needle is split and each piece matched on its own; pieces that fail add
/// nothing. `None` when nothing matched at all.
pub fn span_to_box<L: TextLine>(needle: &str, lines: &[L], mode: SpanMode) -> Option<SpanMatch> {
    if let Some(found) = find_whole(needle, lines, mode) {
        return Some(found);
    }

    if !needle.contains('-') {
        return None;
    }

    let mut boxes = Vec::new();
    let mut last_index = None;
    for piece in needle.split('-').filter(|p| !p.is_empty()) {
        if let Some(found) = span_to_box(piece, lines, mode) {
            boxes.extend(found.boxes);
            last_index = Some(found.index);
        }
    }

    last_index.map(|index| SpanMatch { boxes, index })
}

fn find_whole<L: TextLine>(needle: &str, lines: &[L], mode: SpanMode) -> Option<SpanMatch> {
    for (index, line) in lines.iter().enumerate() {
        let text = line.line_text();
        if text.is_empty() {
            continue;
        }
        let Some(byte_pos) = text.find(needle) else {
            continue;
        };
        let Some(line_box) = line.line_box() else {
            continue;
        };

        // Fractions are measured in characters, not bytes
        let total = text.chars().count() as f64;
        let start_chars = text[..byte_pos].chars().count() as f64;
        let needle_chars = needle.chars().count() as f64;

        let start = start_chars / total;
        let width = match mode {
            SpanMode::Proportional => needle_chars / total,
            SpanMode::Window => (start_chars + needle_chars) / total - start,
        };

        let projected = BBox::new(
            line_box.x + start * line_box.w,
            line_box.y,
            width * line_box.w,
            line_box.h,
        );
        return Some(SpanMatch {
            boxes: vec![projected],
            index,
        });
    }
    None
}
