//! Page rasters embedded in the source PDF
//!
//! Digitised directories carry one scanned image per page. The first image
//! XObject of the requested page is decoded to 8-bit grayscale.

use image::{DynamicImage, GrayImage, RgbImage};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::path::Path;
use tracing::debug;

use crate::error::{PipelineError, Result};

/// An opened source PDF
pub struct SourcePdf {
    doc: Document,
}

impl SourcePdf {
    /// Open a PDF from disk
    pub fn open(path: &Path) -> Result<Self> {
        let doc = Document::load(path)?;
        Ok(Self { doc })
    }

    /// Number of pages
    pub fn page_count(&self) -> u32 {
        self.doc.get_pages().len() as u32
    }

    /// Grayscale raster of page `view` (1-based)
    pub fn page_raster(&self, view: u32) -> Result<GrayImage> {
        let page_id = match self.doc.get_pages().get(&view) {
            Some(id) if view >= 1 => *id,
            _ => {
                return Err(PipelineError::InvalidViewIndex {
                    view,
                    pages: self.page_count(),
                })
            }
        };

        let stream = self
            .first_image(page_id)
            .ok_or_else(|| read_error(view, "page has no image"))?;

        let raster = decode_image(&self.doc, stream).map_err(|reason| read_error(view, &reason))?;
        debug!("View {} raster {}x{}", view, raster.width(), raster.height());
        Ok(raster)
    }

    fn first_image(&self, page_id: ObjectId) -> Option<&Stream> {
        let resources = self.page_resources(page_id)?;
        let xobjects = resolve(&self.doc, resources.get(b"XObject").ok()?)?.as_dict().ok()?;

        xobjects.iter().find_map(|(_, obj)| {
            let stream = resolve(&self.doc, obj)?.as_stream().ok()?;
            let subtype = stream.dict.get(b"Subtype").ok()?.as_name().ok()?;
            (subtype == b"Image").then_some(stream)
        })
    }

    /// Resources of a page, inherited from the page tree when absent
    fn page_resources(&self, page_id: ObjectId) -> Option<&Dictionary> {
        let mut node = self.doc.get_dictionary(page_id).ok()?;
        loop {
            if let Ok(res) = node.get(b"Resources") {
                return resolve(&self.doc, res)?.as_dict().ok();
            }
            let parent = node.get(b"Parent").ok()?.as_reference().ok()?;
            node = self.doc.get_dictionary(parent).ok()?;
        }
    }
}

fn read_error(view: u32, reason: &str) -> PipelineError {
    PipelineError::DocumentRead {
        view,
        reason: reason.to_string(),
    }
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn filter_names(doc: &Document, dict: &Dictionary) -> Vec<Vec<u8>> {
    let Some(filter) = dict.get(b"Filter").ok().and_then(|f| resolve(doc, f)) else {
        return Vec::new();
    };
    match filter {
        Object::Name(name) => vec![name.clone()],
        Object::Array(items) => items
            .iter()
            .filter_map(|item| resolve(doc, item)?.as_name().ok().map(|n| n.to_vec()))
            .collect(),
        _ => Vec::new(),
    }
}

/// Colour components of an image colour space, `None` when unsupported
fn components(doc: &Document, dict: &Dictionary) -> Option<u8> {
    let cs = resolve(doc, dict.get(b"ColorSpace").ok()?)?;
    match cs {
        Object::Name(name) => match name.as_slice() {
            b"DeviceGray" | b"CalGray" | b"G" => Some(1),
            b"DeviceRGB" | b"CalRGB" | b"RGB" => Some(3),
            b"DeviceCMYK" | b"CMYK" => Some(4),
            _ => None,
        },
        Object::Array(items) => {
            let family = items.first()?.as_name().ok()?;
            match family {
                b"ICCBased" => {
                    let profile = resolve(doc, items.get(1)?)?.as_stream().ok()?;
                    profile.dict.get(b"N").ok()?.as_i64().ok().map(|n| n as u8)
                }
                b"CalGray" => Some(1),
                b"CalRGB" => Some(3),
                _ => None,
            }
        }
        _ => None,
    }
}

fn decode_image(doc: &Document, stream: &Stream) -> std::result::Result<GrayImage, String> {
    let dict = &stream.dict;
    let filters = filter_names(doc, dict);

    match filters.last().map(|f| f.as_slice()) {
        Some(b"DCTDecode") if filters.len() == 1 => {
            let img = image::load_from_memory(&stream.content).map_err(|e| e.to_string())?;
            return Ok(img.to_luma8());
        }
        Some(b"FlateDecode") | None => {}
        Some(other) => {
            return Err(format!(
                "unsupported image filter {}",
                String::from_utf8_lossy(other)
            ))
        }
    }

    let width = dict
        .get(b"Width")
        .and_then(|w| w.as_i64())
        .map_err(|e| e.to_string())? as u32;
    let height = dict
        .get(b"Height")
        .and_then(|h| h.as_i64())
        .map_err(|e| e.to_string())? as u32;
    let bits = dict
        .get(b"BitsPerComponent")
        .and_then(|b| b.as_i64())
        .unwrap_or(8);
    let is_mask = dict
        .get(b"ImageMask")
        .and_then(|m| m.as_bool())
        .unwrap_or(false);

    let samples = if filters.is_empty() {
        stream.content.clone()
    } else {
        stream.decompressed_content().map_err(|e| e.to_string())?
    };

    let channels = if is_mask {
        1
    } else {
        components(doc, dict).ok_or_else(|| "unsupported colour space".to_string())?
    };

    match (channels, bits) {
        (1, 8) => GrayImage::from_raw(width, height, truncate(samples, width * height))
            .ok_or_else(|| "short grayscale sample buffer".to_string()),
        (1, 1) => Ok(expand_bilevel(&samples, width, height, is_mask)),
        (3, 8) => RgbImage::from_raw(width, height, truncate(samples, width * height * 3))
            .map(|rgb| DynamicImage::ImageRgb8(rgb).to_luma8())
            .ok_or_else(|| "short RGB sample buffer".to_string()),
        (4, 8) => Ok(cmyk_to_gray(&samples, width, height)),
        (c, b) => Err(format!("unsupported sample layout: {} components, {} bits", c, b)),
    }
}

fn truncate(mut samples: Vec<u8>, len: u32) -> Vec<u8> {
    samples.truncate(len as usize);
    samples
}

/// 1-bit rows are byte aligned; 0 is black unless the image is a stencil mask
fn expand_bilevel(samples: &[u8], width: u32, height: u32, is_mask: bool) -> GrayImage {
    let stride = width.div_ceil(8) as usize;
    GrayImage::from_fn(width, height, |x, y| {
        let byte = samples
            .get(y as usize * stride + x as usize / 8)
            .copied()
            .unwrap_or(0xff);
        let bit = (byte >> (7 - (x % 8))) & 1;
        let white = (bit == 1) != is_mask;
        image::Luma([if white { 255 } else { 0 }])
    })
}

fn cmyk_to_gray(samples: &[u8], width: u32, height: u32) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| {
        let idx = ((y * width + x) * 4) as usize;
        let px = samples.get(idx..idx + 4).unwrap_or(&[0, 0, 0, 0]);
        let k = px[3] as f32 / 255.0;
        let rgb = [0, 1, 2].map(|i| 255.0 * (1.0 - px[i] as f32 / 255.0) * (1.0 - k));
        let gray = 0.299 * rgb[0] + 0.587 * rgb[1] + 0.114 * rgb[2];
        image::Luma([gray.clamp(0.0, 255.0) as u8])
    })
}

/// Two-page documents for tests: page 1 holds one DeviceGray image, page 2 has no image
#[cfg(test)]
pub(crate) mod fixtures {
    use lopdf::{dictionary, Document, Object, Stream};
    use std::path::{Path, PathBuf};

    pub fn write_pdf(dir: &Path, samples: Vec<u8>, width: i64, height: i64) -> PathBuf {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let image = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width,
                "Height" => height,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            samples,
        );
        let image_id = doc.add_object(image);
        let resources_id = doc.add_object(dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        });

        let media_box: Vec<Object> = vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(width),
            Object::Integer(height),
        ];
        let page1 = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Resources" => resources_id,
            "MediaBox" => media_box.clone(),
        });
        let page2 = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Resources" => dictionary! {},
            "MediaBox" => media_box,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(page1), Object::Reference(page2)],
                "Count" => 2,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let path = dir.join("directory.pdf");
        doc.save(&path).unwrap();
        path
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::write_pdf;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_extracts_gray_raster() {
        let dir = TempDir::new().unwrap();
        let samples: Vec<u8> = (0..48).map(|i| (i * 5) as u8).collect();
        let path = write_pdf(dir.path(), samples, 8, 6);

        let pdf = SourcePdf::open(&path).unwrap();
        assert_eq!(pdf.page_count(), 2);

        let raster = pdf.page_raster(1).unwrap();
        assert_eq!(raster.dimensions(), (8, 6));
        assert_eq!(raster.get_pixel(1, 0).0[0], 5);
        assert_eq!(raster.get_pixel(0, 1).0[0], 40);
    }

    #[test]
    fn test_view_out_of_range() {
        let dir = TempDir::new().unwrap();
        let path = write_pdf(dir.path(), vec![0; 4], 2, 2);
        let pdf = SourcePdf::open(&path).unwrap();

        for view in [0, 3] {
            let err = pdf.page_raster(view).unwrap_err();
            assert!(
                matches!(err, PipelineError::InvalidViewIndex { pages: 2, .. }),
                "{}",
                err
            );
        }
    }

    #[test]
    fn test_page_without_image() {
        let dir = TempDir::new().unwrap();
        let path = write_pdf(dir.path(), vec![0; 4], 2, 2);
        let pdf = SourcePdf::open(&path).unwrap();

        let err = pdf.page_raster(2).unwrap_err();
        assert!(matches!(err, PipelineError::DocumentRead { view: 2, .. }));
    }

    #[test]
    fn test_expand_bilevel() {
        // 0b1010_0000: white, black, white, black
        let img = expand_bilevel(&[0b1010_0000], 4, 1, false);
        let values: Vec<u8> = img.pixels().map(|p| p.0[0]).collect();
        assert_eq!(values, vec![255, 0, 255, 0]);
    }
}
