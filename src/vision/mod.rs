//! Skew Estimation
//!
//! Estimates the rotation of a scanned directory page from its near-vertical
//! rules and column edges. Segments come from the region-growing detector in
//! [`segments`]; rasters come from the source PDF through [`pdf`].

pub mod pdf;
pub mod segments;

use image::GrayImage;
use std::f64::consts::FRAC_PI_2;
use tracing::{debug, warn};

use crate::config::TransformSettings;
use crate::error::Result;

pub use pdf::SourcePdf;
pub use segments::{LineSegment, SegmentDetector};

/// Outcome of a skew estimation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkewEstimate {
    /// Segments that contributed to the angle
    pub segments: usize,
    /// Mean segment angle in radians, `PI / 2` for an upright page
    pub angle: f64,
}

impl SkewEstimate {
    /// Upright page, used when no segment qualifies
    pub const UPRIGHT: SkewEstimate = SkewEstimate {
        segments: 0,
        angle: FRAC_PI_2,
    };
}

/// Raster size and skew of one PDF page
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSkew {
    pub height: u32,
    pub width: u32,
    pub estimate: SkewEstimate,
}

fn is_vertical(angle: f64, tolerance_deg: f64) -> bool {
    (angle.to_degrees() - 90.0).abs() < tolerance_deg
}

/// Average the near-vertical segments that lie away from the page edges
pub fn vertical_angle(
    segments: &[LineSegment],
    image_width: u32,
    tolerance_deg: f64,
    border_ratio: f64,
) -> SkewEstimate {
    let width = image_width as f64;
    let (left, right) = (border_ratio * width, (1.0 - border_ratio) * width);

    let mut sum = 0.0;
    let mut count = 0;
    for seg in segments {
        let angle = seg.angle();
        if !is_vertical(angle, tolerance_deg) {
            continue;
        }
        if seg.x1.min(seg.x2) < left || seg.x1.max(seg.x2) > right {
            continue;
        }
        debug!("Vertical segment at {:.2}°", angle.to_degrees());
        sum += angle;
        count += 1;
    }

    if count == 0 {
        return SkewEstimate::UPRIGHT;
    }

    let angle = sum / count as f64;
    debug!(
        "{} segments detected with angle = {:.5} ({:.3}°)",
        count,
        angle,
        angle.to_degrees()
    );
    SkewEstimate {
        segments: count,
        angle,
    }
}

/// Estimate the skew of a grayscale page raster
pub fn estimate_skew(image: &GrayImage, settings: &TransformSettings) -> SkewEstimate {
    let detector = SegmentDetector::new(settings.lsd.clone());
    let segments = detector.detect(image);
    debug!("{} raw segments", segments.len());

    vertical_angle(
        &segments,
        image.width(),
        settings.vertical_tolerance_deg,
        settings.border_ratio,
    )
}

/// Extract page `view` (1-based) from the PDF and estimate its skew
pub fn estimate_pdf_page(
    pdf: &SourcePdf,
    view: u32,
    settings: &TransformSettings,
) -> Result<PageSkew> {
    let raster = pdf.page_raster(view)?;
    let estimate = estimate_skew(&raster, settings);
    if estimate.segments == 0 {
        warn!("No segment detected on view {}, assuming an upright page", view);
    }

    Ok(PageSkew {
        height: raster.height(),
        width: raster.width(),
        estimate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn segment(x1: f64, y1: f64, x2: f64, y2: f64) -> LineSegment {
        LineSegment {
            x1,
            y1,
            x2,
            y2,
            width: 1.0,
            log_nfa: 10.0,
        }
    }

    #[test]
    fn test_blank_page_is_upright() {
        let img = GrayImage::from_pixel(120, 160, Luma([255]));
        let estimate = estimate_skew(&img, &TransformSettings::default());
        assert_eq!(estimate, SkewEstimate::UPRIGHT);
        assert_eq!(estimate.segments, 0);
        assert_eq!(estimate.angle, FRAC_PI_2);
    }

    #[test]
    fn test_vertical_angle_averages_kept_segments() {
        let tilt = 2.0_f64.to_radians();
        let segments = vec![
            // upright, drawn bottom-up so atan2 is negative before folding
            segment(50.0, 100.0, 50.0, 0.0),
            // tilted by 2 degrees
            segment(60.0, 0.0, 60.0 + 100.0 * tilt.tan(), 100.0),
            // horizontal rule
            segment(20.0, 50.0, 80.0, 50.0),
        ];

        let estimate = vertical_angle(&segments, 100, 5.0, 0.1);
        assert_eq!(estimate.segments, 2);
        let expected = (FRAC_PI_2 + (FRAC_PI_2 - tilt)) / 2.0;
        assert!((estimate.angle - expected).abs() < 1e-9, "{}", estimate.angle);
    }

    #[test]
    fn test_vertical_angle_drops_border_segments() {
        let segments = vec![
            segment(5.0, 0.0, 5.0, 100.0),
            segment(95.0, 0.0, 95.0, 100.0),
            // straddles the right border
            segment(88.0, 0.0, 91.0, 100.0),
        ];
        let estimate = vertical_angle(&segments, 100, 5.0, 0.1);
        assert_eq!(estimate, SkewEstimate::UPRIGHT);
    }

    #[test]
    fn test_vertical_angle_tolerance() {
        let steep = 80.0_f64.to_radians();
        let segments = vec![segment(50.0, 0.0, 50.0 + 100.0 / steep.tan(), 100.0)];

        assert_eq!(vertical_angle(&segments, 100, 5.0, 0.1).segments, 0);
        assert_eq!(vertical_angle(&segments, 100, 15.0, 0.1).segments, 1);
    }

    #[test]
    fn test_estimate_on_vertical_band() {
        let mut img = GrayImage::from_pixel(200, 200, Luma([255]));
        for y in 0..200 {
            for x in 90..110 {
                img.put_pixel(x, y, Luma([0]));
            }
        }

        let estimate = estimate_skew(&img, &TransformSettings::default());
        assert!(estimate.segments > 0);
        assert!((estimate.angle.to_degrees() - 90.0).abs() < 1.0, "{}", estimate.angle);
    }
}
