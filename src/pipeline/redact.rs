//! Redaction: paint opaque blocks over canonical PII regions on a raster.
//!
//! Regions arrive in the canonical 0–1000 page square (see
//! [`crate::pipeline::normalize`]) and are rescaled to the raster's actual
//! pixel size here, so the same extraction result redacts a 100 DPI preview
//! and a 300 DPI render identically.
//!
//! ## Fill strategy
//!
//! Most service polygons are axis-aligned boxes, sometimes skewed by a
//! fraction of a pixel. Those are filled as their pixel bounding box with
//! `floor`/`ceil` edges, so a box never leaves a half-covered sliver of text
//! at its border. Genuinely rotated quads go through imageproc's scanline
//! polygon fill, except slivers under half a pixel in area, which get their
//! bounding box.
//!
//! Painting is destructive and happens in place. A region that cannot be
//! painted is logged and skipped; the rest of the page is still redacted.

use crate::error::RedactionError;
use crate::pipeline::normalize::{canonical_to_pixel, CanonicalRegion};
use crate::raster::RasterImage;
use image::Rgb;
use imageproc::drawing::{draw_filled_rect_mut, draw_polygon_mut};
use imageproc::point::Point;
use imageproc::rect::Rect;
use tracing::{debug, info, warn};

/// Fully opaque masking colour.
pub const MASK_COLOR: Rgb<u8> = Rgb([0, 0, 0]);

/// Vertices closer than this (in pixels) to a bounding-box edge count as on it.
const AXIS_ALIGN_TOLERANCE_PX: f64 = 1.0;

/// Outcome of one [`redact`] call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RedactionSummary {
    /// Regions painted onto the raster.
    pub masked: usize,
    /// Regions that were skipped, with the reason.
    pub skipped: Vec<RedactionError>,
}

/// Paint every region onto `raster` in place.
///
/// Regions are independent; order does not matter. An empty slice leaves
/// the buffer untouched.
pub fn redact(raster: &mut RasterImage, regions: &[CanonicalRegion]) -> RedactionSummary {
    let mut summary = RedactionSummary::default();
    if regions.is_empty() {
        return summary;
    }

    info!(
        "Redacting {} region(s) on {}x{} px raster",
        regions.len(),
        raster.width(),
        raster.height()
    );

    for (index, region) in regions.iter().enumerate() {
        match redact_region(raster, index, region) {
            Ok(()) => summary.masked += 1,
            Err(e) => {
                warn!("Skipping redaction region: {}", e);
                summary.skipped.push(e);
            }
        }
    }

    summary
}

/// Paint a single region. `index` is only used for error reporting.
pub fn redact_region(
    raster: &mut RasterImage,
    index: usize,
    region: &CanonicalRegion,
) -> Result<(), RedactionError> {
    let (width, height) = (raster.width(), raster.height());
    let degenerate = || RedactionError::Degenerate {
        index,
        width,
        height,
    };
    if width == 0 || height == 0 {
        return Err(degenerate());
    }

    let px: Vec<(f64, f64)> = region
        .points()
        .iter()
        .map(|&(x, y)| {
            (
                canonical_to_pixel(x, width as f64),
                canonical_to_pixel(y, height as f64),
            )
        })
        .collect();

    let (min_x, max_x) = extent(px.iter().map(|p| p.0));
    let (min_y, max_y) = extent(px.iter().map(|p| p.1));
    if max_x - min_x <= f64::EPSILON || max_y - min_y <= f64::EPSILON {
        return Err(degenerate());
    }

    let axis_aligned = px.iter().all(|&(x, y)| {
        let on_x = (x - min_x).abs() <= AXIS_ALIGN_TOLERANCE_PX
            || (x - max_x).abs() <= AXIS_ALIGN_TOLERANCE_PX;
        let on_y = (y - min_y).abs() <= AXIS_ALIGN_TOLERANCE_PX
            || (y - max_y).abs() <= AXIS_ALIGN_TOLERANCE_PX;
        on_x && on_y
    });

    if axis_aligned {
        fill_bounding_box(raster, (min_x, max_x), (min_y, max_y)).ok_or_else(degenerate)?;
        return Ok(());
    }

    // Slivers too thin for the scanline fill get their whole box painted.
    if shoelace_area(&px) < 0.5 {
        fill_bounding_box(raster, (min_x, max_x), (min_y, max_y)).ok_or_else(degenerate)?;
        debug!("Sliver region {} masked as its bounding box", index);
        return Ok(());
    }

    let mut poly: Vec<Point<i32>> = Vec::with_capacity(4);
    for &(x, y) in &px {
        let p = Point::new(x.round() as i32, y.round() as i32);
        if poly.last() != Some(&p) {
            poly.push(p);
        }
    }
    // imageproc rejects an explicitly closed ring.
    while poly.len() > 1 && poly.first() == poly.last() {
        poly.pop();
    }
    if poly.len() < 3 {
        fill_bounding_box(raster, (min_x, max_x), (min_y, max_y)).ok_or_else(degenerate)?;
        return Ok(());
    }

    draw_polygon_mut(raster.pixels_mut(), &poly, MASK_COLOR);
    debug!("Masked polygon {:?}", poly);
    Ok(())
}

/// Paint the floor/ceil pixel box around a pixel-space extent.
///
/// Returns `None` when the box is empty after clamping to the raster.
fn fill_bounding_box(
    raster: &mut RasterImage,
    (min_x, max_x): (f64, f64),
    (min_y, max_y): (f64, f64),
) -> Option<()> {
    let (width, height) = (raster.width() as f64, raster.height() as f64);
    let x0 = min_x.floor().clamp(0.0, width) as u32;
    let x1 = max_x.ceil().clamp(0.0, width) as u32;
    let y0 = min_y.floor().clamp(0.0, height) as u32;
    let y1 = max_y.ceil().clamp(0.0, height) as u32;
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    let rect = Rect::at(x0 as i32, y0 as i32).of_size(x1 - x0, y1 - y0);
    draw_filled_rect_mut(raster.pixels_mut(), rect, MASK_COLOR);
    debug!("Masked box ({}, {})–({}, {})", x0, y0, x1, y1);
    Some(())
}

fn extent(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

fn shoelace_area(points: &[(f64, f64)]) -> f64 {
    let n = points.len();
    let twice: f64 = (0..n)
        .map(|i| {
            let (x0, y0) = points[i];
            let (x1, y1) = points[(i + 1) % n];
            x0 * y1 - x1 * y0
        })
        .sum();
    twice.abs() / 2.0
}
