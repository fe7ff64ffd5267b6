//! Coordinate normalisation: service polygons → resolution-independent regions.
//!
//! The document-understanding service reports each field's bounding polygon
//! in the units of the page it was measured on (inches for PDFs, pixels for
//! images). The rendered raster has a different size again. Both sides meet
//! in a canonical 0–1000 square per page, so a region can be painted on a
//! raster of any resolution without knowing how it was measured.

use serde::{Deserialize, Serialize};

/// Side length of the canonical coordinate square.
pub const CANONICAL_SCALE: f64 = 1000.0;

/// A single polygon vertex as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolygonPoint {
    pub x: f64,
    pub y: f64,
}

/// A bounding polygon in either of the two shapes services emit.
///
/// The representation is detected from the element shape: plain numbers are
/// alternating `x, y` scalars, objects are `{x, y}` points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PolygonCoords {
    Flat(Vec<f64>),
    Points(Vec<PolygonPoint>),
}

impl PolygonCoords {
    /// Vertices as `(x, y)` pairs. A trailing unpaired scalar is ignored.
    pub fn points(&self) -> Vec<(f64, f64)> {
        match self {
            PolygonCoords::Flat(values) => values.chunks_exact(2).map(|c| (c[0], c[1])).collect(),
            PolygonCoords::Points(points) => points.iter().map(|p| (p.x, p.y)).collect(),
        }
    }
}

/// Size of the page a polygon was measured on, in the polygon's own units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageDimensions {
    pub width: f64,
    pub height: f64,
}

impl PageDimensions {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    fn is_usable(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

/// A 4-point polygon in canonical page space, tied to the page that produced it.
///
/// Serialised as `{"page": 1, "coords": [x0, y0, …, y3]}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRegion {
    page: u32,
    coords: [f64; 8],
}

impl CanonicalRegion {
    /// Build a region from canonical coordinates.
    ///
    /// Returns `None` if any coordinate is non-finite or outside `[0, 1000]`.
    pub fn new(page: u32, coords: [f64; 8]) -> Option<Self> {
        if coords
            .iter()
            .all(|c| c.is_finite() && (0.0..=CANONICAL_SCALE).contains(c))
        {
            Some(Self { page, coords })
        } else {
            None
        }
    }

    /// The whole page, clockwise from the top-left corner.
    pub fn full_page(page: u32) -> Self {
        let s = CANONICAL_SCALE;
        Self {
            page,
            coords: [0.0, 0.0, s, 0.0, s, s, 0.0, s],
        }
    }

    /// 1-based page number the coordinates are relative to.
    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn coords(&self) -> &[f64; 8] {
        &self.coords
    }

    pub fn points(&self) -> [(f64, f64); 4] {
        let c = &self.coords;
        [(c[0], c[1]), (c[2], c[3]), (c[4], c[5]), (c[6], c[7])]
    }
}

/// Normalise a service polygon measured on a page of size `page` into canonical space.
///
/// Each axis is mapped as `coordinate / page_dimension * 1000` and clamped to
/// `[0, 1000]` (services occasionally report vertices a hair outside the
/// page). Only the first four vertices are used.
///
/// Malformed input yields `None` rather than an error so one bad field never
/// sinks the document: zero, negative or non-finite page dimensions, fewer
/// than four vertices, or non-finite coordinates.
pub fn normalize_polygon(
    polygon: &PolygonCoords,
    page: PageDimensions,
    page_number: u32,
) -> Option<CanonicalRegion> {
    if !page.is_usable() {
        return None;
    }
    let points = polygon.points();
    if points.len() < 4 {
        return None;
    }

    let mut coords = [0.0f64; 8];
    for (i, &(x, y)) in points.iter().take(4).enumerate() {
        if !x.is_finite() || !y.is_finite() {
            return None;
        }
        coords[i * 2] = pixel_to_canonical(x, page.width);
        coords[i * 2 + 1] = pixel_to_canonical(y, page.height);
    }

    CanonicalRegion::new(page_number, coords)
}

/// Map one coordinate from page units into canonical space, clamped.
pub fn pixel_to_canonical(value: f64, dimension: f64) -> f64 {
    (value / dimension * CANONICAL_SCALE).clamp(0.0, CANONICAL_SCALE)
}

/// Map one canonical coordinate back onto an axis of `dimension` pixels.
pub fn canonical_to_pixel(value: f64, dimension: f64) -> f64 {
    value / CANONICAL_SCALE * dimension
}
