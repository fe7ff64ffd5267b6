//! The single in-memory page image that flows through one document's audit.
//!
//! `RasterImage` is intentionally not `Clone`. The renderer hands ownership to
//! the orchestrator, redaction mutates it in place, and only the encoded
//! (post-redaction) bytes ever leave the process. There is no way to keep an
//! unredacted copy around by accident.

use image::{DynamicImage, RgbImage};

/// Owned RGB8 pixel buffer for the first page of a document.
#[derive(Debug)]
pub struct RasterImage {
    pixels: RgbImage,
}

impl RasterImage {
    /// Wrap an RGB buffer.
    pub fn from_rgb(pixels: RgbImage) -> Self {
        Self { pixels }
    }

    /// Convert any decoded/rendered image to RGB8, dropping alpha.
    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self {
            pixels: image.into_rgb8(),
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Raw interleaved RGB bytes, row-major.
    pub fn as_raw(&self) -> &[u8] {
        self.pixels.as_raw()
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    pub(crate) fn pixels_mut(&mut self) -> &mut RgbImage {
        &mut self.pixels
    }
}
