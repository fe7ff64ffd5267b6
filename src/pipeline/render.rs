//! Document rendering: first page of a PDF, or a decoded PNG/JPEG, as a [`RasterImage`].
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and is not safe to drive from async contexts. Image decoding is
//! plain CPU work. Both run on the blocking pool so Tokio workers never stall
//! while a 300 DPI page is rasterised.
//!
//! ## Why first page only?
//!
//! Invoices put vendor, totals and recipient on page 1, and the audit model
//! sees one image. Regions the extractor reports on later pages are dropped
//! by the orchestrator before redaction.

use crate::error::RenderError;
use crate::pipeline::input::{DocumentKind, SourceDocument};
use crate::raster::RasterImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming a directory or file containing libpdfium.
pub const ENV_PDFIUM_LIB_PATH: &str = "PDFIUM_LIB_PATH";

/// Turns source documents into owned RGB rasters.
#[derive(Debug, Clone)]
pub struct DocumentRenderer {
    dpi: u32,
    max_rendered_pixels: u32,
    pdfium_lib_path: Option<PathBuf>,
}

impl DocumentRenderer {
    pub fn new(dpi: u32, max_rendered_pixels: u32, pdfium_lib_path: Option<PathBuf>) -> Self {
        Self {
            dpi,
            max_rendered_pixels,
            pdfium_lib_path,
        }
    }

    pub fn dpi(&self) -> u32 {
        self.dpi
    }

    /// Render page 1 of a PDF, or decode a raster upload.
    ///
    /// The returned image is owned by the caller and never cached here.
    pub async fn render(&self, doc: &SourceDocument) -> Result<RasterImage, RenderError> {
        let bytes = doc.shared_bytes();
        let kind = doc.kind();
        let dpi = self.dpi;
        let max_pixels = self.max_rendered_pixels;
        let lib_path = self.pdfium_lib_path.clone();

        let raster = tokio::task::spawn_blocking(move || match kind {
            DocumentKind::Pdf => render_pdf_blocking(&bytes, dpi, max_pixels, lib_path.as_deref()),
            DocumentKind::Raster => decode_raster_blocking(&bytes),
        })
        .await
        .map_err(|e| RenderError::Internal(format!("Render task panicked: {}", e)))??;

        debug!(
            "{}: rendered → {}x{} px",
            doc.name(),
            raster.width(),
            raster.height()
        );
        Ok(raster)
    }
}

/// Bind pdfium from the configured location, then `PDFIUM_LIB_PATH`, then the system search path.
pub fn bind_pdfium(lib_path: Option<&Path>) -> Result<Pdfium, RenderError> {
    let env_path = std::env::var_os(ENV_PDFIUM_LIB_PATH).map(PathBuf::from);
    for candidate in lib_path.map(Path::to_path_buf).into_iter().chain(env_path) {
        let lib = if candidate.is_dir() {
            Pdfium::pdfium_platform_library_name_at_path(&candidate)
        } else {
            candidate.clone()
        };
        debug!("Trying pdfium at {:?}", lib);
        if let Ok(bindings) = Pdfium::bind_to_library(&lib) {
            info!("Bound pdfium from {:?}", lib);
            return Ok(Pdfium::new(bindings));
        }
    }

    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|e| RenderError::RendererUnavailable(format!("{:?}", e)))
}

fn render_pdf_blocking(
    bytes: &[u8],
    dpi: u32,
    max_pixels: u32,
    lib_path: Option<&Path>,
) -> Result<RasterImage, RenderError> {
    let pdfium = bind_pdfium(lib_path)?;

    let document = pdfium.load_pdf_from_byte_slice(bytes, None).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.contains("Password") || err_str.contains("password") {
            RenderError::PasswordRequired
        } else {
            RenderError::CorruptPdf { detail: err_str }
        }
    })?;

    let pages = document.pages();
    if pages.len() == 0 {
        return Err(RenderError::EmptyDocument);
    }
    debug!("PDF loaded: {} page(s), rendering page 1", pages.len());

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(dpi as f32 / 72.0)
        .set_maximum_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let page = pages.get(0).map_err(|e| RenderError::RasterisationFailed {
        detail: format!("{:?}", e),
    })?;

    let bitmap =
        page.render_with_config(&render_config)
            .map_err(|e| RenderError::RasterisationFailed {
                detail: format!("{:?}", e),
            })?;

    Ok(RasterImage::from_dynamic(bitmap.as_image()))
}

fn decode_raster_blocking(bytes: &[u8]) -> Result<RasterImage, RenderError> {
    let image = image::load_from_memory(bytes).map_err(|e| RenderError::DecodeFailed {
        detail: e.to_string(),
    })?;
    Ok(RasterImage::from_dynamic(image))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(w, h, Rgb([200, 10, 10]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn renderer() -> DocumentRenderer {
        DocumentRenderer::new(200, 4000, None)
    }

    #[tokio::test]
    async fn png_upload_is_decoded_at_native_size() {
        let doc = SourceDocument::from_bytes("scan.png", png_bytes(37, 19)).unwrap();
        let raster = renderer().render(&doc).await.unwrap();
        assert_eq!((raster.width(), raster.height()), (37, 19));
        assert_eq!(&raster.as_raw()[..3], &[200, 10, 10]);
    }

    #[tokio::test]
    async fn corrupt_image_bytes_fail_to_decode() {
        let doc = SourceDocument::new("broken.jpg", vec![0xFF, 0xD8, 0xFF, 0x00, 0x01], DocumentKind::Raster);
        let err = renderer().render(&doc).await.unwrap_err();
        assert!(matches!(err, RenderError::DecodeFailed { .. }));
    }

    #[tokio::test]
    async fn garbage_pdf_is_reported_when_pdfium_is_available() {
        if std::env::var("PDFIUM_TESTS").is_err() {
            return;
        }
        let doc = SourceDocument::new("bad.pdf", b"%PDF-1.7 not really".to_vec(), DocumentKind::Pdf);
        let err = renderer().render(&doc).await.unwrap_err();
        assert!(matches!(
            err,
            RenderError::CorruptPdf { .. } | RenderError::PasswordRequired
        ));
    }
}
