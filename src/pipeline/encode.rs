//! Image encoding: `RasterImage` → JPEG bytes → base64 for the audit request.
//!
//! The same encoded bytes are written to the vault and sent to the model, so
//! the audit trail holds exactly what the model saw. JPEG keeps scanned
//! invoices small enough for vision APIs; the masks are flat black and
//! survive lossy compression intact.

use crate::raster::RasterImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};
use tracing::debug;

/// MIME type of everything produced by [`encode_jpeg`].
pub const JPEG_MIME: &str = "image/jpeg";

/// An encoded page image ready for transport or storage.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    bytes: Vec<u8>,
    mime_type: &'static str,
}

impl EncodedImage {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &'static str {
        self.mime_type
    }

    /// Text-safe standard base64 of the encoded bytes.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    /// `data:` URL as used by OpenAI-style `image_url` parts.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }

    /// Wrap as an LLM image attachment.
    ///
    /// `detail: "high"` keeps small print (totals, VAT ids) legible to
    /// GPT-4-class models, which otherwise downsample to one 512 px tile.
    pub fn to_image_data(&self) -> ImageData {
        let b64 = self.to_base64();
        debug!("Encoded image → {} bytes base64", b64.len());
        ImageData::new(b64, self.mime_type).with_detail("high")
    }
}

/// Encode the raster as a baseline JPEG at `quality` (1–100).
pub fn encode_jpeg(raster: &RasterImage, quality: u8) -> Result<EncodedImage, image::ImageError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)).write_image(
        raster.as_raw(),
        raster.width(),
        raster.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(EncodedImage {
        bytes: buf,
        mime_type: JPEG_MIME,
    })
}
