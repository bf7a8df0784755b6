//! Compressed image ↔ RGB raster adapter.
//!
//! Decoding accepts anything the `image` crate recognises (the worker only
//! ever receives JPEG/PNG/WebP) and always flattens to 3-channel RGB.
//! Encoding supports lossy WebP (quality 90), PNG, and JPEG (quality 90).

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};

use surge_core::error::{Result, UpscaleError};
use surge_core::{OutputFormat, Raster};

/// Quality used by the lossy encoders.
const LOSSY_QUALITY: u8 = 90;

/// Decode a compressed image into an RGB raster.
pub fn decode(bytes: &[u8]) -> Result<Raster> {
    if bytes.is_empty() {
        return Err(UpscaleError::Decode("empty input buffer".into()));
    }
    let decoded =
        image::load_from_memory(bytes).map_err(|err| UpscaleError::Decode(err.to_string()))?;
    let rgb = decoded.to_rgb8();
    let (width, height) = rgb.dimensions();
    Raster::from_vec(width, height, rgb.into_raw())
}

/// Encode an RGB raster into the requested output format.
pub fn encode(raster: &Raster, format: OutputFormat) -> Result<Vec<u8>> {
    match format {
        OutputFormat::Webp => {
            let encoder =
                webp::Encoder::from_rgb(raster.data(), raster.width(), raster.height());
            let memory = encoder
                .encode_simple(false, LOSSY_QUALITY as f32)
                .map_err(|err| UpscaleError::Encode(format!("webp encode failed: {err:?}")))?;
            Ok(memory.to_vec())
        }
        OutputFormat::Png => {
            let mut out = Vec::new();
            PngEncoder::new(&mut out)
                .write_image(
                    raster.data(),
                    raster.width(),
                    raster.height(),
                    ExtendedColorType::Rgb8,
                )
                .map_err(|err| UpscaleError::Encode(err.to_string()))?;
            Ok(out)
        }
        OutputFormat::Jpeg => {
            let mut out = Vec::new();
            JpegEncoder::new_with_quality(&mut out, LOSSY_QUALITY)
                .write_image(
                    raster.data(),
                    raster.width(),
                    raster.height(),
                    ExtendedColorType::Rgb8,
                )
                .map_err(|err| UpscaleError::Encode(err.to_string()))?;
            Ok(out)
        }
    }
}
