//! Edge-replicate padding and the matching centred crop.
//!
//! Neural upscalers ring within ~18 pixels of a hard boundary, so inputs
//! are padded with replicated edge pixels before inference and the scaled
//! padding is cropped away afterwards.

use surge_core::{Raster, RGB_CHANNELS};

/// Padding applied around every inference input, in source pixels.
pub const DEFAULT_PADDING: u32 = 18;

/// Pad a raster by `padding` pixels on every side, replicating edge pixels.
///
/// Zero-sized inputs and zero padding are returned unchanged.
pub fn pad(src: &Raster, padding: u32) -> Raster {
    if src.width() == 0 || src.height() == 0 || padding == 0 {
        return src.clone();
    }

    let out_w = src.width() + padding * 2;
    let out_h = src.height() + padding * 2;
    let max_x = (src.width() - 1) as i64;
    let max_y = (src.height() - 1) as i64;

    let mut data = Vec::with_capacity(out_w as usize * out_h as usize * RGB_CHANNELS);
    for y in 0..out_h {
        let src_y = (y as i64 - padding as i64).clamp(0, max_y) as u32;
        for x in 0..out_w {
            let src_x = (x as i64 - padding as i64).clamp(0, max_x) as u32;
            data.extend_from_slice(src.row_span(src_x, src_y, 1));
        }
    }

    Raster::from_vec(out_w, out_h, data).expect("padded buffer size is exact")
}

/// Crop `src` down to `target_w`×`target_h`, removing up to `pad_offset`
/// pixels of scaled padding from the leading edges.
///
/// The offset is clamped to the actual excess on each axis, so an output
/// that grew by less than the full padding (or on one axis only) is still
/// cropped correctly.
pub fn crop_centered(src: &Raster, target_w: u32, target_h: u32, pad_offset: u32) -> Raster {
    if src.width() <= target_w && src.height() <= target_h {
        return src.clone();
    }
    let start_x = pad_offset.min(src.width().saturating_sub(target_w));
    let start_y = pad_offset.min(src.height().saturating_sub(target_h));
    src.crop(
        start_x,
        start_y,
        target_w.min(src.width()),
        target_h.min(src.height()),
    )
}
