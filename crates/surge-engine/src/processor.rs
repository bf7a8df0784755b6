//! End-to-end image processing: decode → tile-or-direct upscale → encode.
//!
//! The engine pads every inference input by [`DEFAULT_PADDING`] pixels, so
//! upscaled results come back larger than `input * scale`; the scaled
//! padding is cropped here — per tile on the tiled path, once at the end on
//! the direct path.

use tracing::info;

use surge_core::error::{Result, UpscaleError};
use surge_core::{OutputFormat, Raster, UpscaleEngine};

use crate::codec;
use crate::padding::{crop_centered, DEFAULT_PADDING};
use crate::tiling::{blend_tile, calculate_tiles, extract_tile, should_tile};

/// Process one compressed image with automatic tiling.
///
/// Small images (both dimensions within the engine's thresholds) take the
/// direct path: one inference over the whole raster.  Larger images are
/// split into overlapping tiles, upscaled one at a time, and reassembled —
/// only one tile's buffers are alive at any moment.  A failure on any tile
/// aborts the whole image.
pub fn process<E>(engine: &mut E, input: &[u8], format: OutputFormat) -> Result<Vec<u8>>
where
    E: UpscaleEngine + ?Sized,
{
    let source = codec::decode(input)?;
    let config = engine.tiling_config();
    let scale = config.scale_factor;
    let pad_scaled = DEFAULT_PADDING * scale;

    if !should_tile(source.width(), source.height(), &config) {
        info!(
            width = source.width(),
            height = source.height(),
            threshold_width = config.threshold_width,
            threshold_height = config.threshold_height,
            "image within thresholds, processing directly"
        );
        let upscaled = engine.process_rgb(&source)?;
        let desired_w = source.width() * scale;
        let desired_h = source.height() * scale;
        let final_raster = if upscaled.width() > desired_w || upscaled.height() > desired_h {
            crop_centered(&upscaled, desired_w, desired_h, pad_scaled)
        } else {
            upscaled
        };
        return codec::encode(&final_raster, format);
    }

    let tiles = calculate_tiles(source.width(), source.height(), &config);
    if tiles.is_empty() {
        return Err(UpscaleError::Pipeline("no tiles generated".into()));
    }

    let out_w = source.width() * scale;
    let out_h = source.height() * scale;
    let mut output = Raster::zeroed(out_w, out_h);

    info!(
        tiles = tiles.len(),
        out_w, out_h, "processing image tile by tile"
    );

    for (index, tile) in tiles.iter().enumerate() {
        let tile_rgb = extract_tile(&source, tile);
        let upscaled = engine.process_rgb(&tile_rgb).map_err(|err| {
            UpscaleError::Pipeline(format!("tile {index} failed: {err}"))
        })?;

        // Remove the scaled padding the engine added around the tile.
        let expected_w = tile.w * scale;
        let expected_h = tile.h * scale;
        let cropped = if upscaled.width() > expected_w || upscaled.height() > expected_h {
            crop_centered(&upscaled, expected_w, expected_h, pad_scaled)
        } else {
            upscaled
        };

        // Strip the leading overlap on interior axes; what remains is the
        // region belonging uniquely to this tile.
        let off_x = if tile.out_x > 0 { config.overlap * scale } else { 0 };
        let off_y = if tile.out_y > 0 { config.overlap * scale } else { 0 };
        let region = cropped.crop(
            off_x,
            off_y,
            cropped.width() - off_x,
            cropped.height() - off_y,
        );
        blend_tile(&region, tile, &mut output);

        if (index + 1) % 10 == 0 || index + 1 == tiles.len() {
            info!(done = index + 1, total = tiles.len(), "tiles processed");
        }
    }

    // Each tile was already cropped, so the assembled output is exactly
    // source * scale; the direct path's final crop has nothing to remove.
    codec::encode(&output, format)
}
