//! The engine contract — the seam between the tiling orchestrator, the
//! streaming pipeline, the wire protocols, and the concrete RealESRGAN /
//! RealCUGAN implementations.

use tracing::warn;

use crate::config::OutputFormat;
use crate::error::Result;
use crate::raster::Raster;

/// Tile-based processing parameters derived by each engine from its options
/// and hardware profile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TilingConfig {
    /// Base tile size in source pixels (before upscaling).
    pub tile_size: u32,
    /// Source pixels shared between adjacent tiles to avoid seams.
    pub overlap: u32,
    /// Upscale factor applied by the engine.
    pub scale_factor: u32,
    /// Auto-enable tiling for images beyond the thresholds.
    pub enabled: bool,
    pub threshold_width: u32,
    pub threshold_height: u32,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            tile_size: 512,
            overlap: 32,
            scale_factor: 1,
            enabled: true,
            threshold_width: 2048,
            threshold_height: 2048,
        }
    }
}

/// Super-resolution engine contract.
///
/// An engine owns the loaded network and its allocator state; it is created
/// once per process and must not be used after [`cleanup`](Self::cleanup).
pub trait UpscaleEngine: Send {
    /// Upscale a raw RGB raster.  The engine pads the input internally, so
    /// the output may be larger than `src * scale`; callers crop (see the
    /// tiling orchestrator).
    fn process_rgb(&mut self, src: &Raster) -> Result<Raster>;

    /// Process one compressed image end-to-end: decode, tile-or-direct
    /// upscale, encode to `format`.
    fn process_single(&mut self, input: &[u8], format: OutputFormat) -> Result<Vec<u8>>;

    /// Process a batch of compressed images.  Per-image failures yield an
    /// empty output buffer and the batch continues.
    fn process_batch(&mut self, inputs: &[Vec<u8>], format: OutputFormat) -> Vec<Vec<u8>> {
        let mut outputs = Vec::with_capacity(inputs.len());
        for (index, input) in inputs.iter().enumerate() {
            match self.process_single(input, format) {
                Ok(data) => outputs.push(data),
                Err(err) => {
                    warn!(index, error = %err, "batch image failed");
                    outputs.push(Vec::new());
                }
            }
        }
        outputs
    }

    fn scale_factor(&self) -> u32;

    fn tiling_config(&self) -> TilingConfig;

    /// Release the network, allocators, and Vulkan state.  Idempotent; must
    /// only be called once all inference on this engine has finished.
    fn cleanup(&mut self);
}
