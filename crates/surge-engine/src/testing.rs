//! Deterministic engine used by tests across the workspace.

use surge_core::error::{Result, UpscaleError};
use surge_core::{OutputFormat, Raster, TilingConfig, UpscaleEngine, RGB_CHANNELS};

use crate::padding::{pad, DEFAULT_PADDING};
use crate::processor;

/// Nearest-neighbour upscaler with the same padding contract as the real
/// engines: inputs are padded by [`DEFAULT_PADDING`] before scaling, so the
/// output carries scaled padding for the orchestrator to crop.  Entirely
/// position-independent, which makes direct and tiled runs byte-identical.
pub struct NearestNeighbourEngine {
    scale: u32,
    tile_size: u32,
    overlap: u32,
    threshold_width: u32,
    threshold_height: u32,
    fail_after: Option<u32>,
    inference_calls: u32,
    cleanup_calls: u32,
}

impl NearestNeighbourEngine {
    pub fn new(scale: u32) -> Self {
        let defaults = TilingConfig::default();
        Self {
            scale,
            tile_size: defaults.tile_size,
            overlap: defaults.overlap,
            threshold_width: defaults.threshold_width,
            threshold_height: defaults.threshold_height,
            fail_after: None,
            inference_calls: 0,
            cleanup_calls: 0,
        }
    }

    pub fn with_thresholds(mut self, width: u32, height: u32) -> Self {
        self.threshold_width = width;
        self.threshold_height = height;
        self
    }

    pub fn with_tile_size(mut self, tile_size: u32, overlap: u32) -> Self {
        self.tile_size = tile_size;
        self.overlap = overlap;
        self
    }

    /// Fail every inference after the first `calls` successful ones.
    pub fn failing_after(mut self, calls: u32) -> Self {
        self.fail_after = Some(calls);
        self
    }

    pub fn inference_calls(&self) -> u32 {
        self.inference_calls
    }

    pub fn cleanup_calls(&self) -> u32 {
        self.cleanup_calls
    }
}

impl UpscaleEngine for NearestNeighbourEngine {
    fn process_rgb(&mut self, src: &Raster) -> Result<Raster> {
        self.inference_calls += 1;
        if let Some(limit) = self.fail_after {
            if self.inference_calls > limit {
                return Err(UpscaleError::Inference("synthetic inference failure".into()));
            }
        }

        let padded = pad(src, DEFAULT_PADDING);
        let out_w = padded.width() * self.scale;
        let out_h = padded.height() * self.scale;
        let mut data = Vec::with_capacity(out_w as usize * out_h as usize * RGB_CHANNELS);
        for y in 0..out_h {
            for x in 0..out_w {
                data.extend_from_slice(padded.row_span(x / self.scale, y / self.scale, 1));
            }
        }
        Raster::from_vec(out_w, out_h, data)
    }

    fn process_single(&mut self, input: &[u8], format: OutputFormat) -> Result<Vec<u8>> {
        processor::process(self, input, format)
    }

    fn scale_factor(&self) -> u32 {
        self.scale
    }

    fn tiling_config(&self) -> TilingConfig {
        TilingConfig {
            tile_size: self.tile_size,
            overlap: self.overlap,
            scale_factor: self.scale,
            enabled: true,
            threshold_width: self.threshold_width,
            threshold_height: self.threshold_height,
        }
    }

    fn cleanup(&mut self) {
        self.cleanup_calls += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::NearestNeighbourEngine;
    use crate::codec;
    use surge_core::{OutputFormat, Raster, UpscaleEngine};

    #[test]
    fn batch_processing_keeps_going_past_failures() {
        let good = codec::encode(
            &Raster::from_vec(8, 8, vec![50; 8 * 8 * 3]).unwrap(),
            OutputFormat::Png,
        )
        .unwrap();
        let inputs = vec![good.clone(), b"garbage".to_vec(), good];

        let mut engine = NearestNeighbourEngine::new(2);
        let outputs = engine.process_batch(&inputs, OutputFormat::Png);

        assert_eq!(outputs.len(), 3);
        assert!(!outputs[0].is_empty());
        // The undecodable entry yields an empty placeholder, not an abort.
        assert!(outputs[1].is_empty());
        assert!(!outputs[2].is_empty());
        let decoded = codec::decode(&outputs[2]).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 16));
    }
}
