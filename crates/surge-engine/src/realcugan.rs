//! RealCUGAN engine — fixed 2x scale, denoise strength baked into the
//! selected model pair.

use std::path::PathBuf;

use tracing::info;

use surge_core::error::{Result, UpscaleError};
use surge_core::{EngineOptions, OutputFormat, Raster, TilingConfig, UpscaleEngine};
use surge_ncnn::Mat;

use crate::context::{self, derive_tiling_config, NetContext};
use crate::processor;

const LABEL: &str = "realcugan";
const FALLBACK_MODEL: &str = "up2x-conservative";
const SCALE: u32 = 2;

/// Map the single-letter quality flag to a noise level.  Anything
/// unrecognised (or empty) disables denoising.
fn quality_to_noise(quality: &str) -> i32 {
    match quality.chars().next().map(|c| c.to_ascii_uppercase()) {
        Some('F') => -1,
        Some('E') => 0,
        Some('Q') => 1,
        Some('H') => 2,
        _ => -1,
    }
}

/// Model base name for a noise level.
fn model_base(noise: i32) -> &'static str {
    match noise {
        -1 => "up2x-no-denoise",
        0 => "up2x-denoise1x",
        1 => "up2x-denoise2x",
        2 | 3 => "up2x-denoise3x",
        _ => FALLBACK_MODEL,
    }
}

pub struct RealCuganEngine {
    ctx: NetContext,
    options: EngineOptions,
    /// Doubles as the cleanup guard: `None` once cleaned up.
    model_root: Option<PathBuf>,
}

impl RealCuganEngine {
    /// Build and initialise the engine: resolve the noise level, configure
    /// the device, and load the model pair.
    pub fn init(options: &EngineOptions) -> Result<Self> {
        let mut options = options.clone();
        options.noise = if options.noise >= 0 {
            options.noise
        } else {
            quality_to_noise(&options.quality)
        };

        let root = options.model_root.clone();
        if root.as_os_str().is_empty() {
            return Err(UpscaleError::ModelMissing(
                "realcugan model path is empty".into(),
            ));
        }
        if !root.exists() {
            tracing::warn!(engine = LABEL, root = %root.display(), "model directory not found");
        }

        let mut ctx = NetContext::new();
        ctx.configure_device(options.gpu, LABEL);

        let base = model_base(options.noise);
        context::load_model_pair(&mut ctx.net, &root, base, FALLBACK_MODEL, LABEL)?;

        Ok(Self {
            ctx,
            options,
            model_root: Some(root),
        })
    }

    fn run_inference(&mut self, input: &Mat, allow_fallback: bool) -> Result<Mat> {
        let mut ex = self.ctx.net.extractor();
        // The noise level lives in the chosen model pair; it is not a
        // runtime input.
        let result = ex.input("in0", input).and_then(|()| ex.extract("out0"));
        drop(ex);

        match result {
            Ok(mat) => Ok(mat),
            Err(err) if allow_fallback && self.ctx.is_vulkan() => {
                tracing::warn!(engine = LABEL, error = %err, "inference failed");
                self.ctx.fallback_to_cpu(LABEL);
                self.run_inference(input, false)
            }
            Err(err) => Err(err),
        }
    }
}

impl UpscaleEngine for RealCuganEngine {
    fn process_rgb(&mut self, src: &Raster) -> Result<Raster> {
        let input = context::pack_input(src)?;
        let result = self
            .run_inference(&input, true)
            .and_then(context::unpack_output);
        self.ctx.clear_cpu_allocators();
        result
    }

    fn process_single(&mut self, input: &[u8], format: OutputFormat) -> Result<Vec<u8>> {
        processor::process(self, input, format)
    }

    fn scale_factor(&self) -> u32 {
        SCALE
    }

    fn tiling_config(&self) -> TilingConfig {
        derive_tiling_config(
            self.scale_factor(),
            self.options.tile_size,
            self.ctx.is_igpu_profile(),
        )
    }

    fn cleanup(&mut self) {
        if self.model_root.is_none() {
            info!(engine = LABEL, "already cleaned up, skipping");
            return;
        }
        info!(engine = LABEL, "engine cleanup");
        self.ctx.shutdown();
        self.model_root = None;
        info!(engine = LABEL, "engine cleanup complete");
    }
}
