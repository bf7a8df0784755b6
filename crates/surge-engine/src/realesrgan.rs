//! RealESRGAN engine — 2x/3x/4x scale, animevideov3 model family by
//! default or an explicitly named model.

use std::path::PathBuf;

use tracing::{info, warn};

use surge_core::error::Result;
use surge_core::{EngineOptions, OutputFormat, Raster, TilingConfig, UpscaleEngine};
use surge_ncnn::Mat;

use crate::context::{self, derive_tiling_config, NetContext};
use crate::processor;

const LABEL: &str = "realesrgan";
const FALLBACK_MODEL: &str = "realesr-animevideov3-x2";
const DEFAULT_MODEL_ROOT: &str = "models/realesrgan";

pub struct RealEsrganEngine {
    ctx: NetContext,
    options: EngineOptions,
    /// Doubles as the cleanup guard: `None` once cleaned up.
    model_root: Option<PathBuf>,
}

impl RealEsrganEngine {
    /// Build and initialise the engine: resolve the model root, configure
    /// the device, and load the model pair.
    pub fn init(options: &EngineOptions) -> Result<Self> {
        let options = options.clone();

        let root = if options.model_root.as_os_str().is_empty() {
            PathBuf::from(DEFAULT_MODEL_ROOT)
        } else {
            options.model_root.clone()
        };
        if !root.exists() {
            warn!(engine = LABEL, root = %root.display(), "model directory not found");
        }

        let mut ctx = NetContext::new();
        ctx.configure_device(options.gpu, LABEL);

        let base = choose_model(&options);
        context::load_model_pair(&mut ctx.net, &root, &base, FALLBACK_MODEL, LABEL)?;

        Ok(Self {
            ctx,
            options,
            model_root: Some(root),
        })
    }

    /// One forward pass, probing both blob-name conventions: the
    /// animevideov3 family exposes `data`/`output`, the general family
    /// `in0`/`out0`.
    fn extract_once(&mut self, input: &Mat) -> Result<Mat> {
        let mut ex = self.ctx.net.extractor();
        match ex.input("data", input) {
            Ok(()) => ex.extract("output"),
            Err(_) => {
                drop(ex);
                let mut ex = self.ctx.net.extractor();
                ex.input("in0", input).map_err(|err| {
                    tracing::error!(
                        engine = LABEL,
                        "no input blob found (tried 'data' and 'in0')"
                    );
                    err
                })?;
                ex.extract("out0")
            }
        }
    }

    fn run_inference(&mut self, input: &Mat, allow_fallback: bool) -> Result<Mat> {
        match self.extract_once(input) {
            Ok(mat) => Ok(mat),
            Err(err) if allow_fallback && self.ctx.is_vulkan() => {
                warn!(engine = LABEL, error = %err, "inference failed");
                self.ctx.fallback_to_cpu(LABEL);
                self.run_inference(input, false)
            }
            Err(err) => Err(err),
        }
    }
}

/// Explicit model name when given, else keyed by scale factor.
fn choose_model(options: &EngineOptions) -> String {
    if let Some(name) = options.model_name.as_deref().filter(|n| !n.is_empty()) {
        info!(engine = LABEL, model = name, "using explicit model name");
        return name.to_string();
    }
    match options.scale {
        2 => FALLBACK_MODEL.to_string(),
        3 => "realesr-animevideov3-x3".to_string(),
        4 => "realesr-animevideov3-x4".to_string(),
        other => {
            warn!(engine = LABEL, scale = other, "unexpected scale, defaulting to x2");
            FALLBACK_MODEL.to_string()
        }
    }
}

impl UpscaleEngine for RealEsrganEngine {
    fn process_rgb(&mut self, src: &Raster) -> Result<Raster> {
        let input = context::pack_input(src)?;
        let verbose = self.options.verbose;
        let result = self.run_inference(&input, true).and_then(|output| {
            if verbose {
                let (min, max, mean) = output.value_range();
                info!(engine = LABEL, min, max, mean, "raw output range before denorm");
            }
            context::unpack_output(output)
        });
        self.ctx.clear_cpu_allocators();
        result
    }

    fn process_single(&mut self, input: &[u8], format: OutputFormat) -> Result<Vec<u8>> {
        processor::process(self, input, format)
    }

    fn scale_factor(&self) -> u32 {
        self.options.scale.max(1)
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
