//! Runtime state shared by the RealESRGAN and RealCUGAN engines: option
//! profiles, device resolution, allocator ownership, the GPU→CPU fallback
//! transition, and model-pair loading.

use std::path::Path;

use tracing::{info, warn};

use surge_core::error::{Result, UpscaleError};
use surge_core::{GpuSelector, Raster};
use surge_ncnn::{gpu_info, Mat, Net, PoolAllocator, RuntimeOptions, VkAllocator, VulkanDevice};

use crate::padding::{pad, DEFAULT_PADDING};

/// Per-channel factor mapping [0,255] bytes to [0,1] floats.
const NORM_TO_UNIT: [f32; 3] = [1.0 / 255.0; 3];

/// Network plus the mutable runtime state an engine owns: which compute
/// backend is active, the option profile, and every allocator.
///
/// The engine is the single release point for these resources; cleanup runs
/// once, after all inference is finished.
pub(crate) struct NetContext {
    pub net: Net,
    options: RuntimeOptions,
    use_vulkan: bool,
    igpu_profile: bool,
    cpu_low_mem: bool,
    vk_device: Option<VulkanDevice>,
    blob_vkallocator: Option<VkAllocator>,
    staging_vkallocator: Option<VkAllocator>,
    cpu_blob: PoolAllocator,
    cpu_workspace: PoolAllocator,
}

impl NetContext {
    pub fn new() -> Self {
        Self {
            net: Net::new(),
            options: RuntimeOptions::default(),
            use_vulkan: false,
            igpu_profile: false,
            cpu_low_mem: false,
            vk_device: None,
            blob_vkallocator: None,
            staging_vkallocator: None,
            cpu_blob: PoolAllocator::new(),
            cpu_workspace: PoolAllocator::new(),
        }
    }

    /// Enable the GPU path (FP16, lightmode, no winograd workspace),
    /// resolve the device selector, and install the matching allocators.
    pub fn configure_device(&mut self, gpu: GpuSelector, label: &str) {
        self.use_vulkan = true;
        self.options.use_vulkan_compute = true;
        self.options.use_fp16_storage = true;
        self.options.use_fp16_arithmetic = true;
        self.options.use_fp16_packed = true;
        // Lightmode releases intermediate tensors eagerly; winograd would
        // allocate a large workspace per convolution.
        self.options.lightmode = true;
        self.options.use_winograd_convolution = false;

        match gpu.resolve() {
            Some(device_id) => {
                if let Some(device) = VulkanDevice::get(device_id) {
                    self.net.set_vulkan_device(&device);
                    self.setup_vulkan_allocators(device);
                    self.apply_igpu_profile(device_id, label);
                } else {
                    warn!(engine = label, device_id, "vulkan device unavailable");
                }
            }
            None => {
                self.ensure_cpu_mode();
                self.use_vulkan = false;
            }
        }

        if !self.use_vulkan {
            self.apply_cpu_low_mem_profile(label);
        }
        self.apply();
    }

    /// Push the current option record and allocator bindings to the net.
    fn apply(&mut self) {
        let cpu = (!self.use_vulkan).then_some((&self.cpu_blob, &self.cpu_workspace));
        self.net.apply_options(&self.options, cpu);
    }

    fn ensure_cpu_mode(&mut self) {
        self.options.use_vulkan_compute = false;
        self.options.use_fp16_storage = false;
        self.options.use_fp16_arithmetic = false;
        self.options.use_fp16_packed = false;
    }

    fn apply_cpu_low_mem_profile(&mut self, label: &str) {
        if self.cpu_low_mem {
            return;
        }
        self.cpu_low_mem = true;
        self.options.num_threads = if self.options.num_threads <= 0 {
            4
        } else {
            self.options.num_threads.min(4)
        };
        self.options.openmp_blocktime = 0;
        self.options.use_winograd_convolution = false;
        self.options.use_sgemm_convolution = false;
        self.options.use_packing_layout = false;
        self.options.use_local_pool_allocator = true;
        info!(engine = label, "CPU low-mem profile enabled");
    }

    fn apply_igpu_profile(&mut self, device_id: i32, label: &str) {
        if self.igpu_profile || device_id < 0 {
            return;
        }
        let Some(info) = gpu_info(device_id) else {
            return;
        };
        if !info.is_integrated() {
            return;
        }
        self.igpu_profile = true;
        self.options.use_winograd_convolution = false;
        self.options.use_sgemm_convolution = false;
        self.options.use_packing_layout = false;
        self.options.use_cooperative_matrix = false;
        self.options.use_fp16_storage = info.support_fp16_storage;
        self.options.use_fp16_arithmetic = info.support_fp16_arithmetic;
        self.options.use_fp16_packed = info.support_fp16_packed;
        info!(engine = label, device = %info.device_name, "iGPU profile enabled");
    }

    fn setup_vulkan_allocators(&mut self, device: VulkanDevice) {
        if self.blob_vkallocator.is_some() || self.staging_vkallocator.is_some() {
            return;
        }
        let blob = device.acquire_blob_allocator();
        let staging = device.acquire_staging_allocator();
        // The blob allocator doubles as the workspace pool.
        self.net.bind_vulkan_allocators(&blob, &staging);
        self.blob_vkallocator = Some(blob);
        self.staging_vkallocator = Some(staging);
        self.vk_device = Some(device);
    }

    fn release_vulkan_allocators(&mut self) {
        if let Some(device) = self.vk_device.take() {
            if let Some(blob) = self.blob_vkallocator.take() {
                device.reclaim(blob);
            }
            if let Some(staging) = self.staging_vkallocator.take() {
                device.reclaim(staging);
            }
        }
    }

    /// One-shot GPU→CPU transition after a failed Vulkan inference.  The
    /// switch persists for the rest of the process.
    pub fn fallback_to_cpu(&mut self, label: &str) {
        warn!(engine = label, "vulkan inference failed; falling back to CPU");
        self.release_vulkan_allocators();
        self.ensure_cpu_mode();
        self.use_vulkan = false;
        self.apply_cpu_low_mem_profile(label);
        self.apply();
    }

    pub fn is_vulkan(&self) -> bool {
        self.use_vulkan
    }

    pub fn is_igpu_profile(&self) -> bool {
        self.igpu_profile
    }

    /// Return pooled host memory after an image; CPU mode only.
    pub fn clear_cpu_allocators(&mut self) {
        if !self.use_vulkan {
            self.cpu_blob.clear();
            self.cpu_workspace.clear();
            self.apply();
        }
    }

    /// Release order matters: disable Vulkan compute first, return the
    /// device allocators, then clear the network and host pools.
    pub fn shutdown(&mut self) {
        if self.use_vulkan {
            self.options.use_vulkan_compute = false;
            self.apply();
        }
        self.release_vulkan_allocators();
        self.net.clear();
        self.use_vulkan = false;
        self.cpu_blob.clear();
        self.cpu_workspace.clear();
    }
}

/// Load `<base>.param` + `<base>.bin` from `root`, falling back to the
/// `fallback` pair when either file of the primary pair is absent.
pub(crate) fn load_model_pair(
    net: &mut Net,
    root: &Path,
    base: &str,
    fallback: &str,
    label: &str,
) -> Result<()> {
    let pair = |name: &str| {
        (
            root.join(format!("{name}.param")),
            root.join(format!("{name}.bin")),
        )
    };

    let (mut param, mut bin) = pair(base);
    if !param.exists() || !bin.exists() {
        warn!(
            engine = label,
            model = base,
            fallback,
            "specified model missing, falling back"
        );
        (param, bin) = pair(fallback);
    }
    if !param.exists() || !bin.exists() {
        return Err(UpscaleError::ModelMissing(format!(
            "fallback model missing: {}",
            param.display()
        )));
    }

    net.load_param(&param)?;
    net.load_model(&bin)?;
    info!(engine = label, model = %param.display(), "model loaded");
    Ok(())
}

/// Tiling parameters shared by both engines: a tile-size override forces
/// tiling for any non-trivial image; the iGPU profile shrinks tiles and
/// thresholds to fit integrated-GPU memory.
pub(crate) fn derive_tiling_config(
    scale: u32,
    tile_override: u32,
    igpu: bool,
) -> surge_core::TilingConfig {
    let mut config = surge_core::TilingConfig {
        scale_factor: scale,
        ..surge_core::TilingConfig::default()
    };
    if tile_override > 0 {
        config.tile_size = tile_override.max(config.overlap + 1);
        config.threshold_width = config.tile_size.max(1);
        config.threshold_height = config.tile_size.max(1);
    } else if igpu {
        config.tile_size = 384u32.max(config.overlap + 1);
        config.threshold_width = config.threshold_width.min(1024);
        config.threshold_height = config.threshold_height.min(1024);
    }
    config
}

/// Pad the source and pack it into a normalised float tensor.
pub(crate) fn pack_input(src: &Raster) -> Result<Mat> {
    let padded = pad(src, DEFAULT_PADDING);
    let mut mat = Mat::from_pixels_rgb(padded.data(), padded.width(), padded.height())?;
    mat.normalize(NORM_TO_UNIT);
    Ok(mat)
}

/// Denormalise the network output and unpack it into an RGB raster.
pub(crate) fn unpack_output(mut mat: Mat) -> Result<Raster> {
    mat.scale_channels(255.0);
    let (width, height) = (mat.width(), mat.height());
    let mut pixels = vec![0u8; width as usize * height as usize * 3];
    mat.to_pixels_rgb(&mut pixels)?;
    Raster::from_vec(width, height, pixels)
}
