//! Stub runtime for builds without libncnn.
//!
//! Mirrors the public surface of the real wrapper.  Tensor packing and
//! unpacking run in pure Rust so the conversion path stays testable;
//! network loads still require the model files to exist; every extraction
//! fails with an inference error, which also exercises the engines'
//! GPU→CPU fallback state machine under test.

use std::path::Path;

use tracing::debug;

use surge_core::error::{Result, UpscaleError};

use crate::options::RuntimeOptions;

const STUB_ERROR: &str = "surge-ncnn built in stub mode: the ncnn runtime is unavailable";

/// Capability report for one Vulkan device.
#[derive(Clone, Debug)]
pub struct GpuInfo {
    pub device_name: String,
    /// 0 = discrete, 1 = integrated, 2 = virtual, 3 = cpu.
    pub device_type: u32,
    pub vendor_id: u32,
    pub support_fp16_storage: bool,
    pub support_fp16_arithmetic: bool,
    pub support_fp16_packed: bool,
}

/// No devices are visible in stub mode.
pub fn gpu_count() -> i32 {
    0
}

pub fn gpu_info(_device_id: i32) -> Option<GpuInfo> {
    None
}

pub fn destroy_gpu_instance() {}

// ─── Pool allocator ─────────────────────────────────────────────────────

/// Host-side pool allocator stand-in; tracks clear calls for observability.
#[derive(Debug, Default)]
pub struct PoolAllocator {
    cleared: u32,
}

impl PoolAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.cleared += 1;
    }
}

// ─── Vulkan device + allocators ─────────────────────────────────────────

/// Which device-memory pool a [`VkAllocator`] fronts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VkAllocatorKind {
    Blob,
    Staging,
}

/// A device-memory allocator acquired from a [`VulkanDevice`].
#[derive(Debug)]
pub struct VkAllocator {
    pub device_id: i32,
    pub kind: VkAllocatorKind,
}

/// Handle to one Vulkan device; never obtainable in stub mode.
#[derive(Clone, Copy, Debug)]
pub struct VulkanDevice {
    device_id: i32,
}

impl VulkanDevice {
    pub fn get(_device_id: i32) -> Option<Self> {
        None
    }

    pub fn device_id(&self) -> i32 {
        self.device_id
    }

    pub fn acquire_blob_allocator(&self) -> VkAllocator {
        VkAllocator {
            device_id: self.device_id,
            kind: VkAllocatorKind::Blob,
        }
    }

    pub fn acquire_staging_allocator(&self) -> VkAllocator {
        VkAllocator {
            device_id: self.device_id,
            kind: VkAllocatorKind::Staging,
        }
    }

    pub fn reclaim(&self, _allocator: VkAllocator) {}
}

// ─── Mat ────────────────────────────────────────────────────────────────

/// Planar float tensor, channel-major.
pub struct Mat {
    width: u32,
    height: u32,
    planes: Vec<Vec<f32>>,
}

impl Mat {
    /// Pack interleaved RGB bytes into a 3-channel float tensor.
    pub fn from_pixels_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Self> {
        let plane_len = width as usize * height as usize;
        if pixels.len() != plane_len * 3 {
            return Err(UpscaleError::Inference(format!(
                "pixel buffer size mismatch: {}x{} needs {} bytes, got {}",
                width,
                height,
                plane_len * 3,
                pixels.len()
            )));
        }
        let mut planes = vec![Vec::with_capacity(plane_len); 3];
        for px in pixels.chunks_exact(3) {
            for (c, plane) in planes.iter_mut().enumerate() {
                plane.push(px[c] as f32);
            }
        }
        Ok(Self {
            width,
            height,
            planes,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u32 {
        self.planes.len() as u32
    }

    /// Per-channel multiply, used to map [0,255] bytes to [0,1] floats.
    pub fn normalize(&mut self, norm: [f32; 3]) {
        for (plane, factor) in self.planes.iter_mut().zip(norm) {
            for v in plane.iter_mut() {
                *v *= factor;
            }
        }
    }

    /// Multiply every channel in place.
    pub fn scale_channels(&mut self, factor: f32) {
        for plane in &mut self.planes {
            for v in plane.iter_mut() {
                *v *= factor;
            }
        }
    }

    /// Min, max, and mean over every channel, for diagnostics.
    pub fn value_range(&self) -> (f32, f32, f32) {
        let mut min = f32::MAX;
        let mut max = f32::MIN;
        let mut sum = 0.0f64;
        let mut count = 0usize;
        for plane in &self.planes {
            for &v in plane {
                min = min.min(v);
                max = max.max(v);
                sum += v as f64;
                count += 1;
            }
        }
        (min, max, (sum / count.max(1) as f64) as f32)
    }

    /// Unpack the tensor into interleaved RGB bytes with saturation.
    pub fn to_pixels_rgb(&self, out: &mut [u8]) -> Result<()> {
        let plane_len = self.width as usize * self.height as usize;
        if out.len() != plane_len * 3 {
            return Err(UpscaleError::Inference(format!(
                "output buffer size mismatch: needs {} bytes, got {}",
                plane_len * 3,
                out.len()
            )));
        }
        for i in 0..plane_len {
            for (c, plane) in self.planes.iter().enumerate() {
                out[i * 3 + c] = plane[i].round().clamp(0.0, 255.0) as u8;
            }
        }
        Ok(())
    }
}

// ─── Net + extractor ────────────────────────────────────────────────────

/// A loaded network (state only in stub mode).
#[derive(Default)]
pub struct Net {
    options: RuntimeOptions,
}

impl Net {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    pub fn apply_options(
        &mut self,
        options: &RuntimeOptions,
        _cpu_allocators: Option<(&PoolAllocator, &PoolAllocator)>,
    ) {
        self.options = *options;
    }

    pub fn set_vulkan_device(&mut self, _device: &VulkanDevice) {}

    pub fn bind_vulkan_allocators(&mut self, _blob: &VkAllocator, _staging: &VkAllocator) {}

    pub fn load_param(&mut self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(UpscaleError::ModelMissing(format!(
                "failed to load network definition {}",
                path.display()
            )));
        }
        debug!(path = %path.display(), "stub runtime: network definition accepted unparsed");
        Ok(())
    }

    pub fn load_model(&mut self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(UpscaleError::ModelMissing(format!(
                "failed to load network weights {}",
                path.display()
            )));
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        debug!("stub runtime: network cleared");
    }

    pub fn extractor(&mut self) -> Extractor<'_> {
        Extractor {
            _net: std::marker::PhantomData,
        }
    }
}

/// One forward pass; always fails in stub mode.
pub struct Extractor<'net> {
    _net: std::marker::PhantomData<&'net mut Net>,
}

impl Extractor<'_> {
    pub fn input(&mut self, _name: &str, _mat: &Mat) -> Result<()> {
        Ok(())
    }

    pub fn extract(&mut self, name: &str) -> Result<Mat> {
        Err(UpscaleError::Inference(format!(
            "extract of blob '{name}' failed: {STUB_ERROR}"
        )))
    }
}
