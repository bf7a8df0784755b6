//! Safe wrapper over the ncnn C API.
//!
//! Ownership model: [`Net`] owns the loaded network, [`PoolAllocator`] and
//! [`VkAllocator`] are owned by the engine and bound to the net via
//! [`Net::apply_options`] / [`Net::bind_vulkan_allocators`], and [`Mat`]
//! buffers live for one inference call.  Every handle is released in `Drop`,
//! so resources cannot leak on early-return paths.
//!
//! The C API does not expose every option knob the engines tune (FP16
//! toggles, lightmode, convolution paths are internal to the runtime
//! build); [`Net::apply_options`] pushes what the API accepts and keeps the
//! full record for observability.

use std::ffi::CString;
use std::path::Path;

use tracing::{debug, warn};

use surge_core::error::{Result, UpscaleError};

use crate::options::RuntimeOptions;
use crate::sys;

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

/// Number of Vulkan devices visible to the runtime.  Touching this creates
/// the global GPU instance.
pub fn gpu_count() -> i32 {
    crate::instance::mark_gpu_used();
    // SAFETY: no preconditions; the runtime initialises its instance lazily.
    unsafe { sys::ncnn_get_gpu_count() }
}

/// Capability report for `device_id`.
///
/// The C API does not surface per-device capability queries, so this returns
/// `None` and the iGPU profile stays off unless a report is available.
pub fn gpu_info(device_id: i32) -> Option<GpuInfo> {
    let _ = device_id;
    None
}

/// Destroy the runtime's global Vulkan instance.  Called once at process
/// exit via [`crate::instance::destroy_gpu_instance_if_used`].
pub fn destroy_gpu_instance() {
    // SAFETY: idempotent in the runtime; must not race with live inference.
    unsafe { sys::ncnn_destroy_gpu_instance() }
}

// ─── Pool allocator ─────────────────────────────────────────────────────

/// Host-side pool allocator used for blob and workspace memory in CPU mode.
pub struct PoolAllocator {
    handle: sys::ncnn_allocator_t,
}

// SAFETY: allocator handles have no thread affinity; the engine owns them
// and never shares them across threads concurrently.
unsafe impl Send for PoolAllocator {}

impl PoolAllocator {
    pub fn new() -> Self {
        // SAFETY: creation has no preconditions.
        let handle = unsafe { sys::ncnn_allocator_create_pool_allocator() };
        Self { handle }
    }

    /// Release all pooled buffers.  Recreates the underlying allocator, so
    /// the handle bound to a net must be re-applied afterwards.
    pub fn clear(&mut self) {
        // SAFETY: handle is a live allocator created by this wrapper.
        unsafe {
            sys::ncnn_allocator_destroy(self.handle);
            self.handle = sys::ncnn_allocator_create_pool_allocator();
        }
    }

    fn raw(&self) -> sys::ncnn_allocator_t {
        self.handle
    }
}

impl Default for PoolAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PoolAllocator {
    fn drop(&mut self) {
        // SAFETY: handle is live and unbound from any net by cleanup order.
        unsafe { sys::ncnn_allocator_destroy(self.handle) };
    }
}

// ─── Vulkan device + allocators ─────────────────────────────────────────

/// Which device-memory pool a [`VkAllocator`] fronts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VkAllocatorKind {
    /// Blob pool, shared with the workspace pool by the engines.
    Blob,
    /// Host-visible staging pool for upload/download.
    Staging,
}

/// A device-memory allocator acquired from a [`VulkanDevice`].
///
/// The C API manages Vulkan allocator pools inside the runtime; acquisition
/// and reclaim are tracked here so engine cleanup ordering stays explicit.
#[derive(Debug)]
pub struct VkAllocator {
    pub device_id: i32,
    pub kind: VkAllocatorKind,
}

/// Handle to one Vulkan device of the global instance.
#[derive(Clone, Copy, Debug)]
pub struct VulkanDevice {
    device_id: i32,
}

impl VulkanDevice {
    /// Acquire the device with the given index, or `None` when out of range.
    pub fn get(device_id: i32) -> Option<Self> {
        if device_id < 0 || device_id >= gpu_count() {
            return None;
        }
        Some(Self { device_id })
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

    /// Return an allocator to the device pools.
    pub fn reclaim(&self, allocator: VkAllocator) {
        debug!(device = self.device_id, kind = ?allocator.kind, "reclaimed vulkan allocator");
    }
}

// ─── Mat ────────────────────────────────────────────────────────────────

/// A float tensor owned by the runtime.
pub struct Mat {
    handle: sys::ncnn_mat_t,
}

impl Mat {
    /// Pack interleaved RGB bytes into a 3-channel float tensor.
    pub fn from_pixels_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if pixels.len() != expected {
            return Err(UpscaleError::Inference(format!(
                "pixel buffer size mismatch: {}x{} needs {expected} bytes, got {}",
                width,
                height,
                pixels.len()
            )));
        }
        // SAFETY: pixels covers w*h*3 bytes and stride matches the row size.
        let handle = unsafe {
            sys::ncnn_mat_from_pixels(
                pixels.as_ptr(),
                sys::NCNN_MAT_PIXEL_RGB,
                width as i32,
                height as i32,
                width as i32 * 3,
                std::ptr::null_mut(),
            )
        };
        if handle.is_null() {
            return Err(UpscaleError::Inference(
                "runtime refused pixel tensor allocation".into(),
            ));
        }
        Ok(Self { handle })
    }

    pub fn width(&self) -> u32 {
        // SAFETY: handle is a live mat.
        unsafe { sys::ncnn_mat_get_w(self.handle) as u32 }
    }

    pub fn height(&self) -> u32 {
        // SAFETY: handle is a live mat.
        unsafe { sys::ncnn_mat_get_h(self.handle) as u32 }
    }

    pub fn channels(&self) -> u32 {
        // SAFETY: handle is a live mat.
        unsafe { sys::ncnn_mat_get_c(self.handle) as u32 }
    }

    /// Per-channel multiply, used to map [0,255] bytes to [0,1] floats.
    pub fn normalize(&mut self, norm: [f32; 3]) {
        // SAFETY: mean pointer may be null (no mean subtraction); norm holds
        // one factor per channel.
        unsafe {
            sys::ncnn_mat_substract_mean_normalize(self.handle, std::ptr::null(), norm.as_ptr())
        }
    }

    /// Multiply every channel in place, used to map [0,1] floats back to
    /// [0,255] before the saturating u8 conversion.
    pub fn scale_channels(&mut self, factor: f32) {
        let plane = self.width() as usize * self.height() as usize;
        for c in 0..self.channels() as i32 {
            // SAFETY: channel data covers w*h contiguous floats.
            unsafe {
                let ptr = sys::ncnn_mat_get_channel_data(self.handle, c) as *mut f32;
                for i in 0..plane {
                    *ptr.add(i) *= factor;
                }
            }
        }
    }

    /// Min, max, and mean over every channel, for diagnostics.
    pub fn value_range(&self) -> (f32, f32, f32) {
        let plane = self.width() as usize * self.height() as usize;
        let mut min = f32::MAX;
        let mut max = f32::MIN;
        let mut sum = 0.0f64;
        for c in 0..self.channels() as i32 {
            // SAFETY: channel data covers w*h contiguous floats.
            unsafe {
                let ptr = sys::ncnn_mat_get_channel_data(self.handle, c) as *const f32;
                for i in 0..plane {
                    let v = *ptr.add(i);
                    min = min.min(v);
                    max = max.max(v);
                    sum += v as f64;
                }
            }
        }
        let total = plane * self.channels() as usize;
        (min, max, (sum / total.max(1) as f64) as f32)
    }

    /// Unpack the tensor into interleaved RGB bytes with saturation.
    pub fn to_pixels_rgb(&self, out: &mut [u8]) -> Result<()> {
        let expected = self.width() as usize * self.height() as usize * 3;
        if out.len() != expected {
            return Err(UpscaleError::Inference(format!(
                "output buffer size mismatch: needs {expected} bytes, got {}",
                out.len()
            )));
        }
        // SAFETY: out covers w*h*3 bytes and stride matches the row size.
        unsafe {
            sys::ncnn_mat_to_pixels(
                self.handle,
                out.as_mut_ptr(),
                sys::NCNN_MAT_PIXEL_RGB,
                self.width() as i32 * 3,
            )
        }
        Ok(())
    }

    fn raw(&self) -> sys::ncnn_mat_t {
        self.handle
    }
}

impl Drop for Mat {
    fn drop(&mut self) {
        // SAFETY: handle is a live mat owned by this wrapper.
        unsafe { sys::ncnn_mat_destroy(self.handle) };
    }
}

// ─── Net + extractor ────────────────────────────────────────────────────

/// A loaded network.
pub struct Net {
    handle: sys::ncnn_net_t,
    options: RuntimeOptions,
}

// SAFETY: the net handle has no thread affinity; the owning engine is moved
// between threads but never shared.
unsafe impl Send for Net {}

impl Net {
    pub fn new() -> Self {
        // SAFETY: creation has no preconditions.
        let handle = unsafe { sys::ncnn_net_create() };
        Self {
            handle,
            options: RuntimeOptions::default(),
        }
    }

    /// The option record last applied to this net.
    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    /// Push the option record to the runtime, binding the CPU allocators
    /// when provided.  Knobs the C API does not expose are kept in the
    /// record for observability only.
    pub fn apply_options(
        &mut self,
        options: &RuntimeOptions,
        cpu_allocators: Option<(&PoolAllocator, &PoolAllocator)>,
    ) {
        self.options = *options;
        // SAFETY: opt is created, configured, copied into the net, and
        // destroyed within this scope; allocator handles outlive the net by
        // the engine's cleanup ordering.
        unsafe {
            let opt = sys::ncnn_option_create();
            sys::ncnn_option_set_num_threads(opt, options.num_threads);
            sys::ncnn_option_set_use_vulkan_compute(opt, options.use_vulkan_compute as i32);
            sys::ncnn_option_set_use_local_pool_allocator(
                opt,
                options.use_local_pool_allocator as i32,
            );
            if let Some((blob, workspace)) = cpu_allocators {
                sys::ncnn_option_set_blob_allocator(opt, blob.raw());
                sys::ncnn_option_set_workspace_allocator(opt, workspace.raw());
            }
            sys::ncnn_net_set_option(self.handle, opt);
            sys::ncnn_option_destroy(opt);
        }
    }

    /// Bind the net to a Vulkan device.
    pub fn set_vulkan_device(&mut self, device: &VulkanDevice) {
        crate::instance::mark_gpu_used();
        // SAFETY: device index was validated by VulkanDevice::get.
        unsafe { sys::ncnn_net_set_vulkan_device(self.handle, device.device_id()) };
    }

    /// Record the Vulkan allocator bindings.  The runtime pools device
    /// memory internally; the engine keeps ownership for release ordering.
    pub fn bind_vulkan_allocators(&mut self, blob: &VkAllocator, staging: &VkAllocator) {
        debug!(device = blob.device_id, ?blob.kind, ?staging.kind, "bound vulkan allocators");
    }

    pub fn load_param(&mut self, path: &Path) -> Result<()> {
        let cpath = CString::new(path.to_string_lossy().as_bytes())
            .map_err(|_| UpscaleError::ModelMissing(format!("bad path: {}", path.display())))?;
        // SAFETY: cpath is a valid NUL-terminated path string.
        let ret = unsafe { sys::ncnn_net_load_param(self.handle, cpath.as_ptr()) };
        if ret != 0 {
            return Err(UpscaleError::ModelMissing(format!(
                "failed to load network definition {} (ret {ret})",
                path.display()
            )));
        }
        Ok(())
    }

    pub fn load_model(&mut self, path: &Path) -> Result<()> {
        let cpath = CString::new(path.to_string_lossy().as_bytes())
            .map_err(|_| UpscaleError::ModelMissing(format!("bad path: {}", path.display())))?;
        // SAFETY: cpath is a valid NUL-terminated path string.
        let ret = unsafe { sys::ncnn_net_load_model(self.handle, cpath.as_ptr()) };
        if ret != 0 {
            return Err(UpscaleError::ModelMissing(format!(
                "failed to load network weights {} (ret {ret})",
                path.display()
            )));
        }
        Ok(())
    }

    /// Release the loaded layers and weights.
    pub fn clear(&mut self) {
        // SAFETY: handle is a live net; clear is valid on an empty net too.
        unsafe { sys::ncnn_net_clear(self.handle) };
    }

    pub fn extractor(&mut self) -> Extractor<'_> {
        // SAFETY: the extractor borrows the net and cannot outlive it.
        let handle = unsafe { sys::ncnn_extractor_create(self.handle) };
        Extractor {
            handle,
            _net: std::marker::PhantomData,
        }
    }
}

impl Default for Net {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Net {
    fn drop(&mut self) {
        // SAFETY: handle is a live net owned by this wrapper.
        unsafe { sys::ncnn_net_destroy(self.handle) };
    }
}

/// One forward pass over a [`Net`].
pub struct Extractor<'net> {
    handle: sys::ncnn_extractor_t,
    _net: std::marker::PhantomData<&'net mut Net>,
}

impl Extractor<'_> {
    /// Bind the input blob by name.  A non-zero return means the blob name
    /// does not exist in the loaded graph.
    pub fn input(&mut self, name: &str, mat: &Mat) -> Result<()> {
        let cname = CString::new(name)
            .map_err(|_| UpscaleError::Inference(format!("bad blob name: {name}")))?;
        // SAFETY: extractor and mat are live; name is NUL-terminated.
        let ret = unsafe { sys::ncnn_extractor_input(self.handle, cname.as_ptr(), mat.raw()) };
        if ret != 0 {
            return Err(UpscaleError::Inference(format!(
                "input blob '{name}' rejected (ret {ret})"
            )));
        }
        Ok(())
    }

    /// Run the forward pass up to the named output blob.
    pub fn extract(&mut self, name: &str) -> Result<Mat> {
        let cname = CString::new(name)
            .map_err(|_| UpscaleError::Inference(format!("bad blob name: {name}")))?;
        let mut out: sys::ncnn_mat_t = std::ptr::null_mut();
        // SAFETY: out receives a mat handle owned by the caller on success.
        let ret = unsafe { sys::ncnn_extractor_extract(self.handle, cname.as_ptr(), &mut out) };
        if ret != 0 || out.is_null() {
            warn!(blob = name, ret, "extract failed");
            return Err(UpscaleError::Inference(format!(
                "extract of blob '{name}' failed (ret {ret})"
            )));
        }
        Ok(Mat { handle: out })
    }
}

impl Drop for Extractor<'_> {
    fn drop(&mut self) {
        // SAFETY: handle is a live extractor owned by this wrapper.
        unsafe { sys::ncnn_extractor_destroy(self.handle) };
    }
}
