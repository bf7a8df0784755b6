#![doc = include_str!("../README.md")]
//!
//! # Stub mode
//!
//! When the `surge_ncnn_stub` cfg is active (set by `build.rs` when libncnn
//! is not found), the `runtime` module is replaced with a stub: networks
//! load (model files are still required to exist), tensor conversion runs in
//! pure Rust, but the extractor fails every inference with
//! [`UpscaleError::Inference`](surge_core::UpscaleError::Inference).  This
//! lets the workspace build and the engine state machinery run under test on
//! hosts without the runtime installed.

pub mod instance;
pub mod options;

#[cfg(surge_ncnn_stub)]
#[path = "runtime_stub.rs"]
pub mod runtime;
#[cfg(not(surge_ncnn_stub))]
pub mod runtime;

#[cfg(not(surge_ncnn_stub))]
pub mod sys;

pub use options::RuntimeOptions;
pub use runtime::{
    gpu_count, gpu_info, Extractor, GpuInfo, Mat, Net, PoolAllocator, VkAllocator, VulkanDevice,
};

/// Vendor id reported by integrated Intel GPUs.
pub const VENDOR_INTEL: u32 = 0x8086;

/// Device type reported for integrated GPUs.
pub const DEVICE_TYPE_INTEGRATED: u32 = 1;

impl GpuInfo {
    /// Whether the iGPU reduced-feature profile should apply to this device.
    pub fn is_integrated(&self) -> bool {
        self.device_type == DEVICE_TYPE_INTEGRATED || self.vendor_id == VENDOR_INTEL
    }
}
