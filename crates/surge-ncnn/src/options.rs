//! Runtime option knobs shared by the real and stub wrappers.
//!
//! The engines mutate this plain record and push it to the network with
//! [`Net::apply_options`](crate::runtime::Net::apply_options) — keeping the
//! GPU/CPU profile logic observable and testable independently of the
//! runtime build mode.

/// Mirror of the ncnn option set the engines touch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuntimeOptions {
    pub use_vulkan_compute: bool,
    pub use_fp16_storage: bool,
    pub use_fp16_arithmetic: bool,
    pub use_fp16_packed: bool,
    /// Release intermediate tensors eagerly during the forward pass.
    pub lightmode: bool,
    pub use_winograd_convolution: bool,
    pub use_sgemm_convolution: bool,
    pub use_packing_layout: bool,
    pub use_cooperative_matrix: bool,
    pub use_local_pool_allocator: bool,
    pub num_threads: i32,
    /// OpenMP spin-wait time in milliseconds; 0 sleeps workers immediately.
    pub openmp_blocktime: i32,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            use_vulkan_compute: false,
            use_fp16_storage: false,
            use_fp16_arithmetic: false,
            use_fp16_packed: false,
            lightmode: false,
            use_winograd_convolution: true,
            use_sgemm_convolution: true,
            use_packing_layout: true,
            use_cooperative_matrix: true,
            use_local_pool_allocator: false,
            num_threads: 0,
            openmp_blocktime: 20,
        }
    }
}
