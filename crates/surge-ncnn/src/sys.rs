//! Raw FFI declarations for the ncnn C API (`c_api.h`).
//!
//! Only the surface the engines need is bound: option/net/extractor/mat
//! lifecycle, pixel conversion, pool allocators, and the Vulkan entry
//! points.  Handles are opaque pointers owned by the runtime.

#![allow(missing_docs)]
#![allow(non_camel_case_types)]

use std::os::raw::{c_char, c_int, c_uchar, c_void};

pub type ncnn_allocator_t = *mut c_void;
pub type ncnn_option_t = *mut c_void;
pub type ncnn_mat_t = *mut c_void;
pub type ncnn_net_t = *mut c_void;
pub type ncnn_extractor_t = *mut c_void;

/// Interleaved RGB pixel type for `ncnn_mat_from_pixels` / `to_pixels`.
pub const NCNN_MAT_PIXEL_RGB: c_int = 1;

unsafe extern "C" {
    // ── Allocators ───────────────────────────────────────────────────
    pub fn ncnn_allocator_create_pool_allocator() -> ncnn_allocator_t;
    pub fn ncnn_allocator_destroy(allocator: ncnn_allocator_t);

    // ── Options ──────────────────────────────────────────────────────
    pub fn ncnn_option_create() -> ncnn_option_t;
    pub fn ncnn_option_destroy(opt: ncnn_option_t);
    pub fn ncnn_option_set_num_threads(opt: ncnn_option_t, num_threads: c_int);
    pub fn ncnn_option_set_use_vulkan_compute(opt: ncnn_option_t, use_vulkan_compute: c_int);
    pub fn ncnn_option_set_use_local_pool_allocator(opt: ncnn_option_t, enable: c_int);
    pub fn ncnn_option_set_blob_allocator(opt: ncnn_option_t, allocator: ncnn_allocator_t);
    pub fn ncnn_option_set_workspace_allocator(opt: ncnn_option_t, allocator: ncnn_allocator_t);

    // ── Mat ──────────────────────────────────────────────────────────
    pub fn ncnn_mat_from_pixels(
        pixels: *const c_uchar,
        pixel_type: c_int,
        w: c_int,
        h: c_int,
        stride: c_int,
        allocator: ncnn_allocator_t,
    ) -> ncnn_mat_t;
    pub fn ncnn_mat_to_pixels(
        mat: ncnn_mat_t,
        pixels: *mut c_uchar,
        pixel_type: c_int,
        stride: c_int,
    );
    pub fn ncnn_mat_substract_mean_normalize(
        mat: ncnn_mat_t,
        mean_vals: *const f32,
        norm_vals: *const f32,
    );
    pub fn ncnn_mat_destroy(mat: ncnn_mat_t);
    pub fn ncnn_mat_get_w(mat: ncnn_mat_t) -> c_int;
    pub fn ncnn_mat_get_h(mat: ncnn_mat_t) -> c_int;
    pub fn ncnn_mat_get_c(mat: ncnn_mat_t) -> c_int;
    pub fn ncnn_mat_get_channel_data(mat: ncnn_mat_t, c: c_int) -> *mut c_void;

    // ── Net ──────────────────────────────────────────────────────────
    pub fn ncnn_net_create() -> ncnn_net_t;
    pub fn ncnn_net_destroy(net: ncnn_net_t);
    pub fn ncnn_net_set_option(net: ncnn_net_t, opt: ncnn_option_t);
    pub fn ncnn_net_set_vulkan_device(net: ncnn_net_t, device_index: c_int);
    pub fn ncnn_net_load_param(net: ncnn_net_t, path: *const c_char) -> c_int;
    pub fn ncnn_net_load_model(net: ncnn_net_t, path: *const c_char) -> c_int;
    pub fn ncnn_net_clear(net: ncnn_net_t);

    // ── Extractor ────────────────────────────────────────────────────
    pub fn ncnn_extractor_create(net: ncnn_net_t) -> ncnn_extractor_t;
    pub fn ncnn_extractor_destroy(ex: ncnn_extractor_t);
    pub fn ncnn_extractor_input(
        ex: ncnn_extractor_t,
        name: *const c_char,
        mat: ncnn_mat_t,
    ) -> c_int;
    pub fn ncnn_extractor_extract(
        ex: ncnn_extractor_t,
        name: *const c_char,
        mat: *mut ncnn_mat_t,
    ) -> c_int;

    // ── Vulkan ───────────────────────────────────────────────────────
    pub fn ncnn_get_gpu_count() -> c_int;
    pub fn ncnn_destroy_gpu_instance();
}
