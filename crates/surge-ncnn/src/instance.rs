//! Process-wide GPU instance bracket.
//!
//! The runtime creates its Vulkan instance lazily on first device use and
//! leaks it unless explicitly destroyed.  The worker is spawned in a loop by
//! a parent application, so the instance is torn down once at process exit
//! — and only if it was ever created.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

static GPU_INSTANCE_USED: AtomicBool = AtomicBool::new(false);

/// Record that a Vulkan device was acquired and the global instance exists.
pub fn mark_gpu_used() {
    GPU_INSTANCE_USED.store(true, Ordering::Release);
}

/// Whether any Vulkan device was acquired during this process lifetime.
pub fn gpu_used() -> bool {
    GPU_INSTANCE_USED.load(Ordering::Acquire)
}

/// Destroy the runtime's global Vulkan instance if it was ever created.
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn destroy_gpu_instance_if_used() {
    if GPU_INSTANCE_USED.swap(false, Ordering::AcqRel) {
        info!("destroying runtime GPU instance");
        crate::runtime::destroy_gpu_instance();
    }
}
