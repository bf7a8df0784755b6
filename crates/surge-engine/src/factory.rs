//! Engine factory — one engine per process, selected by configuration.

use surge_core::error::Result;
use surge_core::{EngineKind, EngineOptions, UpscaleEngine};

use crate::realcugan::RealCuganEngine;
use crate::realesrgan::RealEsrganEngine;

/// Build and initialise the configured engine.  The model is loaded here,
/// once, so the cost is amortised over the whole session.
pub fn make_engine(options: &EngineOptions) -> Result<Box<dyn UpscaleEngine>> {
    match options.kind {
        EngineKind::RealEsrgan => Ok(Box::new(RealEsrganEngine::init(options)?)),
        EngineKind::RealCugan => Ok(Box::new(RealCuganEngine::init(options)?)),
    }
}
