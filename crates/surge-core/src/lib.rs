#![doc = include_str!("../README.md")]

pub mod config;
pub mod engine;
pub mod error;
pub mod raster;

pub use config::{EngineKind, EngineOptions, GpuSelector, OutputFormat};
pub use engine::{TilingConfig, UpscaleEngine};
pub use error::{Result, UpscaleError};
pub use raster::{Raster, RGB_CHANNELS};
