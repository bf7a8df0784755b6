#![doc = include_str!("../README.md")]

pub mod codec;
mod context;
pub mod factory;
pub mod padding;
pub mod processor;
pub mod realcugan;
pub mod realesrgan;
pub mod tiling;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use factory::make_engine;
pub use realcugan::RealCuganEngine;
pub use realesrgan::RealEsrganEngine;
