//! Engine configuration shared by the CLI, factory, and wire protocols.

use std::path::PathBuf;
use std::str::FromStr;

use crate::error::UpscaleError;

/// Which super-resolution family the engine runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineKind {
    /// RealCUGAN — fixed 2x scale, noise level baked into the model pair.
    RealCugan,
    /// RealESRGAN — 2x/3x/4x scale, animevideov3 or explicitly named models.
    RealEsrgan,
}

impl EngineKind {
    /// Wire encoding used by protocol v2 (0 = RealCUGAN, 1 = RealESRGAN).
    pub fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::RealCugan),
            1 => Some(Self::RealEsrgan),
            _ => None,
        }
    }
}

/// Compressed output format for processed images.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Webp,
    Png,
    Jpeg,
}

impl FromStr for OutputFormat {
    type Err = UpscaleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "webp" => Ok(Self::Webp),
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            other => Err(UpscaleError::FormatUnsupported(other.to_string())),
        }
    }
}

/// GPU device selection.
///
/// Resolution rules: `auto` or an empty string selects device 0, a parseable
/// integer selects that device, anything unparseable falls back to device 0,
/// and any negative index forces CPU-only mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GpuSelector {
    Auto,
    Index(i32),
}

impl GpuSelector {
    /// Resolve to a Vulkan device index, or `None` for CPU-only mode.
    pub fn resolve(self) -> Option<i32> {
        match self {
            Self::Auto => Some(0),
            Self::Index(i) if i >= 0 => Some(i),
            Self::Index(_) => None,
        }
    }

    pub fn parse(raw: &str) -> Self {
        if raw.is_empty() || raw.eq_ignore_ascii_case("auto") {
            return Self::Auto;
        }
        match raw.parse::<i32>() {
            Ok(i) => Self::Index(i),
            Err(_) => Self::Auto,
        }
    }
}

impl Default for GpuSelector {
    fn default() -> Self {
        Self::Auto
    }
}

/// Everything an engine needs to initialise: model location, device, scale
/// and quality knobs, and output preferences.
#[derive(Clone, Debug)]
pub struct EngineOptions {
    pub kind: EngineKind,
    /// Upscale factor, 2/3/4 for RealESRGAN; RealCUGAN is always 2.
    pub scale: u32,
    /// RealCUGAN noise level in -1..=3; -1 defers to `quality`.
    pub noise: i32,
    /// Single-letter quality flag F/E/Q/H consulted when `noise` is negative.
    pub quality: String,
    /// Directory holding `<name>.param` / `<name>.bin` model pairs.
    pub model_root: PathBuf,
    /// Explicit RealESRGAN model base name; empty selects by scale.
    pub model_name: Option<String>,
    pub gpu: GpuSelector,
    /// Tile size override; 0 keeps the engine default.
    pub tile_size: u32,
    pub format: OutputFormat,
    pub max_batch_items: u32,
    /// Streaming batch pipeline trigger; 0 disables.
    pub batch_size: u32,
    pub keep_alive: bool,
    pub verbose: bool,
    pub profiling: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            kind: EngineKind::RealCugan,
            scale: 2,
            noise: -1,
            quality: "E".to_string(),
            model_root: PathBuf::from("backend/models/realcugan/models-se"),
            model_name: None,
            gpu: GpuSelector::Auto,
            tile_size: 0,
            format: OutputFormat::Webp,
            max_batch_items: 8,
            batch_size: 0,
            keep_alive: false,
            verbose: false,
            profiling: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{GpuSelector, OutputFormat};

    #[test]
    fn gpu_selector_resolution_rules() {
        assert_eq!(GpuSelector::parse("auto").resolve(), Some(0));
        assert_eq!(GpuSelector::parse("").resolve(), Some(0));
        assert_eq!(GpuSelector::parse("2").resolve(), Some(2));
        assert_eq!(GpuSelector::parse("-1").resolve(), None);
        assert_eq!(GpuSelector::parse("not-a-number").resolve(), Some(0));
    }

    #[test]
    fn output_format_parsing() {
        assert_eq!("webp".parse::<OutputFormat>().unwrap(), OutputFormat::Webp);
        assert_eq!("JPEG".parse::<OutputFormat>().unwrap(), OutputFormat::Jpeg);
        assert_eq!("jpg".parse::<OutputFormat>().unwrap(), OutputFormat::Jpeg);
        assert!("tiff".parse::<OutputFormat>().is_err());
    }
}
