//! Typed error hierarchy for the upscaling worker.
//!
//! Uses `thiserror` for library-grade errors.  Application code should wrap
//! these in `anyhow::Result` at call sites.
//!
//! Each variant maps to a stable integer code via [`UpscaleError::error_code`]
//! for structured telemetry without string parsing.

/// All errors originating from the surge worker crates.
#[derive(Debug, thiserror::Error)]
pub enum UpscaleError {
    // ── Codecs ────────────────────────────────────────────────────────
    #[error("image decode error: {0}")]
    Decode(String),

    #[error("image encode error: {0}")]
    Encode(String),

    #[error("unsupported output format: {0}")]
    FormatUnsupported(String),

    // ── Model / inference ────────────────────────────────────────────
    #[error("model missing: {0}")]
    ModelMissing(String),

    #[error("inference failure: {0}")]
    Inference(String),

    // ── Wire protocols ───────────────────────────────────────────────
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("request validation error: {0}")]
    Validation(String),

    #[error("engine error: {0}")]
    EngineFailure(String),

    // ── Pipeline / streams ───────────────────────────────────────────
    #[error("pipeline error: {0}")]
    Pipeline(String),

    #[error("queue closed")]
    QueueClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UpscaleError {
    /// Stable integer error code for structured telemetry.
    ///
    /// Codes are grouped by category:
    /// - 1xx: image codecs
    /// - 2xx: model / inference
    /// - 3xx: wire protocols
    /// - 4xx: pipeline / streams
    pub fn error_code(&self) -> u32 {
        match self {
            Self::Decode(_) => 100,
            Self::Encode(_) => 101,
            Self::FormatUnsupported(_) => 102,
            Self::ModelMissing(_) => 200,
            Self::Inference(_) => 201,
            Self::InvalidFrame(_) => 300,
            Self::Validation(_) => 301,
            Self::EngineFailure(_) => 302,
            Self::Pipeline(_) => 400,
            Self::QueueClosed => 401,
            Self::Io(_) => 402,
        }
    }

}

/// Convenience alias used throughout the worker crates.
pub type Result<T> = std::result::Result<T, UpscaleError>;
