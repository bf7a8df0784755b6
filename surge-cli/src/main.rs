//! surge CLI entrypoint.
//!
//! ```bash
//! surge --mode file --input page.png --output page_2x.webp
//! surge --mode stdin --batch-size 4 < batch.bin > results.bin
//! surge --mode stdin --keep-alive          # framed protocol v2 session
//! surge --engine realesrgan --scale 4 --mode file -i in.jpg -o out.png --format png
//! ```
//!
//! The worker builds one engine at startup (model load, GPU acquisition)
//! and reuses it for every image of the session; logs go to stderr so
//! stdout stays a clean data channel.

mod modes;

use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::error;

use surge_core::{EngineKind, EngineOptions, GpuSelector, OutputFormat};
use surge_engine::make_engine;

#[derive(Parser, Debug)]
#[command(
    name = "surge",
    version,
    about = "Streaming image super-resolution worker",
    after_help = "Examples:\n  surge --mode file --input in.png --output out.webp\n  surge --engine realesrgan --scale 4 --mode file -i in.jpg -o out.png --format png\n  surge --mode stdin --batch-size 4 < batch.bin > results.bin\n  surge --mode stdin --keep-alive"
)]
struct Cli {
    /// Upscaling engine.
    #[arg(long, value_enum, default_value_t = EngineArg::Realcugan)]
    engine: EngineArg,

    /// Processing mode.
    #[arg(long, value_enum, default_value_t = ModeArg::File)]
    mode: ModeArg,

    /// Input image path (file mode).
    #[arg(short = 'i', long)]
    input: Option<PathBuf>,

    /// Output image path (file mode).
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// GPU device id: auto, or an index; negative forces CPU-only.
    #[arg(long = "gpu-id", default_value = "auto", allow_hyphen_values = true)]
    gpu_id: String,

    /// Tile size override; 0 keeps the engine default.
    #[arg(long = "tile-size", default_value_t = 0)]
    tile_size: u32,

    /// Upscale factor (realesrgan: 2, 3, or 4).
    #[arg(long, default_value_t = 2)]
    scale: u32,

    /// Denoise level (realcugan: -1..=3); -1 defers to --quality.
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    noise: i32,

    /// Quality flag F/E/Q/H (realcugan).
    #[arg(long, default_value = "E")]
    quality: String,

    /// Model directory holding <name>.param / <name>.bin pairs.
    #[arg(long, default_value = "backend/models/realcugan/models-se")]
    model: PathBuf,

    /// Explicit model base name (realesrgan); selected by scale if absent.
    #[arg(long = "model-name")]
    model_name: Option<String>,

    /// Output image format.
    #[arg(long, value_enum, default_value_t = FormatArg::Webp)]
    format: FormatArg,

    /// Maximum images accepted per protocol request.
    #[arg(long = "max-batch-items", default_value_t = 8)]
    max_batch_items: u32,

    /// Enable the streaming batch pipeline in stdin mode (>0).
    #[arg(long = "batch-size", default_value_t = 0)]
    batch_size: u32,

    /// Keep the process alive for multiple requests.
    #[arg(long = "keep-alive", default_value_t = false)]
    keep_alive: bool,

    /// Emit per-image profiling metrics (memory samples, latencies).
    #[arg(long, default_value_t = false)]
    profiling: bool,

    /// Verbose logging (info level) on stderr.
    #[arg(long, default_value_t = false)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EngineArg {
    Realcugan,
    Realesrgan,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    File,
    Stdin,
    Batch,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatArg {
    Webp,
    Png,
    #[value(name = "jpg", alias = "jpeg")]
    Jpeg,
}

impl Cli {
    fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            kind: match self.engine {
                EngineArg::Realcugan => EngineKind::RealCugan,
                EngineArg::Realesrgan => EngineKind::RealEsrgan,
            },
            scale: self.scale,
            noise: self.noise,
            quality: self.quality.clone(),
            model_root: self.model.clone(),
            model_name: self.model_name.clone(),
            gpu: GpuSelector::parse(&self.gpu_id),
            tile_size: self.tile_size,
            format: match self.format {
                FormatArg::Webp => OutputFormat::Webp,
                FormatArg::Png => OutputFormat::Png,
                FormatArg::Jpeg => OutputFormat::Jpeg,
            },
            max_batch_items: self.max_batch_items,
            batch_size: self.batch_size,
            keep_alive: self.keep_alive,
            verbose: self.verbose,
            profiling: self.profiling,
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "info" } else { "warn" };
    let ansi_enabled = std::env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(ansi_enabled)
        .init();
}

fn main() {
    // Argument faults share exit code 1 with runtime failures; help and
    // version keep exit code 0.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() { 1 } else { 0 };
            let _ = err.print();
            std::process::exit(code);
        }
    };
    init_tracing(cli.verbose || cli.profiling);

    match run(&cli) {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            error!(error = %err, "command failed");
            std::process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let options = cli.engine_options();

    let mut engine = make_engine(&options).context("failed to initialize engine")?;

    let result = match cli.mode {
        ModeArg::File => modes::run_file_mode(
            engine.as_mut(),
            &options,
            cli.input.as_deref(),
            cli.output.as_deref(),
        ),
        ModeArg::Stdin => modes::run_stdin_mode(engine.as_mut(), &options),
        ModeArg::Batch => modes::run_batch_mode(engine.as_mut(), &options),
    };

    // The engine is torn down after the mode finishes, even on failure.
    // Cleanup is idempotent, so the streaming pipeline's own end-of-batch
    // cleanup is not repeated.  The runtime's GPU instance goes last.
    engine.cleanup();
    surge_ncnn::instance::destroy_gpu_instance_if_used();

    result
}
