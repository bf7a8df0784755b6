//! Mode runners: single file, stdin (blob / streaming batch / keep-alive
//! session), and legacy batch.

use std::io::{Read, Write};
use std::path::Path;

use anyhow::{bail, Context};
use tracing::info;

use surge_core::{EngineOptions, UpscaleEngine};

/// Process one file from disk to disk.
pub fn run_file_mode(
    engine: &mut dyn UpscaleEngine,
    options: &EngineOptions,
    input: Option<&Path>,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let (Some(input), Some(output)) = (input, output) else {
        bail!("file mode requires --input and --output");
    };
    info!(input = %input.display(), "running file mode");

    let input_data =
        std::fs::read(input).with_context(|| format!("failed to read {}", input.display()))?;
    if input_data.is_empty() {
        bail!("input file is empty: {}", input.display());
    }

    let output_data = engine.process_single(&input_data, options.format)?;

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(output, &output_data)
        .with_context(|| format!("failed to write {}", output.display()))?;

    info!(output = %output.display(), bytes = output_data.len(), "file mode completed");
    Ok(())
}

/// Dispatch stdin processing: the streaming batch pipeline when
/// `--batch-size` is set, the framed v2 session under `--keep-alive`,
/// otherwise one read-to-EOF blob with raw bytes out.
pub fn run_stdin_mode(
    engine: &mut dyn UpscaleEngine,
    options: &EngineOptions,
) -> anyhow::Result<()> {
    info!("running stdin mode");
    let mut stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    if options.batch_size > 0 {
        info!(batch_size = options.batch_size, "batch stdin mode enabled");
        surge_pipeline::run_streaming_batch(
            engine,
            options.format,
            options.profiling || options.verbose,
            &mut stdin,
            &mut stdout,
        )?;
        return Ok(());
    }

    if options.keep_alive {
        surge_protocol::run_session(engine, options, &mut stdin, &mut stdout)?;
        return Ok(());
    }

    // Single-blob mode: the caller must close stdin before processing can
    // start, and reads the raw output bytes until this process exits.
    let mut input = Vec::new();
    stdin
        .read_to_end(&mut input)
        .context("failed to read stdin")?;
    if input.is_empty() {
        return Ok(());
    }

    let output = engine
        .process_single(&input, options.format)
        .context("failed to process stdin payload")?;
    stdout.write_all(&output)?;
    stdout.flush()?;
    Ok(())
}

/// Legacy batch exchange with per-image status bytes.
pub fn run_batch_mode(
    engine: &mut dyn UpscaleEngine,
    options: &EngineOptions,
) -> anyhow::Result<()> {
    info!("running batch mode");
    let mut stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    surge_protocol::run_legacy_batch(engine, options, &mut stdin, &mut stdout)?;
    Ok(())
}
