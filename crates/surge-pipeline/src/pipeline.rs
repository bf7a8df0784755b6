//! Streaming batch pipeline — reader → worker → writer.
//!
//! ```text
//! stdin ──► Reader ──q(4)──► Worker (engine) ──q(4)──► Writer ──► stdout
//! ```
//!
//! Three OS threads share two bounded queues.  Backpressure comes from the
//! blocking `push`: a slow stage stalls its upstream instead of buffering
//! the whole batch.  There is exactly one worker and both queues are FIFO,
//! so outputs leave in reader order with no reordering step.
//!
//! Per-image failures are counted and skipped; the batch continues.  Stream
//! I/O failures set the shared error flag, which decides the exit status at
//! join time.  The worker owns the engine for the duration of the batch and
//! calls `cleanup()` exactly once when the input queue drains.

use std::io::{Read, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::{error, info};

use surge_core::error::{Result, UpscaleError};
use surge_core::{OutputFormat, UpscaleEngine};

use crate::queue::BoundedQueue;

/// Capacity of both pipeline queues.  Four compressed images per queue
/// keeps all three stages busy without holding a whole batch in memory.
pub const QUEUE_CAPACITY: usize = 4;

/// Hard per-image size limit shared with the wire protocols.
pub const MAX_IMAGE_SIZE_BYTES: u32 = 50 * 1024 * 1024;

/// Batch header bound.
pub const MAX_BATCH_IMAGES: u32 = 1000;

/// One compressed image travelling through the pipeline.
struct PipelineItem {
    /// 0-based ordinal within the batch.
    id: u32,
    data: Vec<u8>,
}

// ─── Metrics ────────────────────────────────────────────────────────────

/// Atomic counters shared by the three pipeline threads.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub processed: AtomicU32,
    pub errors: AtomicU32,
    pub input_bytes: AtomicU64,
    pub output_bytes: AtomicU64,
    pub total_ns: AtomicU64,
}

/// Final pipeline counters, reported to the caller after join.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineReport {
    pub processed: u32,
    pub errors: u32,
    pub input_bytes: u64,
    pub output_bytes: u64,
}

impl PipelineMetrics {
    fn report(&self) -> PipelineReport {
        PipelineReport {
            processed: self.processed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            input_bytes: self.input_bytes.load(Ordering::Relaxed),
            output_bytes: self.output_bytes.load(Ordering::Relaxed),
        }
    }

    fn log_summary(&self) {
        let report = self.report();
        if report.processed == 0 && report.errors == 0 {
            return;
        }
        let total_ns = self.total_ns.load(Ordering::Relaxed);
        let avg_ms = if report.processed > 0 {
            total_ns as f64 / report.processed as f64 / 1e6
        } else {
            0.0
        };
        info!(
            processed = report.processed,
            errors = report.errors,
            avg_latency_ms = format!("{avg_ms:.2}"),
            input_mb = format!("{:.2}", report.input_bytes as f64 / (1024.0 * 1024.0)),
            output_mb = format!("{:.2}", report.output_bytes as f64 / (1024.0 * 1024.0)),
            "batch pipeline summary"
        );
    }
}

// ─── Stage functions ────────────────────────────────────────────────────

fn reader_stage<R: Read>(
    input: &mut R,
    num_images: u32,
    input_q: &BoundedQueue<PipelineItem>,
    error_flag: &AtomicBool,
) {
    info!(num_images, "reader started");
    for id in 0..num_images {
        let size = match input.read_u32::<LittleEndian>() {
            Ok(size) => size,
            Err(err) => {
                error!(image = id, %err, "reader: failed to read image size");
                error_flag.store(true, Ordering::Release);
                input_q.close();
                return;
            }
        };
        if size == 0 || size > MAX_IMAGE_SIZE_BYTES {
            error!(image = id, size, "reader: invalid image size");
            error_flag.store(true, Ordering::Release);
            input_q.close();
            return;
        }

        let mut data = vec![0u8; size as usize];
        if let Err(err) = input.read_exact(&mut data) {
            error!(image = id, %err, "reader: failed to read image payload");
            error_flag.store(true, Ordering::Release);
            input_q.close();
            return;
        }

        // Blocks while the queue is full — backpressure on stdin.
        if input_q.push(PipelineItem { id, data }).is_err() {
            return;
        }
        info!(
            image = id + 1,
            of = num_images,
            bytes = size,
            queued = input_q.len(),
            "reader: image queued"
        );
    }
    info!("reader finished, closing input queue");
    input_q.close();
}

fn worker_stage<E: UpscaleEngine + ?Sized>(
    engine: &mut E,
    format: OutputFormat,
    log_memory: bool,
    input_q: &BoundedQueue<PipelineItem>,
    output_q: &BoundedQueue<PipelineItem>,
    error_flag: &AtomicBool,
    metrics: &PipelineMetrics,
) {
    info!("worker started");
    let mut processed_count = 0u32;

    while let Some(item) = input_q.pop() {
        let id = item.id;
        let input_len = item.data.len() as u64;
        if log_memory {
            if let Some((rss_kb, hwm_kb)) = memory_sample() {
                info!(image = id, rss_kb, hwm_kb, "worker: mem before image");
            }
        }

        let start = Instant::now();
        // Panics inside the engine path must not take down the batch; they
        // are converted to a per-image failure at this boundary.
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            engine.process_single(&item.data, format)
        }))
        .unwrap_or_else(|panic| {
            Err(UpscaleError::Pipeline(format!(
                "engine panicked: {}",
                panic_message(&panic)
            )))
        });

        let output = match outcome {
            Ok(output) => output,
            Err(err) => {
                error!(image = id, %err, "worker: image failed");
                metrics.errors.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };

        metrics
            .total_ns
            .fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
        metrics.processed.fetch_add(1, Ordering::Relaxed);
        metrics.input_bytes.fetch_add(input_len, Ordering::Relaxed);
        metrics
            .output_bytes
            .fetch_add(output.len() as u64, Ordering::Relaxed);

        if log_memory {
            if let Some((rss_kb, hwm_kb)) = memory_sample() {
                info!(image = id, rss_kb, hwm_kb, "worker: mem after image");
            }
        }

        // Input buffer is dropped before the output is queued, keeping the
        // peak footprint to one image per stage.
        drop(item);

        if output_q.push(PipelineItem { id, data: output }).is_err() {
            error_flag.store(true, Ordering::Release);
            input_q.close();
            break;
        }
        processed_count += 1;
        info!(image = id, total = processed_count, "worker: image queued for writing");
    }

    info!(processed = processed_count, "worker finished");
    // Cleanup happens here, once, after the last inference of the batch —
    // mid-batch cleanup would destroy the loaded network.
    engine.cleanup();
    output_q.close();
}

fn writer_stage<W: Write>(
    output: &mut W,
    output_q: &BoundedQueue<PipelineItem>,
    error_flag: &AtomicBool,
) {
    info!("writer started");
    let mut written_count = 0u32;

    while let Some(item) = output_q.pop() {
        let write_result = output
            .write_u32::<LittleEndian>(item.data.len() as u32)
            .and_then(|()| output.write_all(&item.data))
            .and_then(|()| output.flush());
        if let Err(err) = write_result {
            error!(image = item.id, %err, "writer: stdout write failed");
            error_flag.store(true, Ordering::Release);
            output_q.close();
            return;
        }
        written_count += 1;
        info!(
            image = item.id,
            total = written_count,
            bytes = item.data.len(),
            "writer: image written"
        );
    }
    info!(written = written_count, "writer finished");
}

// ─── Entry point ────────────────────────────────────────────────────────

/// Run the streaming batch exchange over the given streams.
///
/// Request: `u32` image count (1..=1000), then per image `u32` size +
/// payload.  Response: the echoed count, then one `u32` size + payload per
/// successfully processed image, in request order.
pub fn run_streaming_batch<E, R, W>(
    engine: &mut E,
    format: OutputFormat,
    profiling: bool,
    input: &mut R,
    output: &mut W,
) -> Result<PipelineReport>
where
    E: UpscaleEngine + ?Sized,
    R: Read + Send,
    W: Write + Send,
{
    let num_images = input
        .read_u32::<LittleEndian>()
        .map_err(|err| UpscaleError::Pipeline(format!("failed to read batch header: {err}")))?;
    if num_images == 0 || num_images > MAX_BATCH_IMAGES {
        return Err(UpscaleError::Validation(format!(
            "invalid num_images: {num_images}"
        )));
    }

    info!(num_images, "streaming batch started");

    // The count is echoed before processing begins; the consumer learns the
    // batch size immediately and reads results as they stream out.
    output.write_u32::<LittleEndian>(num_images)?;
    output.flush()?;

    let input_q = BoundedQueue::new(QUEUE_CAPACITY);
    let output_q = BoundedQueue::new(QUEUE_CAPACITY);
    let error_flag = AtomicBool::new(false);
    let metrics = PipelineMetrics::default();

    std::thread::scope(|scope| {
        let input_q = &input_q;
        let output_q = &output_q;
        let error_flag = &error_flag;
        let metrics = &metrics;

        scope.spawn(move || reader_stage(input, num_images, input_q, error_flag));
        scope.spawn(move || {
            worker_stage(
                engine,
                format,
                profiling,
                input_q,
                output_q,
                error_flag,
                metrics,
            )
        });
        scope.spawn(move || writer_stage(output, output_q, error_flag));
    });

    metrics.log_summary();

    if error_flag.load(Ordering::Acquire) {
        return Err(UpscaleError::Pipeline(
            "batch failed: error in one or more pipeline threads".into(),
        ));
    }
    info!("streaming batch completed");
    Ok(metrics.report())
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// VmRSS / VmHWM in KiB from /proc, for profiling runs.
#[cfg(target_os = "linux")]
fn memory_sample() -> Option<(u64, u64)> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let field = |name: &str| {
        status
            .lines()
            .find(|line| line.starts_with(name))?
            .split_whitespace()
            .nth(1)?
            .parse::<u64>()
            .ok()
    };
    Some((field("VmRSS:")?, field("VmHWM:")?))
}

#[cfg(not(target_os = "linux"))]
fn memory_sample() -> Option<(u64, u64)> {
    None
}

#[cfg(test)]
mod tests {
    use super::{run_streaming_batch, MAX_BATCH_IMAGES};
    use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
    use std::io::Cursor;
    use surge_core::{OutputFormat, Raster};
    use surge_engine::codec;
    use surge_engine::testing::NearestNeighbourEngine;

    fn png_square(side: u32, seed: u8) -> Vec<u8> {
        let data = (0..side * side * 3)
            .map(|i| seed.wrapping_add(i as u8))
            .collect();
        let raster = Raster::from_vec(side, side, data).unwrap();
        codec::encode(&raster, OutputFormat::Png).unwrap()
    }

    fn batch_request(images: &[Vec<u8>]) -> Vec<u8> {
        let mut request = Vec::new();
        request
            .write_u32::<LittleEndian>(images.len() as u32)
            .unwrap();
        for image in images {
            request.write_u32::<LittleEndian>(image.len() as u32).unwrap();
            request.extend_from_slice(image);
        }
        request
    }

    fn read_framed(cursor: &mut Cursor<&[u8]>) -> Option<Vec<u8>> {
        let size = cursor.read_u32::<LittleEndian>().ok()?;
        let mut data = vec![0u8; size as usize];
        std::io::Read::read_exact(cursor, &mut data).ok()?;
        Some(data)
    }

    #[test]
    fn three_images_stream_out_in_request_order() {
        let images = vec![png_square(16, 1), png_square(20, 2), png_square(24, 3)];
        let request = batch_request(&images);

        let mut engine = NearestNeighbourEngine::new(2);
        let mut input = Cursor::new(request.as_slice());
        let mut output = Vec::new();
        let report =
            run_streaming_batch(&mut engine, OutputFormat::Png, false, &mut input, &mut output)
                .unwrap();

        assert_eq!(report.processed, 3);
        assert_eq!(report.errors, 0);
        assert_eq!(engine.cleanup_calls(), 1);

        let out_slice: &[u8] = &output;
        let mut cursor = Cursor::new(out_slice);
        assert_eq!(cursor.read_u32::<LittleEndian>().unwrap(), 3);
        for expected_side in [32u32, 40, 48] {
            let blob = read_framed(&mut cursor).unwrap();
            let decoded = codec::decode(&blob).unwrap();
            assert_eq!(decoded.width(), expected_side);
            assert_eq!(decoded.height(), expected_side);
        }
        assert!(read_framed(&mut cursor).is_none());
    }

    #[test]
    fn failed_images_are_skipped_not_fatal() {
        let images = vec![png_square(16, 1), png_square(16, 2), png_square(16, 3)];
        let request = batch_request(&images);

        // One inference per small image on the direct path; everything after
        // the first fails.
        let mut engine = NearestNeighbourEngine::new(2).failing_after(1);
        let mut input = Cursor::new(request.as_slice());
        let mut output = Vec::new();
        let report =
            run_streaming_batch(&mut engine, OutputFormat::Png, false, &mut input, &mut output)
                .unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(report.errors, 2);
        assert_eq!(engine.cleanup_calls(), 1);

        let out_slice: &[u8] = &output;
        let mut cursor = Cursor::new(out_slice);
        // The echoed count still says three; only one blob follows.
        assert_eq!(cursor.read_u32::<LittleEndian>().unwrap(), 3);
        assert!(read_framed(&mut cursor).is_some());
        assert!(read_framed(&mut cursor).is_none());
    }

    #[test]
    fn truncated_stream_sets_the_error_flag() {
        let mut request = Vec::new();
        request.write_u32::<LittleEndian>(2).unwrap();
        request.write_u32::<LittleEndian>(100).unwrap();
        request.extend_from_slice(&[0u8; 10]); // payload cut short

        let mut engine = NearestNeighbourEngine::new(2);
        let mut input = Cursor::new(request.as_slice());
        let mut output = Vec::new();
        let result =
            run_streaming_batch(&mut engine, OutputFormat::Png, false, &mut input, &mut output);
        assert!(result.is_err());
        // The worker still shut the engine down on its way out.
        assert_eq!(engine.cleanup_calls(), 1);
    }

    #[test]
    fn header_bounds_are_enforced() {
        for bad_count in [0u32, MAX_BATCH_IMAGES + 1] {
            let mut request = Vec::new();
            request.write_u32::<LittleEndian>(bad_count).unwrap();
            let mut engine = NearestNeighbourEngine::new(2);
            let mut input = Cursor::new(request.as_slice());
            let mut output = Vec::new();
            let result = run_streaming_batch(
                &mut engine,
                OutputFormat::Png,
                false,
                &mut input,
                &mut output,
            );
            assert!(result.is_err());
            assert!(output.is_empty(), "no echo for a rejected header");
        }
    }
}
