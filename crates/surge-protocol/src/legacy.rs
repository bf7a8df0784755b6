//! Legacy batch format.
//!
//! Request: magic `0x42445250`, `u32` version, `u32` num_images, `u32`
//! reserved, then per image `u32` size + payload.  The response header
//! echoes magic/version/num_images with reserved zeroed, and every image —
//! including ones skipped over the `--max-batch-items` bound — is answered
//! with `u32` status (0 ok, 1 fail) + `u32` size + payload.
//!
//! The echoed count intentionally repeats the request's `num_images` even
//! when fewer images were processed; consumers pair responses positionally
//! and read the status byte.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::{error, info, warn};

use surge_core::error::{Result, UpscaleError};
use surge_core::{EngineOptions, UpscaleEngine};

pub const BATCH_MAGIC: u32 = 0x4244_5250;
pub const MAX_IMAGE_SIZE_BYTES: u32 = 50 * 1024 * 1024;

/// Run the legacy batch exchange.  The loop repeats while `--keep-alive`
/// is set and the input stream has more batches.
pub fn run_legacy_batch<E, R, W>(
    engine: &mut E,
    options: &EngineOptions,
    input: &mut R,
    output: &mut W,
) -> Result<()>
where
    E: UpscaleEngine + ?Sized,
    R: Read,
    W: Write,
{
    info!("legacy batch mode started");
    let max_items = options.max_batch_items.max(1);

    loop {
        // EOF before a new header ends the session cleanly.
        let Ok(magic) = input.read_u32::<LittleEndian>() else {
            break;
        };
        let header = (
            input.read_u32::<LittleEndian>(),
            input.read_u32::<LittleEndian>(),
            input.read_u32::<LittleEndian>(),
        );
        let (Ok(version), Ok(num_images), Ok(_reserved)) = header else {
            error!("invalid batch header");
            return Err(UpscaleError::InvalidFrame("invalid batch header".into()));
        };

        if magic != BATCH_MAGIC {
            error!(magic, "invalid batch magic");
            return Err(UpscaleError::InvalidFrame("invalid batch magic".into()));
        }

        let to_process = num_images.min(max_items);
        info!(to_process, num_images, "processing batch");

        output.write_u32::<LittleEndian>(BATCH_MAGIC)?;
        output.write_u32::<LittleEndian>(version)?;
        output.write_u32::<LittleEndian>(num_images)?;
        output.write_u32::<LittleEndian>(0)?;

        for index in 0..num_images {
            let input_size = input.read_u32::<LittleEndian>().map_err(|err| {
                UpscaleError::InvalidFrame(format!("failed to read batch image size: {err}"))
            })?;
            if input_size > MAX_IMAGE_SIZE_BYTES {
                error!(index, input_size, "batch image too large");
                return Err(UpscaleError::InvalidFrame(format!(
                    "batch image size too large: {input_size}"
                )));
            }
            let mut data = vec![0u8; input_size as usize];
            input.read_exact(&mut data).map_err(|err| {
                UpscaleError::InvalidFrame(format!("failed to read batch image data: {err}"))
            })?;

            let mut output_data = Vec::new();
            let mut status = 1u32;
            if index < to_process && input_size > 0 {
                match engine.process_single(&data, options.format) {
                    Ok(processed) => {
                        status = 0;
                        output_data = processed;
                    }
                    Err(err) => warn!(index, %err, "batch: failed to process image"),
                }
            } else {
                warn!(index, max_items, "batch: skipping image beyond max-batch-items");
            }

            output.write_u32::<LittleEndian>(status)?;
            output.write_u32::<LittleEndian>(output_data.len() as u32)?;
            output.write_all(&output_data)?;
        }

        output.flush()?;

        if !options.keep_alive {
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{run_legacy_batch, BATCH_MAGIC};
    use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
    use std::io::{Cursor, Read};
    use surge_core::{EngineOptions, OutputFormat, Raster};
    use surge_engine::codec;
    use surge_engine::testing::NearestNeighbourEngine;

    fn small_jpeg() -> Vec<u8> {
        let raster = Raster::from_vec(64, 64, vec![200; 64 * 64 * 3]).unwrap();
        codec::encode(&raster, OutputFormat::Jpeg).unwrap()
    }

    fn batch(version: u32, images: &[Vec<u8>]) -> Vec<u8> {
        let mut request = Vec::new();
        request.write_u32::<LittleEndian>(BATCH_MAGIC).unwrap();
        request.write_u32::<LittleEndian>(version).unwrap();
        request
            .write_u32::<LittleEndian>(images.len() as u32)
            .unwrap();
        request.write_u32::<LittleEndian>(0).unwrap();
        for image in images {
            request
                .write_u32::<LittleEndian>(image.len() as u32)
                .unwrap();
            request.extend_from_slice(image);
        }
        request
    }

    fn options() -> EngineOptions {
        EngineOptions {
            format: OutputFormat::Jpeg,
            ..EngineOptions::default()
        }
    }

    struct ImageResponse {
        status: u32,
        data: Vec<u8>,
    }

    fn parse_response(cursor: &mut Cursor<&[u8]>) -> Option<(u32, u32, Vec<ImageResponse>)> {
        let magic = cursor.read_u32::<LittleEndian>().ok()?;
        assert_eq!(magic, BATCH_MAGIC);
        let version = cursor.read_u32::<LittleEndian>().ok()?;
        let num_images = cursor.read_u32::<LittleEndian>().ok()?;
        let reserved = cursor.read_u32::<LittleEndian>().ok()?;
        assert_eq!(reserved, 0);
        let mut images = Vec::new();
        for _ in 0..num_images {
            let status = cursor.read_u32::<LittleEndian>().ok()?;
            let size = cursor.read_u32::<LittleEndian>().ok()?;
            let mut data = vec![0u8; size as usize];
            cursor.read_exact(&mut data).ok()?;
            images.push(ImageResponse { status, data });
        }
        Some((version, num_images, images))
    }

    #[test]
    fn two_images_round_trip_with_status_bytes() {
        let request = batch(1, &[small_jpeg(), small_jpeg()]);
        let mut engine = NearestNeighbourEngine::new(2);
        let mut input = Cursor::new(request.as_slice());
        let mut output = Vec::new();
        run_legacy_batch(&mut engine, &options(), &mut input, &mut output).unwrap();

        let out_slice: &[u8] = &output;
        let mut cursor = Cursor::new(out_slice);
        let (version, num_images, images) = parse_response(&mut cursor).unwrap();
        assert_eq!(version, 1);
        assert_eq!(num_images, 2);
        for image in &images {
            assert_eq!(image.status, 0);
            assert!(!image.data.is_empty());
            let decoded = codec::decode(&image.data).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (128, 128));
        }
    }

    #[test]
    fn images_beyond_max_batch_items_get_failed_status() {
        let request = batch(1, &[small_jpeg(), small_jpeg(), small_jpeg()]);
        let mut engine = NearestNeighbourEngine::new(2);
        let mut opts = options();
        opts.max_batch_items = 2;
        let mut input = Cursor::new(request.as_slice());
        let mut output = Vec::new();
        run_legacy_batch(&mut engine, &opts, &mut input, &mut output).unwrap();

        let out_slice: &[u8] = &output;
        let mut cursor = Cursor::new(out_slice);
        let (_, num_images, images) = parse_response(&mut cursor).unwrap();
        // The header still echoes the requested count.
        assert_eq!(num_images, 3);
        assert_eq!(images[0].status, 0);
        assert_eq!(images[1].status, 0);
        assert_eq!(images[2].status, 1);
        assert!(images[2].data.is_empty());
    }

    #[test]
    fn per_image_failure_is_not_fatal() {
        let request = batch(1, &[vec![0xBA, 0xD0], small_jpeg()]);
        let mut engine = NearestNeighbourEngine::new(2);
        let mut input = Cursor::new(request.as_slice());
        let mut output = Vec::new();
        run_legacy_batch(&mut engine, &options(), &mut input, &mut output).unwrap();

        let out_slice: &[u8] = &output;
        let mut cursor = Cursor::new(out_slice);
        let (_, _, images) = parse_response(&mut cursor).unwrap();
        assert_eq!(images[0].status, 1);
        assert!(images[0].data.is_empty());
        assert_eq!(images[1].status, 0);
    }

    #[test]
    fn bad_magic_is_fatal() {
        let mut request = batch(1, &[]);
        request[0] = 0xFF;
        let mut engine = NearestNeighbourEngine::new(2);
        let mut input = Cursor::new(request.as_slice());
        let mut output = Vec::new();
        assert!(run_legacy_batch(&mut engine, &options(), &mut input, &mut output).is_err());
    }

    #[test]
    fn keep_alive_processes_consecutive_batches() {
        let mut stream = batch(1, &[small_jpeg()]);
        stream.extend_from_slice(&batch(1, &[small_jpeg()]));
        let mut engine = NearestNeighbourEngine::new(2);
        let mut opts = options();
        opts.keep_alive = true;
        let mut input = Cursor::new(stream.as_slice());
        let mut output = Vec::new();
        run_legacy_batch(&mut engine, &opts, &mut input, &mut output).unwrap();

        let out_slice: &[u8] = &output;
        let mut cursor = Cursor::new(out_slice);
        assert!(parse_response(&mut cursor).is_some());
        assert!(parse_response(&mut cursor).is_some());
    }
}
