//! Framed request protocol, version 2.
//!
//! Outer framing: a `u32` frame length, then `length` bytes comprising a
//! fixed header (`magic` "BRDR", `version`, message type, request id) and
//! the message body.  A zero-length frame is a clean shutdown.  Every
//! request is answered with exactly one response frame, flushed before the
//! next read, so a parent application can multiplex many images over one
//! worker process.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::{error, info, warn};

use surge_core::error::{Result, UpscaleError};
use surge_core::{EngineKind, EngineOptions, UpscaleEngine};

/// "BRDR" in little-endian byte order.
pub const PROTOCOL_MAGIC: u32 = 0x4252_4452;
pub const PROTOCOL_VERSION: u8 = 2;
/// magic + version + msg_type + request_id.
pub const HEADER_SIZE: usize = 4 + 1 + 1 + 4;
pub const MAX_META_STRING_BYTES: usize = 64;
pub const MAX_IMAGE_SIZE_BYTES: u32 = 50 * 1024 * 1024;
/// Upper bound on one whole frame.
pub const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Request = 1,
    Response = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ProtocolStatus {
    Ok = 0,
    InvalidFrame = 1,
    ValidationError = 2,
    EngineError = 3,
}

/// Fixed frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub magic: u32,
    pub version: u8,
    pub msg_type: u8,
    pub request_id: u32,
}

/// A parsed request body.
#[derive(Clone, Debug)]
pub struct Request {
    pub engine: EngineKind,
    /// Quality flag (RealCUGAN) or scale factor (RealESRGAN) as a string.
    pub meta: String,
    pub gpu_id: i32,
    pub batch_count: u32,
    pub images: Vec<Vec<u8>>,
}

// ─── Body parsing ───────────────────────────────────────────────────────

struct ByteParser<'a> {
    data: &'a [u8],
}

impl<'a> ByteParser<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.data.len() < n {
            return None;
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Some(head)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u32(&mut self) -> Option<u32> {
        self.take(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self) -> Option<i32> {
        self.u32().map(|v| v as i32)
    }

    fn remaining(&self) -> usize {
        self.data.len()
    }
}

/// Split a frame into its header and body, checking magic and version.
pub fn parse_header(frame: &[u8]) -> Result<(FrameHeader, &[u8])> {
    if frame.len() < HEADER_SIZE {
        return Err(UpscaleError::Validation(
            "payload too small for protocol header".into(),
        ));
    }
    let header = FrameHeader {
        magic: u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]),
        version: frame[4],
        msg_type: frame[5],
        request_id: u32::from_le_bytes([frame[6], frame[7], frame[8], frame[9]]),
    };
    if header.magic != PROTOCOL_MAGIC {
        return Err(UpscaleError::Validation(
            "invalid magic, expected BRDR".into(),
        ));
    }
    if header.version != PROTOCOL_VERSION {
        return Err(UpscaleError::Validation(format!(
            "unsupported protocol version {}",
            header.version
        )));
    }
    Ok((header, &frame[HEADER_SIZE..]))
}

/// Parse a request body, rejecting at the first fault.
pub fn parse_request(body: &[u8], max_batch_items: u32) -> Result<Request> {
    let fault = |message: &str| UpscaleError::Validation(message.to_string());
    let mut parser = ByteParser::new(body);

    let engine_byte = parser.u8().ok_or_else(|| fault("missing engine enum"))?;
    let engine = EngineKind::from_wire(engine_byte)
        .ok_or_else(|| fault("engine enum must be 0 (RealCUGAN) or 1 (RealESRGAN)"))?;

    let meta_len = parser
        .u32()
        .ok_or_else(|| fault("incomplete quality/scale length"))? as usize;
    if meta_len > MAX_META_STRING_BYTES {
        return Err(fault("quality/scale metadata too long"));
    }
    let meta_bytes = parser
        .take(meta_len)
        .ok_or_else(|| fault("quality/scale metadata truncated"))?;
    let meta = String::from_utf8_lossy(meta_bytes).into_owned();

    let gpu_id = parser.i32().ok_or_else(|| fault("missing gpu_id"))?;

    let batch_count = parser.u32().ok_or_else(|| fault("missing batch_count"))?;
    if batch_count == 0 {
        return Err(fault("batch_count must be positive"));
    }
    if batch_count > max_batch_items {
        return Err(fault("batch_count exceeds --max-batch-items"));
    }

    let mut images = Vec::with_capacity(batch_count as usize);
    for entry in 0..batch_count {
        let image_len = parser
            .u32()
            .ok_or_else(|| UpscaleError::Validation(format!(
                "missing image length for entry {entry}"
            )))?;
        if image_len > MAX_IMAGE_SIZE_BYTES {
            return Err(UpscaleError::Validation(format!(
                "image size exceeds limit: {image_len}"
            )));
        }
        let image = parser.take(image_len as usize).ok_or_else(|| {
            UpscaleError::Validation(format!("image payload truncated for entry {entry}"))
        })?;
        images.push(image.to_vec());
    }

    if parser.remaining() > 0 {
        return Err(fault("trailing bytes after images"));
    }

    Ok(Request {
        engine,
        meta,
        gpu_id,
        batch_count,
        images,
    })
}

// ─── Response encoding ──────────────────────────────────────────────────

/// Encode a complete response frame, including the outer length prefix.
pub fn encode_response(
    request_id: u32,
    status: ProtocolStatus,
    error: &str,
    outputs: &[Vec<u8>],
) -> Vec<u8> {
    let body_len = 4 + 4 + error.len() + 4 + outputs.iter().map(|o| 4 + o.len()).sum::<usize>();
    let mut frame = Vec::with_capacity(4 + HEADER_SIZE + body_len);

    frame.extend_from_slice(&((HEADER_SIZE + body_len) as u32).to_le_bytes());
    frame.extend_from_slice(&PROTOCOL_MAGIC.to_le_bytes());
    frame.push(PROTOCOL_VERSION);
    frame.push(MessageType::Response as u8);
    frame.extend_from_slice(&request_id.to_le_bytes());

    frame.extend_from_slice(&(status as u32).to_le_bytes());
    frame.extend_from_slice(&(error.len() as u32).to_le_bytes());
    frame.extend_from_slice(error.as_bytes());
    frame.extend_from_slice(&(outputs.len() as u32).to_le_bytes());
    for output in outputs {
        frame.extend_from_slice(&(output.len() as u32).to_le_bytes());
        frame.extend_from_slice(output);
    }
    frame
}

// ─── Session loop ───────────────────────────────────────────────────────

/// Run the keep-alive session: read one frame, answer with one frame, until
/// EOF, a zero-length shutdown frame, or an unrecoverable stream error.
///
/// Malformed frames are answered and the session continues; only stream
/// faults are terminal.  The request's engine/meta/gpu fields are validated
/// against the session configuration, but the engine built at startup does
/// the processing — rebuilding per request would defeat keep-alive.
pub fn run_session<E, R, W>(
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
    info!("protocol v2 session started");

    loop {
        let frame_len = match input.read_u32::<LittleEndian>() {
            Ok(len) => len,
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                info!("stdin closed, ending session");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        if frame_len == 0 {
            info!("received shutdown frame");
            return Ok(());
        }

        if frame_len > MAX_FRAME_BYTES {
            warn!(frame_len, "frame exceeds limit, discarding");
            discard(input, frame_len as u64)?;
            respond(
                output,
                encode_response(0, ProtocolStatus::InvalidFrame, "frame too large", &[]),
            )?;
            continue;
        }

        let mut frame = vec![0u8; frame_len as usize];
        input.read_exact(&mut frame)?;

        if (frame_len as usize) < HEADER_SIZE {
            warn!(frame_len, "frame smaller than header, discarding");
            respond(
                output,
                encode_response(0, ProtocolStatus::InvalidFrame, "frame too small", &[]),
            )?;
            continue;
        }

        // The request id sits at a fixed offset, so it is echoed even when
        // header validation fails.
        let request_id = u32::from_le_bytes([frame[6], frame[7], frame[8], frame[9]]);

        let body = match parse_header(&frame) {
            Ok((header, body)) if header.msg_type == MessageType::Request as u8 => body,
            Ok((header, _)) => {
                warn!(request_id, msg_type = header.msg_type, "unexpected message type");
                respond(
                    output,
                    encode_response(
                        request_id,
                        ProtocolStatus::ValidationError,
                        "expected a Request frame",
                        &[],
                    ),
                )?;
                continue;
            }
            Err(err) => {
                warn!(request_id, %err, "header validation failed");
                respond(
                    output,
                    encode_response(
                        request_id,
                        ProtocolStatus::ValidationError,
                        &err.to_string(),
                        &[],
                    ),
                )?;
                continue;
            }
        };

        let request = match parse_request(body, options.max_batch_items) {
            Ok(request) => request,
            Err(err) => {
                warn!(request_id, %err, "request validation failed");
                respond(
                    output,
                    encode_response(
                        request_id,
                        ProtocolStatus::ValidationError,
                        &err.to_string(),
                        &[],
                    ),
                )?;
                continue;
            }
        };

        if request.engine != options.kind {
            info!(
                request_id,
                requested = ?request.engine,
                session = ?options.kind,
                "request engine differs from session engine; session engine is used"
            );
        }

        info!(
            request_id,
            batch = request.batch_count,
            meta = %request.meta,
            gpu_id = request.gpu_id,
            "processing request"
        );

        let mut outputs = Vec::with_capacity(request.images.len());
        let mut failure: Option<String> = None;
        for (index, image) in request.images.iter().enumerate() {
            match engine.process_single(image, options.format) {
                Ok(data) => outputs.push(data),
                Err(err) => {
                    error!(request_id, index, %err, "image processing failed");
                    failure = Some(format!("image {index} failed: {err}"));
                    break;
                }
            }
        }

        let response = match failure {
            // Prior outputs are discarded: a response either carries every
            // output or none.
            Some(message) => {
                encode_response(request_id, ProtocolStatus::EngineError, &message, &[])
            }
            None => encode_response(request_id, ProtocolStatus::Ok, "", &outputs),
        };
        respond(output, response)?;
    }
}

fn respond<W: Write>(output: &mut W, frame: Vec<u8>) -> Result<()> {
    output.write_all(&frame)?;
    output.flush()?;
    Ok(())
}

fn discard<R: Read>(input: &mut R, len: u64) -> Result<()> {
    std::io::copy(&mut input.by_ref().take(len), &mut std::io::sink())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use surge_core::{OutputFormat, Raster};
    use surge_engine::codec;
    use surge_engine::testing::NearestNeighbourEngine;

    fn tiny_png() -> Vec<u8> {
        let raster = Raster::from_vec(1, 1, vec![128, 64, 32]).unwrap();
        codec::encode(&raster, OutputFormat::Png).unwrap()
    }

    fn build_body(engine: u8, meta: &str, gpu_id: i32, count: u32, images: &[Vec<u8>]) -> Vec<u8> {
        let mut body = Vec::new();
        body.push(engine);
        body.extend_from_slice(&(meta.len() as u32).to_le_bytes());
        body.extend_from_slice(meta.as_bytes());
        body.extend_from_slice(&(gpu_id as u32).to_le_bytes());
        body.extend_from_slice(&count.to_le_bytes());
        for image in images {
            body.extend_from_slice(&(image.len() as u32).to_le_bytes());
            body.extend_from_slice(image);
        }
        body
    }

    fn build_frame(msg_type: u8, request_id: u32, body: &[u8]) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&((HEADER_SIZE + body.len()) as u32).to_le_bytes());
        frame.extend_from_slice(&PROTOCOL_MAGIC.to_le_bytes());
        frame.push(PROTOCOL_VERSION);
        frame.push(msg_type);
        frame.extend_from_slice(&request_id.to_le_bytes());
        frame.extend_from_slice(body);
        frame
    }

    struct ParsedResponse {
        request_id: u32,
        status: u32,
        error: String,
        outputs: Vec<Vec<u8>>,
    }

    fn parse_response(cursor: &mut Cursor<&[u8]>) -> Option<ParsedResponse> {
        use byteorder::{LittleEndian, ReadBytesExt};
        use std::io::Read;

        let frame_len = cursor.read_u32::<LittleEndian>().ok()?;
        let mut frame = vec![0u8; frame_len as usize];
        cursor.read_exact(&mut frame).ok()?;
        let (header, body) = parse_header(&frame).ok()?;
        assert_eq!(header.msg_type, MessageType::Response as u8);

        let mut p = Cursor::new(body);
        let status = p.read_u32::<LittleEndian>().ok()?;
        let err_len = p.read_u32::<LittleEndian>().ok()?;
        let mut error = vec![0u8; err_len as usize];
        p.read_exact(&mut error).ok()?;
        let count = p.read_u32::<LittleEndian>().ok()?;
        let mut outputs = Vec::new();
        for _ in 0..count {
            let len = p.read_u32::<LittleEndian>().ok()?;
            let mut data = vec![0u8; len as usize];
            p.read_exact(&mut data).ok()?;
            outputs.push(data);
        }
        Some(ParsedResponse {
            request_id: header.request_id,
            status,
            error: String::from_utf8_lossy(&error).into_owned(),
            outputs,
        })
    }

    fn run(frames: &[Vec<u8>], max_batch_items: u32) -> (Vec<ParsedResponse>, bool) {
        let mut stream = Vec::new();
        for frame in frames {
            stream.extend_from_slice(frame);
        }
        let mut engine = NearestNeighbourEngine::new(2);
        let options = EngineOptions {
            kind: EngineKind::RealEsrgan,
            format: OutputFormat::Png,
            max_batch_items,
            ..EngineOptions::default()
        };
        let mut input = Cursor::new(stream.as_slice());
        let mut output = Vec::new();
        let ok = run_session(&mut engine, &options, &mut input, &mut output).is_ok();

        let out_slice: &[u8] = &output;
        let mut cursor = Cursor::new(out_slice);
        let mut responses = Vec::new();
        while let Some(response) = parse_response(&mut cursor) {
            responses.push(response);
        }
        (responses, ok)
    }

    #[test]
    fn happy_path_returns_one_output() {
        let body = build_body(1, "2", -1, 1, &[tiny_png()]);
        let frame = build_frame(MessageType::Request as u8, 7, &body);
        let (responses, ok) = run(&[frame], 8);
        assert!(ok);
        assert_eq!(responses.len(), 1);
        let response = &responses[0];
        assert_eq!(response.request_id, 7);
        assert_eq!(response.status, ProtocolStatus::Ok as u32);
        assert_eq!(response.outputs.len(), 1);
        let decoded = codec::decode(&response.outputs[0]).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (2, 2));
    }

    #[test]
    fn batch_count_above_max_is_a_validation_error() {
        // batch_count=9 with only one image attached; the bound check fires
        // before the image list is read.
        let body = build_body(1, "2", -1, 9, &[tiny_png()]);
        let frame = build_frame(MessageType::Request as u8, 7, &body);
        let (responses, ok) = run(&[frame], 8);
        assert!(ok);
        assert_eq!(responses.len(), 1);
        let response = &responses[0];
        assert_eq!(response.request_id, 7);
        assert_eq!(response.status, ProtocolStatus::ValidationError as u32);
        assert!(response.error.contains("batch_count"));
        assert!(response.outputs.is_empty());
    }

    #[test]
    fn zero_length_frame_shuts_down_cleanly() {
        let shutdown = 0u32.to_le_bytes().to_vec();
        let (responses, ok) = run(&[shutdown], 8);
        assert!(ok);
        assert!(responses.is_empty());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let body = build_body(0, "E", -1, 1, &[tiny_png()]);
        let mut frame = build_frame(MessageType::Request as u8, 3, &body);
        frame[4] = 0xFF; // corrupt the magic
        let (responses, _) = run(&[frame], 8);
        assert_eq!(responses[0].status, ProtocolStatus::ValidationError as u32);
        assert!(responses[0].error.contains("magic"));
        assert!(responses[0].outputs.is_empty());
    }

    #[test]
    fn wrong_version_is_rejected_with_request_id() {
        let body = build_body(0, "E", -1, 1, &[tiny_png()]);
        let mut frame = build_frame(MessageType::Request as u8, 11, &body);
        frame[8] = 1; // version byte
        let (responses, _) = run(&[frame], 8);
        assert_eq!(responses[0].request_id, 11);
        assert_eq!(responses[0].status, ProtocolStatus::ValidationError as u32);
    }

    #[test]
    fn response_message_type_is_rejected() {
        let body = build_body(0, "E", -1, 1, &[tiny_png()]);
        let frame = build_frame(MessageType::Response as u8, 5, &body);
        let (responses, _) = run(&[frame], 8);
        assert_eq!(responses[0].status, ProtocolStatus::ValidationError as u32);
    }

    #[test]
    fn undersized_frame_is_an_invalid_frame() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&4u32.to_le_bytes());
        frame.extend_from_slice(&[1, 2, 3, 4]);
        let (responses, _) = run(&[frame], 8);
        assert_eq!(responses[0].status, ProtocolStatus::InvalidFrame as u32);
    }

    #[test]
    fn malformed_bodies_never_yield_ok() {
        let image = tiny_png();
        let cases: Vec<Vec<u8>> = vec![
            build_body(2, "E", -1, 1, &[image.clone()]), // engine byte out of range
            build_body(0, &"x".repeat(65), -1, 1, &[image.clone()]), // meta too long
            build_body(0, "E", -1, 0, &[]),              // zero batch count
            {
                // image length promises more bytes than the body holds
                let mut body = build_body(0, "E", -1, 1, &[]);
                body.extend_from_slice(&100u32.to_le_bytes());
                body.extend_from_slice(&[1, 2, 3]);
                body
            },
            {
                // trailing bytes after the image list
                let mut body = build_body(0, "E", -1, 1, &[image.clone()]);
                body.push(0xAB);
                body
            },
            Vec::new(), // empty body
        ];
        for body in cases {
            let frame = build_frame(MessageType::Request as u8, 1, &body);
            let (responses, _) = run(&[frame], 8);
            assert_eq!(responses.len(), 1);
            assert_ne!(responses[0].status, ProtocolStatus::Ok as u32);
            assert!(responses[0].outputs.is_empty());
        }
    }

    #[test]
    fn engine_failure_names_the_index_and_drops_outputs() {
        let body = build_body(1, "2", -1, 3, &[tiny_png(), tiny_png(), tiny_png()]);
        let frame = build_frame(MessageType::Request as u8, 21, &body);

        let mut engine = NearestNeighbourEngine::new(2).failing_after(2);
        let options = EngineOptions {
            kind: EngineKind::RealEsrgan,
            format: OutputFormat::Png,
            max_batch_items: 8,
            ..EngineOptions::default()
        };
        let mut input = Cursor::new(frame.as_slice());
        let mut output = Vec::new();
        run_session(&mut engine, &options, &mut input, &mut output).unwrap();

        let out_slice: &[u8] = &output;
        let mut cursor = Cursor::new(out_slice);
        let response = parse_response(&mut cursor).unwrap();
        assert_eq!(response.status, ProtocolStatus::EngineError as u32);
        assert!(response.error.contains("image 2"));
        assert!(response.outputs.is_empty());
    }

    #[test]
    fn session_keeps_alive_across_requests() {
        let body = build_body(1, "2", -1, 1, &[tiny_png()]);
        let frames = vec![
            build_frame(MessageType::Request as u8, 1, &body),
            build_frame(MessageType::Request as u8, 2, &body),
            0u32.to_le_bytes().to_vec(),
        ];
        let (responses, ok) = run(&frames, 8);
        assert!(ok);
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].request_id, 1);
        assert_eq!(responses[1].request_id, 2);
        assert!(responses.iter().all(|r| r.status == ProtocolStatus::Ok as u32));
    }
}
