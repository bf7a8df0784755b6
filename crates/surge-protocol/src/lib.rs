#![doc = include_str!("../README.md")]

pub mod legacy;
pub mod v2;

pub use legacy::{run_legacy_batch, BATCH_MAGIC};
pub use v2::{
    encode_response, parse_header, parse_request, run_session, FrameHeader, MessageType,
    ProtocolStatus, Request, HEADER_SIZE, MAX_FRAME_BYTES, MAX_IMAGE_SIZE_BYTES,
    MAX_META_STRING_BYTES, PROTOCOL_MAGIC, PROTOCOL_VERSION,
};
