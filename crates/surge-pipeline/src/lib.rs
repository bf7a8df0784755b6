#![doc = include_str!("../README.md")]

pub mod pipeline;
pub mod queue;

pub use pipeline::{
    run_streaming_batch, PipelineMetrics, PipelineReport, MAX_BATCH_IMAGES, MAX_IMAGE_SIZE_BYTES,
    QUEUE_CAPACITY,
};
pub use queue::BoundedQueue;
