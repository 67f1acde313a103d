//! Capture a V4L2 device, optionally watermark it, encode H.264 and publish
//! the result as FLV over RTMP.

pub mod config;
pub mod error;
pub mod media;
pub mod pipeline;
pub mod utils;

pub use config::{SessionConfig, StreamPolicy};
pub use error::{Stage, StreamerError, StreamerResult};
pub use pipeline::StreamPipeline;
