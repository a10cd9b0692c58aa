//! JPEG codec wrapper
//!
//! Compresses adapted video frames. Encoding is stateless apart from
//! statistics, so one encoder is shared by every in-flight encode task.

pub mod encoder;

pub use encoder::{clamp_quality, EncoderStats, JpegEncoder, SharedQuality};
