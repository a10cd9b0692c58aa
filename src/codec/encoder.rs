//! JPEG encoder wrapper
//!
//! Thin layer over the `image` crate's JPEG encoder with shared counters.

use std::io::Cursor;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder as ImageJpegEncoder;
use image::DynamicImage;

use crate::error::CodecError;

/// Clamp a viewer-supplied quality into the encoder's 1-100 range
pub fn clamp_quality(quality: i64) -> u8 {
    quality.clamp(1, 100) as u8
}

/// Live JPEG quality, read by each encode task when it starts
#[derive(Debug)]
pub struct SharedQuality(AtomicU8);

impl SharedQuality {
    pub fn new(quality: u8) -> Self {
        Self(AtomicU8::new(clamp_quality(quality as i64)))
    }

    pub fn get(&self) -> u8 {
        self.0.load(Ordering::Relaxed)
    }

    /// Store a viewer-requested quality, returning the clamped value
    pub fn set(&self, requested: i64) -> u8 {
        let quality = clamp_quality(requested);
        self.0.store(quality, Ordering::Relaxed);
        quality
    }
}

/// JPEG encoder shared across encode tasks
#[derive(Debug, Default)]
pub struct JpegEncoder {
    /// Frame counter for statistics
    frames_encoded: AtomicU64,
    /// Total bytes produced
    bytes_produced: AtomicU64,
    /// Frames that failed to encode
    failures: AtomicU64,
}

impl JpegEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compress `image` at `quality` (1-100)
    pub fn encode(&self, image: &DynamicImage, quality: u8) -> Result<Bytes, CodecError> {
        if !(1..=100).contains(&quality) {
            self.failures.fetch_add(1, Ordering::Relaxed);
            return Err(CodecError::InvalidQuality(quality as i64));
        }

        // Rough capacity guess, half a byte per pixel
        let estimate = (image.width() * image.height()) as usize / 2;
        let mut buf = Cursor::new(Vec::with_capacity(estimate));
        let encoder = ImageJpegEncoder::new_with_quality(&mut buf, quality);

        if let Err(e) = image.write_with_encoder(encoder) {
            self.failures.fetch_add(1, Ordering::Relaxed);
            return Err(CodecError::EncodingFailed(e.to_string()));
        }

        let data = buf.into_inner();
        self.frames_encoded.fetch_add(1, Ordering::Relaxed);
        self.bytes_produced.fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(Bytes::from(data))
    }

    /// Get statistics
    pub fn stats(&self) -> EncoderStats {
        let frames_encoded = self.frames_encoded.load(Ordering::Relaxed);
        let bytes_produced = self.bytes_produced.load(Ordering::Relaxed);
        EncoderStats {
            frames_encoded,
            bytes_produced,
            failures: self.failures.load(Ordering::Relaxed),
            average_frame_size: if frames_encoded > 0 {
                bytes_produced as f32 / frames_encoded as f32
            } else {
                0.0
            },
        }
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
    pub failures: u64,
    pub average_frame_size: f32,
}
