//! Error types for the frame streaming library

use thiserror::Error;

use crate::video::PixelFormat;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Raw frame conversion errors
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Unsupported pixel format: {0:?}")]
    UnsupportedFormat(PixelFormat),

    #[error("Invalid frame dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Missing plane {0}")]
    MissingPlane(usize),

    #[error("Plane {plane} too small: need {needed} bytes, got {actual}")]
    PlaneTooSmall {
        plane: usize,
        needed: usize,
        actual: usize,
    },
}

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Invalid quality: {0}")]
    InvalidQuality(i64),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Socket setup failed: {0}")]
    SocketSetup(String),
}

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Bad magic: {0:?}")]
    BadMagic([u8; 4]),

    #[error("Invalid payload size: {0}")]
    InvalidSize(i64),

    #[error("Truncated message: {0}")]
    Truncated(#[source] std::io::Error),

    #[error("Malformed payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Unknown record tag: {0:?}")]
    UnknownTag([u8; 4]),
}

impl ProtocolError {
    /// Whether the peer broke the envelope framing itself. Such a peer is
    /// disconnected; anything else only abandons the current message.
    pub fn is_violation(&self) -> bool {
        matches!(self, Self::BadMagic(_) | Self::InvalidSize(_) | Self::UnknownTag(_))
    }
}

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
