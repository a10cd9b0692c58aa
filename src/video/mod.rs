//! Video frame types handed over by the host

pub mod adapter;

pub use adapter::to_image;

/// Pixel layout of a raw host frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Planar Y, U, V with 2x2 chroma subsampling
    I420,
    /// Planar Y, U, V with horizontal chroma subsampling
    I422,
    /// Planar Y, U, V without subsampling
    I444,
    /// Y plane followed by interleaved UV plane, 2x2 subsampling
    Nv12,
    /// Packed Y0 U Y1 V
    Yuy2,
    /// Packed U Y0 V Y1
    Uyvy,
    Rgba,
    Bgra,
    /// BGRA with an unused fourth byte
    Bgrx,
    /// 8-bit grayscale
    Y800,
    /// Any host format without a conversion
    Other(u32),
}

/// One plane of a raw frame
#[derive(Debug, Clone, Copy)]
pub struct VideoPlane<'a> {
    pub data: &'a [u8],
    /// Bytes per row, including padding
    pub stride: usize,
}

/// Raw video frame as delivered by the host callback
#[derive(Debug, Clone, Copy)]
pub struct RawVideoFrame<'a> {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: &'a [VideoPlane<'a>],
    /// Capture timestamp in nanoseconds
    pub timestamp: u64,
}
