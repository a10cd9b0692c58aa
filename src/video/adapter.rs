//! Raw host frame to encodable image conversion
//!
//! The JPEG encoder only accepts RGB or grayscale input, so every supported
//! host layout is normalized into one of those two. YUV uses BT.601
//! limited-range integer conversion. Alpha is discarded.

use image::{DynamicImage, GrayImage, RgbImage};

use super::{PixelFormat, RawVideoFrame, VideoPlane};
use crate::error::FrameError;

/// Convert a raw host frame into an `Rgb8` or `Luma8` image
pub fn to_image(frame: &RawVideoFrame<'_>) -> Result<DynamicImage, FrameError> {
    if frame.width == 0 || frame.height == 0 {
        return Err(FrameError::InvalidDimensions {
            width: frame.width,
            height: frame.height,
        });
    }

    match frame.format {
        PixelFormat::I420 => planar_yuv(frame, 1, 1),
        PixelFormat::I422 => planar_yuv(frame, 1, 0),
        PixelFormat::I444 => planar_yuv(frame, 0, 0),
        PixelFormat::Nv12 => nv12(frame),
        PixelFormat::Yuy2 => packed_422(frame, [0, 1, 2, 3]),
        PixelFormat::Uyvy => packed_422(frame, [1, 0, 3, 2]),
        PixelFormat::Rgba => packed_rgb(frame, [0, 1, 2]),
        PixelFormat::Bgra | PixelFormat::Bgrx => packed_rgb(frame, [2, 1, 0]),
        PixelFormat::Y800 => gray(frame),
        other => Err(FrameError::UnsupportedFormat(other)),
    }
}

/// BT.601 limited range YCbCr to RGB
#[inline]
fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = 298 * (y as i32 - 16);
    let d = u as i32 - 128;
    let e = v as i32 - 128;

    let r = (c + 409 * e + 128) >> 8;
    let g = (c - 100 * d - 208 * e + 128) >> 8;
    let b = (c + 516 * d + 128) >> 8;

    [clamp(r), clamp(g), clamp(b)]
}

#[inline]
fn clamp(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// Fetch plane `index` and check it holds `rows` rows of `row_bytes`
fn plane<'a>(
    frame: &RawVideoFrame<'a>,
    index: usize,
    row_bytes: usize,
    rows: usize,
) -> Result<VideoPlane<'a>, FrameError> {
    let plane = *frame
        .planes
        .get(index)
        .ok_or(FrameError::MissingPlane(index))?;

    let needed = if plane.stride < row_bytes {
        row_bytes * rows
    } else {
        plane.stride * (rows - 1) + row_bytes
    };

    if plane.stride < row_bytes || plane.data.len() < needed {
        return Err(FrameError::PlaneTooSmall {
            plane: index,
            needed,
            actual: plane.data.len(),
        });
    }
    Ok(plane)
}

#[inline]
fn row<'a>(plane: &VideoPlane<'a>, y: usize, row_bytes: usize) -> &'a [u8] {
    let start = y * plane.stride;
    &plane.data[start..start + row_bytes]
}

fn finish_rgb(width: usize, height: usize, rgb: Vec<u8>) -> Result<DynamicImage, FrameError> {
    RgbImage::from_raw(width as u32, height as u32, rgb)
        .map(DynamicImage::ImageRgb8)
        .ok_or(FrameError::InvalidDimensions {
            width: width as u32,
            height: height as u32,
        })
}

fn planar_yuv(
    frame: &RawVideoFrame<'_>,
    x_shift: u32,
    y_shift: u32,
) -> Result<DynamicImage, FrameError> {
    let (w, h) = (frame.width as usize, frame.height as usize);
    let cw = (w + (1 << x_shift) - 1) >> x_shift;
    let ch = (h + (1 << y_shift) - 1) >> y_shift;

    let yp = plane(frame, 0, w, h)?;
    let up = plane(frame, 1, cw, ch)?;
    let vp = plane(frame, 2, cw, ch)?;

    let mut rgb = Vec::with_capacity(w * h * 3);
    for y in 0..h {
        let luma = row(&yp, y, w);
        let u_row = row(&up, y >> y_shift, cw);
        let v_row = row(&vp, y >> y_shift, cw);
        for x in 0..w {
            let cx = x >> x_shift;
            rgb.extend_from_slice(&ycbcr_to_rgb(luma[x], u_row[cx], v_row[cx]));
        }
    }
    finish_rgb(w, h, rgb)
}

fn nv12(frame: &RawVideoFrame<'_>) -> Result<DynamicImage, FrameError> {
    let (w, h) = (frame.width as usize, frame.height as usize);
    let cw = (w + 1) / 2;
    let ch = (h + 1) / 2;

    let yp = plane(frame, 0, w, h)?;
    let uvp = plane(frame, 1, cw * 2, ch)?;

    let mut rgb = Vec::with_capacity(w * h * 3);
    for y in 0..h {
        let luma = row(&yp, y, w);
        let uv = row(&uvp, y / 2, cw * 2);
        for x in 0..w {
            let cx = (x / 2) * 2;
            rgb.extend_from_slice(&ycbcr_to_rgb(luma[x], uv[cx], uv[cx + 1]));
        }
    }
    finish_rgb(w, h, rgb)
}

/// Packed 4:2:2. `offsets` gives the byte positions of Y0, U, Y1, V inside
/// each 4-byte macropixel.
fn packed_422(frame: &RawVideoFrame<'_>, offsets: [usize; 4]) -> Result<DynamicImage, FrameError> {
    let (w, h) = (frame.width as usize, frame.height as usize);
    let row_bytes = ((w + 1) / 2) * 4;
    let p = plane(frame, 0, row_bytes, h)?;

    let mut rgb = Vec::with_capacity(w * h * 3);
    for y in 0..h {
        let line = row(&p, y, row_bytes);
        for x in 0..w {
            let base = (x / 2) * 4;
            let luma = if x % 2 == 0 {
                line[base + offsets[0]]
            } else {
                line[base + offsets[2]]
            };
            rgb.extend_from_slice(&ycbcr_to_rgb(
                luma,
                line[base + offsets[1]],
                line[base + offsets[3]],
            ));
        }
    }
    finish_rgb(w, h, rgb)
}

/// Packed 32-bit RGB variants. `order` gives the byte positions of R, G, B.
fn packed_rgb(frame: &RawVideoFrame<'_>, order: [usize; 3]) -> Result<DynamicImage, FrameError> {
    let (w, h) = (frame.width as usize, frame.height as usize);
    let p = plane(frame, 0, w * 4, h)?;

    let mut rgb = Vec::with_capacity(w * h * 3);
    for y in 0..h {
        for px in row(&p, y, w * 4).chunks_exact(4) {
            rgb.extend_from_slice(&[px[order[0]], px[order[1]], px[order[2]]]);
        }
    }
    finish_rgb(w, h, rgb)
}

fn gray(frame: &RawVideoFrame<'_>) -> Result<DynamicImage, FrameError> {
    let (w, h) = (frame.width as usize, frame.height as usize);
    let p = plane(frame, 0, w, h)?;

    let mut luma = Vec::with_capacity(w * h);
    for y in 0..h {
        luma.extend_from_slice(row(&p, y, w));
    }
    GrayImage::from_raw(w as u32, h as u32, luma)
        .map(DynamicImage::ImageLuma8)
        .ok_or(FrameError::InvalidDimensions {
            width: frame.width,
            height: frame.height,
        })
}
