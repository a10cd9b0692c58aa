//! Audio buffer types handed over by the host

pub mod packer;

pub use packer::{pack, PackedAudio};

/// Host sample format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    U8,
    S16,
    S32,
    F32,
    U8Planar,
    S16Planar,
    S32Planar,
    F32Planar,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::U8 | Self::U8Planar => 1,
            Self::S16 | Self::S16Planar => 2,
            Self::S32 | Self::S32Planar | Self::F32 | Self::F32Planar => 4,
        }
    }

    pub fn is_planar(&self) -> bool {
        matches!(
            self,
            Self::U8Planar | Self::S16Planar | Self::S32Planar | Self::F32Planar
        )
    }

    /// Stable code used on the wire
    pub fn code(&self) -> i32 {
        match self {
            Self::U8 => 1,
            Self::S16 => 2,
            Self::S32 => 3,
            Self::F32 => 4,
            Self::U8Planar => 5,
            Self::S16Planar => 6,
            Self::S32Planar => 7,
            Self::F32Planar => 8,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            1 => Self::U8,
            2 => Self::S16,
            3 => Self::S32,
            4 => Self::F32,
            5 => Self::U8Planar,
            6 => Self::S16Planar,
            7 => Self::S32Planar,
            8 => Self::F32Planar,
            _ => return None,
        })
    }
}

/// Output format of the host's audio mix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_format: SampleFormat,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    /// Number of planes a buffer in this format carries
    pub fn plane_count(&self) -> usize {
        if self.sample_format.is_planar() {
            self.channels as usize
        } else {
            1
        }
    }

    /// Bytes held by one plane for `frames` sample frames
    pub fn plane_len(&self, frames: u32) -> usize {
        let per_frame = if self.sample_format.is_planar() {
            self.sample_format.bytes_per_sample()
        } else {
            self.sample_format.bytes_per_sample() * self.channels as usize
        };
        per_frame * frames as usize
    }
}

/// Raw audio buffer as delivered by the host callback
#[derive(Debug, Clone, Copy)]
pub struct RawAudioFrame<'a> {
    pub planes: &'a [&'a [u8]],
    /// Sample frames per plane
    pub frames: u32,
    /// Capture timestamp in nanoseconds
    pub timestamp: u64,
}
