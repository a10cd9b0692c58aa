//! Audio record packing
//!
//! A packed buffer is written as one record: an audio [`FrameHeader`], a
//! [`WaveInfo`] and then every plane's sample bytes in plane order. Sample
//! data is borrowed from the host buffer, not copied.

use bytes::{Bytes, BytesMut};

use super::{AudioFormat, RawAudioFrame};
use crate::error::FrameError;
use crate::protocol::{FrameHeader, WaveInfo};

/// Audio record ready for a vectored write
#[derive(Debug)]
pub struct PackedAudio<'a> {
    /// Frame header plus wave info
    pub header: Bytes,
    /// Sample bytes, one slice per plane, trimmed to the exact length
    pub planes: Vec<&'a [u8]>,
}

impl<'a> PackedAudio<'a> {
    /// All buffers in wire order
    pub fn buffers(&self) -> Vec<&[u8]> {
        let mut bufs = Vec::with_capacity(1 + self.planes.len());
        bufs.push(&self.header[..]);
        bufs.extend(self.planes.iter().copied());
        bufs
    }

    /// Total record length in bytes
    pub fn len(&self) -> usize {
        self.header.len() + self.planes.iter().map(|p| p.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Pack one host audio buffer
pub fn pack<'a>(format: &AudioFormat, frame: &RawAudioFrame<'a>) -> Result<PackedAudio<'a>, FrameError> {
    let plane_count = format.plane_count();
    let plane_len = format.plane_len(frame.frames);

    let mut planes = Vec::with_capacity(plane_count);
    for index in 0..plane_count {
        let data: &'a [u8] = *frame
            .planes
            .get(index)
            .ok_or(FrameError::MissingPlane(index))?;
        if data.len() < plane_len {
            return Err(FrameError::PlaneTooSmall {
                plane: index,
                needed: plane_len,
                actual: data.len(),
            });
        }
        planes.push(&data[..plane_len]);
    }

    let sample_bytes = plane_len * plane_count;
    let info = WaveInfo {
        format: format.sample_format.code(),
        sample_rate: format.sample_rate as i32,
        channels: format.channels as i32,
        frames: frame.frames as i32,
    };

    let mut header = BytesMut::with_capacity(FrameHeader::LEN + WaveInfo::LEN);
    FrameHeader::audio(frame.timestamp as i64, WaveInfo::LEN + sample_bytes).write_to(&mut header);
    info.write_to(&mut header);

    Ok(PackedAudio {
        header: header.freeze(),
        planes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SampleFormat;

    #[test]
    fn test_planar_float_stereo() {
        let format = AudioFormat {
            sample_format: SampleFormat::F32Planar,
            sample_rate: 48000,
            channels: 2,
        };
        let left = [1u8; 16];
        // Extra trailing bytes must be trimmed
        let right = [2u8; 20];
        let planes: [&[u8]; 2] = [&left, &right];
        let frame = RawAudioFrame {
            planes: &planes,
            frames: 4,
            timestamp: 777,
        };

        let packed = pack(&format, &frame).unwrap();
        assert_eq!(packed.planes.len(), 2);
        assert_eq!(packed.planes[1].len(), 16);
        assert_eq!(packed.len(), FrameHeader::LEN + WaveInfo::LEN + 32);

        let header = FrameHeader::decode(&packed.header).unwrap();
        assert_eq!(&header.tag, b"WAVE");
        assert_eq!(header.timestamp, 777);
        assert_eq!(header.payload_len(), WaveInfo::LEN + 32);

        let info = WaveInfo::decode(&packed.header[FrameHeader::LEN..]).unwrap();
        assert_eq!(SampleFormat::from_code(info.format), Some(SampleFormat::F32Planar));
        assert_eq!((info.sample_rate, info.channels, info.frames), (48000, 2, 4));
    }

    #[test]
    fn test_interleaved_uses_one_plane() {
        let format = AudioFormat {
            sample_format: SampleFormat::S16,
            sample_rate: 44100,
            channels: 2,
        };
        let data = [0u8; 40];
        let planes: [&[u8]; 1] = [&data];
        let frame = RawAudioFrame {
            planes: &planes,
            frames: 10,
            timestamp: 0,
        };

        let packed = pack(&format, &frame).unwrap();
        assert_eq!(packed.planes.len(), 1);
        assert_eq!(packed.planes[0].len(), 40);
        assert_eq!(packed.buffers().len(), 2);
    }

    #[test]
    fn test_short_plane_rejected() {
        let format = AudioFormat {
            sample_format: SampleFormat::F32Planar,
            sample_rate: 48000,
            channels: 2,
        };
        let left = [0u8; 16];
        let planes: [&[u8]; 1] = [&left];
        let frame = RawAudioFrame {
            planes: &planes,
            frames: 4,
            timestamp: 0,
        };
        assert!(matches!(pack(&format, &frame), Err(FrameError::MissingPlane(1))));

        let short = [0u8; 8];
        let planes: [&[u8]; 2] = [&left, &short];
        let frame = RawAudioFrame {
            planes: &planes,
            frames: 4,
            timestamp: 0,
        };
        assert!(matches!(
            pack(&format, &frame),
            Err(FrameError::PlaneTooSmall { plane: 1, needed: 16, actual: 8 })
        ));
    }
}
