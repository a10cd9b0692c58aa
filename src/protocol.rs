//! Wire protocol definitions
//!
//! Everything sent over TCP is a sequence of records, each prefixed by a
//! 16-byte [`FrameHeader`]:
//!
//! ```text
//! ┌──────────┬────────────────────┬──────────────┬─────────────────┐
//! │ Tag (4)  │ Timestamp (8, LE)  │ Size (4, LE) │ Payload (Size)  │
//! └──────────┴────────────────────┴──────────────┴─────────────────┘
//! ```
//!
//! Video records carry a JPEG image. Audio records carry a [`WaveInfo`]
//! followed by raw sample bytes. In the other direction a viewer sends one
//! [`OptionsHeader`] + JSON [`Options`] right after connecting.

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::{Deserializer, Error as _};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Tag of a compressed video record
pub const VIDEO_TAG: [u8; 4] = *b"JPEG";

/// Tag of a raw audio record
pub const AUDIO_TAG: [u8; 4] = *b"WAVE";

/// Magic of the options envelope
pub const OPTIONS_MAGIC: [u8; 4] = *b"OPTS";

/// Header prefixed to every outbound record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub tag: [u8; 4],
    pub timestamp: i64,
    pub size: i32,
}

impl FrameHeader {
    pub const LEN: usize = 16;

    pub fn video(timestamp: i64, size: usize) -> Self {
        Self {
            tag: VIDEO_TAG,
            timestamp,
            size: size as i32,
        }
    }

    pub fn audio(timestamp: i64, size: usize) -> Self {
        Self {
            tag: AUDIO_TAG,
            timestamp,
            size: size as i32,
        }
    }

    pub fn write_to(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.tag);
        buf.put_i64_le(self.timestamp);
        buf.put_i32_le(self.size);
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::LEN);
        self.write_to(&mut buf);
        buf.freeze()
    }

    /// Parse a header, rejecting unknown tags and negative sizes
    pub fn decode(mut buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < Self::LEN {
            return Err(truncated(Self::LEN, buf.len()));
        }
        let mut tag = [0u8; 4];
        buf.copy_to_slice(&mut tag);
        let timestamp = buf.get_i64_le();
        let size = buf.get_i32_le();

        if tag != VIDEO_TAG && tag != AUDIO_TAG {
            return Err(ProtocolError::UnknownTag(tag));
        }
        if size < 0 {
            return Err(ProtocolError::InvalidSize(size as i64));
        }
        Ok(Self {
            tag,
            timestamp,
            size,
        })
    }

    pub fn is_video(&self) -> bool {
        self.tag == VIDEO_TAG
    }

    pub fn payload_len(&self) -> usize {
        self.size.max(0) as usize
    }
}

/// Audio format record following an audio [`FrameHeader`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveInfo {
    pub format: i32,
    pub sample_rate: i32,
    pub channels: i32,
    pub frames: i32,
}

impl WaveInfo {
    pub const LEN: usize = 16;

    pub fn write_to(&self, buf: &mut impl BufMut) {
        buf.put_i32_le(self.format);
        buf.put_i32_le(self.sample_rate);
        buf.put_i32_le(self.channels);
        buf.put_i32_le(self.frames);
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < Self::LEN {
            return Err(truncated(Self::LEN, buf.len()));
        }
        Ok(Self {
            format: buf.get_i32_le(),
            sample_rate: buf.get_i32_le(),
            channels: buf.get_i32_le(),
            frames: buf.get_i32_le(),
        })
    }
}

/// Envelope header of the inbound options message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionsHeader {
    pub magic: [u8; 4],
    pub size: i32,
}

impl OptionsHeader {
    pub const LEN: usize = 8;

    pub fn decode(mut buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < Self::LEN {
            return Err(truncated(Self::LEN, buf.len()));
        }
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        Ok(Self {
            magic,
            size: buf.get_i32_le(),
        })
    }

    /// Check magic and size bounds, returning the payload length
    pub fn validate(&self, max_size: usize) -> Result<usize, ProtocolError> {
        if self.magic != OPTIONS_MAGIC {
            return Err(ProtocolError::BadMagic(self.magic));
        }
        if self.size < 0 || self.size as usize > max_size {
            return Err(ProtocolError::InvalidSize(self.size as i64));
        }
        Ok(self.size as usize)
    }
}

/// Live encode parameters sent by the viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Options {
    #[serde(rename = "Quality")]
    pub quality: i64,
}

impl<'de> Deserialize<'de> for Options {
    /// Keys match case-insensitively; an exact `Quality` wins over other
    /// spellings. Unknown keys are ignored.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let fields = HashMap::<String, serde_json::Value>::deserialize(deserializer)?;
        let value = fields
            .get("Quality")
            .or_else(|| {
                fields
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case("quality"))
                    .map(|(_, value)| value)
            })
            .ok_or_else(|| D::Error::missing_field("Quality"))?;

        let quality = i64::deserialize(value).map_err(D::Error::custom)?;
        Ok(Self { quality })
    }
}

impl Options {
    /// Full envelope: magic, size, JSON payload
    pub fn encode(&self) -> Bytes {
        // Serializing a struct with one integer field cannot fail
        let json = serde_json::to_vec(self).unwrap_or_default();
        let mut buf = BytesMut::with_capacity(OptionsHeader::LEN + json.len());
        buf.put_slice(&OPTIONS_MAGIC);
        buf.put_i32_le(json.len() as i32);
        buf.put_slice(&json);
        buf.freeze()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Discovery announcement content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryPayload {
    #[serde(rename = "Name", alias = "name")]
    pub name: String,
    #[serde(rename = "Port", alias = "port")]
    pub port: u16,
}

impl DiscoveryPayload {
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(serde_json::to_vec(self).unwrap_or_default())
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(data)?)
    }
}

fn truncated(needed: usize, got: usize) -> ProtocolError {
    ProtocolError::Truncated(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        format!("need {} bytes, got {}", needed, got),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_header_layout() {
        let header = FrameHeader::video(0x0102_0304_0506_0708, 300);
        let bytes = header.encode();

        assert_eq!(bytes.len(), FrameHeader::LEN);
        assert_eq!(&bytes[..4], b"JPEG");
        assert_eq!(&bytes[4..12], &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[12..], &300i32.to_le_bytes());
        assert_eq!(FrameHeader::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn test_header_rejects_unknown_tag() {
        let mut bytes = FrameHeader::video(1, 1).encode().to_vec();
        bytes[..4].copy_from_slice(b"NOPE");
        assert!(matches!(
            FrameHeader::decode(&bytes),
            Err(ProtocolError::UnknownTag(t)) if &t == b"NOPE"
        ));
    }

    #[test]
    fn test_options_envelope() {
        let envelope = Options { quality: 42 }.encode();
        let header = OptionsHeader::decode(&envelope).unwrap();
        let size = header.validate(1024).unwrap();

        assert_eq!(&envelope[..4], b"OPTS");
        assert_eq!(size, envelope.len() - OptionsHeader::LEN);
        assert_eq!(&envelope[OptionsHeader::LEN..], br#"{"Quality":42}"#);
    }

    #[test]
    fn test_options_key_case() {
        assert_eq!(Options::decode(br#"{"Quality": 42}"#).unwrap().quality, 42);
        assert_eq!(Options::decode(br#"{"quality": 7}"#).unwrap().quality, 7);
        assert!(Options::decode(br#"{"Quality": "high"}"#).is_err());
    }

    #[test]
    fn test_options_keys_match_any_case() {
        assert_eq!(Options::decode(br#"{"QUALITY": 12}"#).unwrap().quality, 12);
        assert_eq!(Options::decode(br#"{"qUaLiTy": 13, "Extra": true}"#).unwrap().quality, 13);
        assert_eq!(Options::decode(br#"{"quality": 1, "Quality": 2}"#).unwrap().quality, 2);
        assert!(matches!(
            Options::decode(br#"{"Qualities": 3}"#),
            Err(ProtocolError::Decode(_))
        ));
    }

    #[test]
    fn test_options_header_validation() {
        let bad_magic = OptionsHeader { magic: *b"OPTX", size: 4 };
        assert!(matches!(bad_magic.validate(64), Err(ProtocolError::BadMagic(_))));

        let negative = OptionsHeader { magic: OPTIONS_MAGIC, size: -1 };
        assert!(matches!(negative.validate(64), Err(ProtocolError::InvalidSize(-1))));

        let oversized = OptionsHeader { magic: OPTIONS_MAGIC, size: 65 };
        assert!(oversized.validate(64).unwrap_err().is_violation());
    }

    #[test]
    fn test_discovery_payload_json() {
        let payload = DiscoveryPayload {
            name: "studio".into(),
            port: 40123,
        };
        let bytes = payload.to_bytes();
        assert_eq!(&bytes[..], br#"{"Name":"studio","Port":40123}"#);
        assert_eq!(DiscoveryPayload::from_bytes(&bytes).unwrap(), payload);
    }
}
