//! Codec and media type identifiers.

use std::fmt;

/// Kind of media carried by a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MediaType {
    Video,
    Audio,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

/// Codec identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CodecId {
    /// Uncompressed video, one packed picture per packet.
    RawVideo,
    /// H.264 / AVC.
    H264,
    /// H.265 / HEVC.
    Hevc,
    /// Signed 16-bit little-endian PCM.
    PcmS16le,
    /// 32-bit float little-endian PCM.
    PcmF32le,
    /// AAC.
    Aac,
}

impl CodecId {
    /// Media type produced by this codec.
    pub fn media_type(&self) -> MediaType {
        match self {
            Self::RawVideo | Self::H264 | Self::Hevc => MediaType::Video,
            Self::PcmS16le | Self::PcmF32le | Self::Aac => MediaType::Audio,
        }
    }

    /// Get the codec name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RawVideo => "rawvideo",
            Self::H264 => "h264",
            Self::Hevc => "hevc",
            Self::PcmS16le => "pcm_s16le",
            Self::PcmF32le => "pcm_f32le",
            Self::Aac => "aac",
        }
    }

    /// Look up a codec by name.
    pub fn from_name(name: &str) -> Option<Self> {
        [
            Self::RawVideo,
            Self::H264,
            Self::Hevc,
            Self::PcmS16le,
            Self::PcmF32le,
            Self::Aac,
        ]
        .into_iter()
        .find(|c| c.name() == name)
    }
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_names_round_trip() {
        for name in ["rawvideo", "h264", "hevc", "pcm_s16le", "pcm_f32le", "aac"] {
            assert_eq!(CodecId::from_name(name).map(|c| c.name()), Some(name));
        }
        assert_eq!(CodecId::from_name("vp9"), None);
    }

    #[test]
    fn test_media_type() {
        assert_eq!(CodecId::RawVideo.media_type(), MediaType::Video);
        assert_eq!(CodecId::PcmF32le.media_type(), MediaType::Audio);
    }
}
