//! Codec backends and the built-in registry.

use crate::pcm::{PcmDecoder, PcmEncoder};
use crate::rawvideo::{RawVideoDecoder, RawVideoEncoder};
use bytes::Bytes;
use mediastage_core::error::{ConfigError, Error, Result};
use mediastage_core::{CodecId, Frame, MediaParams, Packet};
use std::fmt;

/// Information about a codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecDescriptor {
    /// Codec.
    pub id: CodecId,
    /// Long name/description.
    pub long_name: &'static str,
    /// Whether a built-in decoder exists.
    pub can_decode: bool,
    /// Whether a built-in encoder exists.
    pub can_encode: bool,
}

const DESCRIPTORS: &[CodecDescriptor] = &[
    CodecDescriptor {
        id: CodecId::RawVideo,
        long_name: "raw video",
        can_decode: true,
        can_encode: true,
    },
    CodecDescriptor {
        id: CodecId::PcmS16le,
        long_name: "PCM signed 16-bit little-endian",
        can_decode: true,
        can_encode: true,
    },
    CodecDescriptor {
        id: CodecId::PcmF32le,
        long_name: "PCM 32-bit floating point little-endian",
        can_decode: true,
        can_encode: true,
    },
    CodecDescriptor {
        id: CodecId::H264,
        long_name: "H.264 / AVC / MPEG-4 part 10",
        can_decode: false,
        can_encode: false,
    },
    CodecDescriptor {
        id: CodecId::Hevc,
        long_name: "H.265 / HEVC",
        can_decode: false,
        can_encode: false,
    },
    CodecDescriptor {
        id: CodecId::Aac,
        long_name: "AAC (Advanced Audio Coding)",
        can_decode: false,
        can_encode: false,
    },
];

/// Every codec the registry knows about.
pub fn codec_descriptors() -> &'static [CodecDescriptor] {
    DESCRIPTORS
}

/// Turns one packet into one frame.
///
/// Timing and flags are copied by the decoder stage; backends only deal with
/// the payload.
pub trait DecodeBackend: Send + fmt::Debug {
    /// Codec handled by this backend.
    fn codec_id(&self) -> CodecId;

    /// Decode one packet.
    fn decode(&mut self, packet: &Packet) -> Result<Frame>;

    /// Drop any codec state.
    fn reset(&mut self) {}
}

/// Turns one frame into one packet payload.
pub trait EncodeBackend: Send + fmt::Debug {
    /// Codec handled by this backend.
    fn codec_id(&self) -> CodecId;

    /// Encode one software frame.
    fn encode(&mut self, frame: &Frame) -> Result<Bytes>;

    /// Codec configuration record.
    fn extradata(&self) -> Bytes {
        Bytes::new()
    }

    /// Format a decoder of this backend's output produces.
    fn output_media(&self) -> MediaParams;
}

fn no_backend(id: CodecId, what: &str) -> Error {
    Error::unsupported(format!("no built-in {} {what}", id.name()))
}

fn require_media(id: CodecId, media: Option<&MediaParams>) -> Result<MediaParams> {
    let media = media.ok_or_else(|| ConfigError::Missing(format!("stream format for {}", id.name())))?;
    if media.media_type() != id.media_type() {
        return Err(ConfigError::mismatch("media type", id.media_type(), media.media_type()).into());
    }
    Ok(*media)
}

/// Create a built-in decoder backend.
pub fn find_decoder(id: CodecId, media: Option<&MediaParams>) -> Result<Box<dyn DecodeBackend>> {
    match (id, require_media(id, media)?) {
        (CodecId::RawVideo, MediaParams::Video(v)) => Ok(Box::new(RawVideoDecoder::new(v)?)),
        (CodecId::PcmS16le | CodecId::PcmF32le, MediaParams::Audio(a)) => {
            Ok(Box::new(PcmDecoder::new(id, a)?))
        }
        _ => Err(no_backend(id, "decoder")),
    }
}

/// Create a built-in encoder backend.
pub fn find_encoder(id: CodecId, media: &MediaParams) -> Result<Box<dyn EncodeBackend>> {
    match (id, require_media(id, Some(media))?) {
        (CodecId::RawVideo, MediaParams::Video(v)) => Ok(Box::new(RawVideoEncoder::new(v)?)),
        (CodecId::PcmS16le | CodecId::PcmF32le, MediaParams::Audio(a)) => {
            Ok(Box::new(PcmEncoder::new(id, a)?))
        }
        _ => Err(no_backend(id, "encoder")),
    }
}
