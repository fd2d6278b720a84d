//! Stage configuration.

use bytes::Bytes;
use mediastage_core::error::ConfigError;
use mediastage_core::{CodecId, MediaParams, TimeBase};

/// Stream description handed from an encoder to a matching decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct CodecParameters {
    /// Codec.
    pub codec_id: CodecId,
    /// Stream format.
    pub media: MediaParams,
    /// Time base of packet timestamps.
    pub time_base: TimeBase,
    /// Frames a decoder must hold back to restore presentation order.
    pub reorder_depth: usize,
    /// Codec specific configuration record.
    pub extradata: Bytes,
}

/// Decoder configuration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DecoderConfig {
    /// Codec to decode.
    pub codec_id: CodecId,
    /// Stream format. Required by the built-in raw backends.
    pub media: Option<MediaParams>,
    /// Time base of incoming packets.
    pub time_base: TimeBase,
    /// Frames held back to restore presentation order.
    pub reorder_depth: usize,
    /// Decoded frames buffered before `submit` reports `Busy`.
    pub max_buffered_frames: usize,
    /// Emit device-resident frames when a hardware context is attached.
    pub hw_output: bool,
    /// Surfaces in the derived hardware frame pool.
    pub hw_pool_size: usize,
}

impl DecoderConfig {
    /// Create a configuration for a codec.
    pub fn new(codec_id: CodecId) -> Self {
        Self {
            codec_id,
            media: None,
            time_base: TimeBase::MPEG,
            reorder_depth: 0,
            max_buffered_frames: 16,
            hw_output: false,
            hw_pool_size: 8,
        }
    }

    /// Configure a decoder for a stream produced by an encoder.
    pub fn from_parameters(params: &CodecParameters) -> Self {
        Self {
            media: Some(params.media),
            time_base: params.time_base,
            reorder_depth: params.reorder_depth,
            ..Self::new(params.codec_id)
        }
    }

    /// Set the stream format.
    pub fn with_media(mut self, media: MediaParams) -> Self {
        self.media = Some(media);
        self
    }

    /// Set the packet time base.
    pub fn with_time_base(mut self, time_base: TimeBase) -> Self {
        self.time_base = time_base;
        self
    }

    /// Set the reorder depth.
    pub fn with_reorder_depth(mut self, depth: usize) -> Self {
        self.reorder_depth = depth;
        self
    }

    /// Set the output buffer limit.
    pub fn with_max_buffered_frames(mut self, frames: usize) -> Self {
        self.max_buffered_frames = frames;
        self
    }

    /// Request device-resident output.
    pub fn with_hw_output(mut self, hw_output: bool) -> Self {
        self.hw_output = hw_output;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_buffered_frames <= self.reorder_depth {
            return Err(ConfigError::Invalid(format!(
                "max_buffered_frames ({}) must exceed reorder_depth ({})",
                self.max_buffered_frames, self.reorder_depth
            )));
        }
        if let Some(media) = &self.media {
            if media.media_type() != self.codec_id.media_type() {
                return Err(ConfigError::mismatch(
                    "media type",
                    self.codec_id.media_type(),
                    media.media_type(),
                ));
            }
        }
        if self.hw_output && self.hw_pool_size == 0 {
            return Err(ConfigError::Invalid("hw_pool_size must be positive".into()));
        }
        Ok(())
    }
}

/// Encoder configuration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EncoderConfig {
    /// Codec to encode.
    pub codec_id: CodecId,
    /// Stream format. `None` takes it from the first frame.
    pub media: Option<MediaParams>,
    /// Time base of outgoing packets.
    pub time_base: TimeBase,
    /// Distance between keyframes, in frames.
    pub gop_size: u32,
    /// Frames coded out of presentation order between two anchors.
    pub max_b_frames: usize,
    /// Encoded packets buffered before `submit` reports `Busy`.
    pub max_buffered_packets: usize,
}

impl EncoderConfig {
    /// Create a configuration for a codec.
    pub fn new(codec_id: CodecId) -> Self {
        Self {
            codec_id,
            media: None,
            time_base: TimeBase::MPEG,
            gop_size: 12,
            max_b_frames: 0,
            max_buffered_packets: 16,
        }
    }

    /// Fix the stream format at open.
    pub fn with_media(mut self, media: MediaParams) -> Self {
        self.media = Some(media);
        self
    }

    /// Set the packet time base.
    pub fn with_time_base(mut self, time_base: TimeBase) -> Self {
        self.time_base = time_base;
        self
    }

    /// Set the keyframe interval.
    pub fn with_gop_size(mut self, gop_size: u32) -> Self {
        self.gop_size = gop_size;
        self
    }

    /// Set the number of reordered frames between anchors.
    pub fn with_max_b_frames(mut self, max_b_frames: usize) -> Self {
        self.max_b_frames = max_b_frames;
        self
    }

    /// Set the output buffer limit.
    pub fn with_max_buffered_packets(mut self, packets: usize) -> Self {
        self.max_buffered_packets = packets;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gop_size == 0 {
            return Err(ConfigError::Invalid("gop_size must be positive".into()));
        }
        // One anchor releases itself plus every pending B frame at once.
        if self.max_buffered_packets <= self.max_b_frames {
            return Err(ConfigError::Invalid(format!(
                "max_buffered_packets ({}) must exceed max_b_frames ({})",
                self.max_buffered_packets, self.max_b_frames
            )));
        }
        if let Some(media) = &self.media {
            if media.media_type() != self.codec_id.media_type() {
                return Err(ConfigError::mismatch(
                    "media type",
                    self.codec_id.media_type(),
                    media.media_type(),
                ));
            }
            if let MediaParams::Video(v) = media {
                if v.format.is_hardware() {
                    return Err(ConfigError::Residency {
                        location: "encoder configuration".into(),
                        expected: "software".into(),
                        actual: v.format.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Bitstream filter configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BitstreamFilterConfig {
    /// Filter name: `null`, `h264_mp4toannexb` or `nal_split`.
    pub name: String,
    /// Output packets buffered before `submit` reports `Busy`.
    pub max_buffered_packets: usize,
}

impl BitstreamFilterConfig {
    /// Configure the named filter.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_buffered_packets: 64,
        }
    }

    /// Set the output buffer limit.
    pub fn with_max_buffered_packets(mut self, packets: usize) -> Self {
        self.max_buffered_packets = packets;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if crate::bsf::BitstreamFilterKind::from_name(&self.name).is_none() {
            return Err(ConfigError::Invalid(format!("unknown bitstream filter {}", self.name)));
        }
        if self.max_buffered_packets == 0 {
            return Err(ConfigError::Invalid("max_buffered_packets must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediastage_core::{PixelFormat, VideoParams};

    #[test]
    fn test_decoder_config_validation() {
        let cfg = DecoderConfig::new(CodecId::RawVideo).with_reorder_depth(2);
        assert!(cfg.validate().is_ok());
        assert!(cfg.clone().with_max_buffered_frames(2).validate().is_err());

        let audio_media = MediaParams::Audio(mediastage_core::AudioParams {
            format: mediastage_core::SampleFormat::S16,
            sample_rate: 48000,
            channel_layout: mediastage_core::ChannelLayout::STEREO,
            nb_samples: 0,
        });
        assert!(matches!(
            cfg.with_media(audio_media).validate(),
            Err(ConfigError::Mismatch { what: "media type", .. })
        ));
    }

    #[test]
    fn test_encoder_config_validation() {
        assert!(EncoderConfig::new(CodecId::RawVideo).validate().is_ok());
        assert!(EncoderConfig::new(CodecId::RawVideo)
            .with_gop_size(0)
            .validate()
            .is_err());
        assert!(EncoderConfig::new(CodecId::RawVideo)
            .with_max_b_frames(4)
            .with_max_buffered_packets(4)
            .validate()
            .is_err());
        let hw = MediaParams::Video(VideoParams::new(64, 64, PixelFormat::Cuda));
        assert!(matches!(
            EncoderConfig::new(CodecId::RawVideo).with_media(hw).validate(),
            Err(ConfigError::Residency { .. })
        ));
    }

    #[test]
    fn test_from_parameters() {
        let params = CodecParameters {
            codec_id: CodecId::RawVideo,
            media: MediaParams::Video(VideoParams::new(32, 16, PixelFormat::Gray8)),
            time_base: TimeBase::MILLISECONDS,
            reorder_depth: 2,
            extradata: Bytes::new(),
        };
        let cfg = DecoderConfig::from_parameters(&params);
        assert_eq!(cfg.reorder_depth, 2);
        assert_eq!(cfg.time_base, TimeBase::MILLISECONDS);
        assert_eq!(cfg.media, Some(params.media));
    }
}
