//! Filter graph configuration.

use crate::error::{FilterError, Result};
use crate::node::{LinkFormat, SinkResidency};
use mediastage_core::error::ConfigError;
use mediastage_core::{AudioParams, MediaParams, PixelFormat, VideoParams};

/// Format of the frames submitted to a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BufferSourceParams {
    /// Frame parameters; a hardware pixel format makes the source hardware resident.
    pub params: MediaParams,
    /// Format of the data inside device surfaces, for hardware sources.
    pub sw_format: Option<PixelFormat>,
}

impl BufferSourceParams {
    /// Software video.
    pub fn video(width: u32, height: u32, format: PixelFormat) -> Self {
        Self::from_params(MediaParams::Video(VideoParams::new(width, height, format)))
    }

    /// Device-resident video holding `sw_format` data, e.g. from a hardware decoder.
    pub fn hardware_video(width: u32, height: u32, hw_format: PixelFormat, sw_format: PixelFormat) -> Self {
        Self {
            params: MediaParams::Video(VideoParams::new(width, height, hw_format)),
            sw_format: Some(sw_format),
        }
    }

    /// Audio. `nb_samples` is ignored.
    pub fn audio(params: AudioParams) -> Self {
        Self::from_params(MediaParams::Audio(AudioParams { nb_samples: 0, ..params }))
    }

    /// Any stream format. Hardware video is assumed to hold `nv12` data.
    pub fn from_params(params: MediaParams) -> Self {
        let link = LinkFormat::new(params);
        Self {
            params,
            sw_format: link.sw_format,
        }
    }

    /// Format of the graph's source link.
    pub fn link_format(&self) -> LinkFormat {
        match self.sw_format {
            Some(sw_format) => LinkFormat::hardware(self.params, sw_format),
            None => LinkFormat::new(self.params),
        }
    }

    fn validate(&self) -> std::result::Result<(), ConfigError> {
        match &self.params {
            MediaParams::Video(v) => {
                if v.width == 0 || v.height == 0 {
                    return Err(ConfigError::Invalid(format!(
                        "invalid source size {}x{}",
                        v.width, v.height
                    )));
                }
                if let Some(sw) = self.sw_format.filter(|_| v.format.is_hardware()) {
                    if sw.is_hardware() {
                        return Err(ConfigError::Invalid(format!(
                            "surface data format {sw} is not a software format"
                        )));
                    }
                }
            }
            MediaParams::Audio(a) => {
                if a.sample_rate == 0 || !a.channel_layout.is_valid() {
                    return Err(ConfigError::Invalid(format!(
                        "invalid audio source {} Hz, {}",
                        a.sample_rate, a.channel_layout
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Filter graph settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FilterGraphConfig {
    /// Format of submitted frames.
    pub source: BufferSourceParams,
    /// Name of the source pad in descriptions and links.
    pub source_pad: String,
    /// Name of the sink pad in descriptions and links.
    pub sink_pad: String,
    /// Residency the consumer of the graph's output accepts.
    pub sink_residency: SinkResidency,
    /// Filtered frames held before `submit` reports `Busy`.
    pub max_buffered_frames: usize,
}

impl FilterGraphConfig {
    /// Default pads `in` and `out`, any output residency.
    pub fn new(source: BufferSourceParams) -> Self {
        Self {
            source,
            source_pad: "in".into(),
            sink_pad: "out".into(),
            sink_residency: SinkResidency::Any,
            max_buffered_frames: 8,
        }
    }

    /// Require a residency on the sink pad.
    pub fn with_sink_residency(mut self, residency: SinkResidency) -> Self {
        self.sink_residency = residency;
        self
    }

    /// Rename the source and sink pads.
    pub fn with_pads(mut self, source: impl Into<String>, sink: impl Into<String>) -> Self {
        self.source_pad = source.into();
        self.sink_pad = sink.into();
        self
    }

    /// Set the output buffer limit.
    pub fn with_max_buffered_frames(mut self, frames: usize) -> Self {
        self.max_buffered_frames = frames;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        self.source.validate()?;
        if self.source_pad.is_empty() || self.sink_pad.is_empty() {
            return Err(ConfigError::Invalid("pad names must not be empty".into()).into());
        }
        if self.source_pad == self.sink_pad {
            return Err(FilterError::Duplicate {
                what: "pad",
                name: self.source_pad.clone(),
            });
        }
        if self.max_buffered_frames == 0 {
            return Err(ConfigError::Invalid("max_buffered_frames must be positive".into()).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediastage_core::{ChannelLayout, SampleFormat};

    #[test]
    fn test_source_residency() {
        let sw = BufferSourceParams::video(64, 32, PixelFormat::Yuv420p);
        assert_eq!(sw.sw_format, None);
        let hw = BufferSourceParams::hardware_video(64, 32, PixelFormat::Vaapi, PixelFormat::Yuv420p);
        assert_eq!(hw.link_format().sw_format, Some(PixelFormat::Yuv420p));
        let implied = BufferSourceParams::from_params(hw.params);
        assert_eq!(implied.sw_format, Some(PixelFormat::Nv12));
    }

    #[test]
    fn test_validation() {
        let source = BufferSourceParams::video(64, 32, PixelFormat::Yuv420p);
        assert!(FilterGraphConfig::new(source).validate().is_ok());
        assert!(FilterGraphConfig::new(source).with_pads("x", "x").validate().is_err());
        assert!(FilterGraphConfig::new(source)
            .with_max_buffered_frames(0)
            .validate()
            .is_err());
        assert!(FilterGraphConfig::new(BufferSourceParams::video(0, 32, PixelFormat::Nv12))
            .validate()
            .is_err());

        let audio = BufferSourceParams::audio(AudioParams {
            format: SampleFormat::F32,
            sample_rate: 48000,
            channel_layout: ChannelLayout::STEREO,
            nb_samples: 1024,
        });
        assert!(matches!(audio.params, MediaParams::Audio(a) if a.nb_samples == 0));
        assert!(FilterGraphConfig::new(audio).validate().is_ok());
    }
}
