//! Resampler configuration.

use crate::error::{ResampleError, Result};
use crate::linear::MAX_RATIO;
use mediastage_core::{AudioParams, ChannelLayout, SampleFormat};

/// Input and output audio formats of a [`ResampleStage`](crate::ResampleStage).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResampleConfig {
    /// Input sample rate in Hz.
    pub input_rate: u32,
    /// Input sample format.
    pub input_format: SampleFormat,
    /// Input channel layout.
    pub input_layout: ChannelLayout,
    /// Output sample rate in Hz.
    pub output_rate: u32,
    /// Output sample format.
    pub output_format: SampleFormat,
    /// Output channel layout.
    pub output_layout: ChannelLayout,
    /// Samples per output frame; 0 emits whatever is available.
    pub frame_size: usize,
    /// Output samples buffered before `submit` reports `Busy`.
    pub max_buffered_samples: usize,
}

impl Default for ResampleConfig {
    fn default() -> Self {
        Self {
            input_rate: 48000,
            input_format: SampleFormat::F32,
            input_layout: ChannelLayout::STEREO,
            output_rate: 48000,
            output_format: SampleFormat::F32,
            output_layout: ChannelLayout::STEREO,
            frame_size: 0,
            max_buffered_samples: 16384,
        }
    }
}

impl ResampleConfig {
    /// Convert between two sample rates, keeping f32 stereo.
    pub fn new(input_rate: u32, output_rate: u32) -> Self {
        Self {
            input_rate,
            output_rate,
            ..Default::default()
        }
    }

    /// Convert between two stream formats. `nb_samples` is ignored.
    pub fn from_params(input: &AudioParams, output: &AudioParams) -> Self {
        Self::new(input.sample_rate, output.sample_rate)
            .with_input_format(input.format, input.channel_layout)
            .with_output_format(output.format, output.channel_layout)
    }

    /// Set the input sample format and layout.
    pub fn with_input_format(mut self, format: SampleFormat, layout: ChannelLayout) -> Self {
        self.input_format = format;
        self.input_layout = layout;
        self
    }

    /// Set the output sample format and layout.
    pub fn with_output_format(mut self, format: SampleFormat, layout: ChannelLayout) -> Self {
        self.output_format = format;
        self.output_layout = layout;
        self
    }

    /// Emit frames of exactly `frame_size` samples (the last one may be short).
    pub fn with_frame_size(mut self, frame_size: usize) -> Self {
        self.frame_size = frame_size;
        self
    }

    /// Set the output buffer limit.
    pub fn with_max_buffered_samples(mut self, samples: usize) -> Self {
        self.max_buffered_samples = samples;
        self
    }

    /// Output stream format with `nb_samples` set to 0.
    pub fn output_params(&self) -> AudioParams {
        AudioParams {
            format: self.output_format,
            sample_rate: self.output_rate,
            channel_layout: self.output_layout,
            nb_samples: 0,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        for rate in [self.input_rate, self.output_rate] {
            if rate == 0 {
                return Err(ResampleError::InvalidSampleRate { rate });
            }
        }
        for layout in [self.input_layout, self.output_layout] {
            if !layout.is_valid() {
                return Err(ResampleError::InvalidChannelLayout {
                    layout: layout.to_string(),
                });
            }
        }
        let ratio = f64::from(self.output_rate) / f64::from(self.input_rate);
        if !(1.0 / MAX_RATIO..=MAX_RATIO).contains(&ratio) {
            return Err(ResampleError::RatioTooExtreme { ratio });
        }
        // A full buffer must always hold at least one whole output frame.
        if self.max_buffered_samples <= self.frame_size {
            return Err(ResampleError::InvalidConfig(format!(
                "max_buffered_samples ({}) must exceed frame_size ({})",
                self.max_buffered_samples, self.frame_size
            )));
        }
        Ok(())
    }
}
