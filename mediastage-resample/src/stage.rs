//! The resampler as a submit/drain stage.

use crate::config::ResampleConfig;
use crate::error::ResampleError;
use crate::linear::LinearResampler;
use crate::remix::ChannelMixer;
use mediastage_core::error::Result;
use mediastage_core::{
    AudioParams, Duration, EngineOutput, EngineSubmit, Frame, ProtocolPolicy, SampleFormat,
    Session, StageEngine, StageKind, TimeBase, Timestamp,
};
use std::collections::VecDeque;
use tracing::{debug, trace};

// Interleaved normalized samples of a software audio frame.
fn read_interleaved(frame: &Frame, params: &AudioParams) -> std::result::Result<Vec<f32>, ResampleError> {
    let planes = frame
        .planes()
        .ok_or_else(|| ResampleError::internal("audio frame without sample planes"))?;
    let format = params.format;
    let bps = format.bytes_per_sample();
    let channels = params.channel_layout.nb_channels as usize;
    let n = params.nb_samples as usize;
    let mut out = Vec::with_capacity(n * channels);
    for i in 0..n {
        for ch in 0..channels {
            let bytes = if format.is_planar() {
                &planes[ch].data()[i * bps..]
            } else {
                &planes[0].data()[(i * channels + ch) * bps..]
            };
            out.push(format.read_normalized(bytes));
        }
    }
    Ok(out)
}

fn write_interleaved(frame: &mut Frame, format: SampleFormat, channels: usize, samples: &[f32]) -> Result<()> {
    let bps = format.bytes_per_sample();
    for (i, chunk) in samples.chunks_exact(channels).enumerate() {
        for (ch, value) in chunk.iter().enumerate() {
            let (plane, at) = if format.is_planar() {
                (ch, i * bps)
            } else {
                (0, (i * channels + ch) * bps)
            };
            let data = frame
                .plane_mut(plane)
                .ok_or_else(|| ResampleError::internal(format!("missing plane {plane}")))?
                .data_mut();
            format.write_normalized(*value, &mut data[at..at + bps]);
        }
    }
    Ok(())
}

/// Stage-specific half of [`ResampleStage`].
#[derive(Debug)]
pub struct ResampleEngine {
    config: ResampleConfig,
    mixer: ChannelMixer,
    resampler: LinearResampler,
    /// Interleaved output samples.
    fifo: VecDeque<f32>,
    out_time_base: TimeBase,
    next_pts: Option<i64>,
    eof: bool,
}

impl ResampleEngine {
    fn out_channels(&self) -> usize {
        self.mixer.out_channels()
    }

    fn buffered_samples(&self) -> usize {
        self.fifo.len() / self.out_channels()
    }

    fn check_input(&self, frame: &Frame) -> std::result::Result<AudioParams, ResampleError> {
        let Some(params) = frame.audio_params() else {
            return Err(ResampleError::mismatch("media type", "audio", frame.media_type()));
        };
        let c = &self.config;
        if params.format != c.input_format {
            return Err(ResampleError::mismatch("sample format", c.input_format, params.format));
        }
        if params.sample_rate != c.input_rate {
            return Err(ResampleError::mismatch("sample rate", c.input_rate, params.sample_rate));
        }
        if params.channel_layout != c.input_layout {
            return Err(ResampleError::mismatch("channel layout", c.input_layout, params.channel_layout));
        }
        Ok(*params)
    }

    fn take_frame(&mut self, samples: usize) -> Result<Frame> {
        let channels = self.out_channels();
        let data: Vec<f32> = self.fifo.drain(..samples * channels).collect();
        let c = &self.config;
        let mut frame = Frame::audio(c.output_format, c.output_layout, c.output_rate, samples as u32)?;
        write_interleaved(&mut frame, c.output_format, channels, &data)?;
        frame.pts = match self.next_pts {
            Some(pts) => Timestamp::new(pts, self.out_time_base),
            None => Timestamp::none_in(self.out_time_base),
        };
        frame.duration = Duration::new(samples as i64, self.out_time_base);
        if let Some(pts) = self.next_pts.as_mut() {
            *pts += samples as i64;
        }
        trace!(samples, pts = %frame.pts, "resampled frame");
        Ok(frame)
    }
}

impl StageEngine for ResampleEngine {
    type Input = Frame;
    type Output = Frame;

    fn kind(&self) -> StageKind {
        StageKind::Resample
    }

    fn open(&mut self) -> Result<()> {
        debug!(
            input_rate = self.config.input_rate,
            output_rate = self.config.output_rate,
            input_layout = %self.config.input_layout,
            output_layout = %self.config.output_layout,
            remix = !self.mixer.is_identity(),
            "resampler opened"
        );
        Ok(())
    }

    fn send(&mut self, frame: &Frame) -> Result<EngineSubmit> {
        if self.buffered_samples() >= self.config.max_buffered_samples {
            return Ok(EngineSubmit::Full);
        }
        let params = self.check_input(frame)?;
        if self.next_pts.is_none() && self.resampler.produced() == 0 {
            self.next_pts = frame.pts.rescale(self.out_time_base).value();
        }
        let input = read_interleaved(frame, &params)?;
        let mixed = self.mixer.mix(&input);
        let output = self.resampler.process(&mixed)?;
        self.fifo.extend(output);
        Ok(EngineSubmit::Accepted)
    }

    fn send_eof(&mut self) -> Result<EngineSubmit> {
        let tail = self.resampler.flush();
        self.fifo.extend(tail);
        self.eof = true;
        debug!(buffered = self.buffered_samples(), "resampler flushing");
        Ok(EngineSubmit::Accepted)
    }

    fn receive(&mut self) -> Result<EngineOutput<Frame>> {
        let available = self.buffered_samples();
        let take = match self.config.frame_size {
            0 => available,
            size if available >= size => size,
            _ if self.eof => available,
            _ => 0,
        };
        if take > 0 {
            return Ok(EngineOutput::Ready(self.take_frame(take)?));
        }
        Ok(if self.eof {
            EngineOutput::Finished
        } else {
            EngineOutput::Pending
        })
    }

    fn reset(&mut self) -> Result<()> {
        self.fifo.clear();
        self.resampler.reset();
        self.next_pts = None;
        self.eof = false;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.fifo.clear();
        Ok(())
    }

    fn buffered(&self) -> usize {
        self.buffered_samples()
    }
}

/// Sample rate, sample format and channel layout conversion stage.
///
/// Output timestamps are in `1/output_rate` and continue from the first
/// input frame's timestamp without gaps.
#[derive(Debug)]
pub struct ResampleStage {
    session: Session<ResampleEngine>,
}

impl ResampleStage {
    /// Create a resampler.
    pub fn new(config: ResampleConfig) -> Result<Self> {
        config.validate()?;
        let mixer = ChannelMixer::new(&config.input_layout, &config.output_layout);
        let resampler = LinearResampler::new(config.input_rate, config.output_rate, mixer.out_channels())?;
        Ok(Self {
            session: Session::new(ResampleEngine {
                config,
                mixer,
                resampler,
                fifo: VecDeque::new(),
                out_time_base: TimeBase::from_sample_rate(config.output_rate),
                next_pts: None,
                eof: false,
            }),
        })
    }

    /// Set the protocol violation policy.
    pub fn with_policy(mut self, policy: ProtocolPolicy) -> Self {
        self.session = self.session.with_policy(policy);
        self
    }

    /// Resampler configuration.
    pub fn config(&self) -> &ResampleConfig {
        &self.session.engine().config
    }

    /// Output stream format.
    pub fn output_params(&self) -> AudioParams {
        self.session.engine().config.output_params()
    }
}

mediastage_core::delegate_stage_session!(ResampleStage, session, Frame, Frame);
