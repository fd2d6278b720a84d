//! Encoder stage: frames in, packets out.

use crate::backend::{find_encoder, EncodeBackend};
use crate::config::{CodecParameters, EncoderConfig};
use bytes::Bytes;
use mediastage_core::error::{ConfigError, Error, Result};
use mediastage_core::{
    EngineOutput, EngineSubmit, Frame, MediaParams, MediaType, Packet, PacketFlags,
    ProtocolPolicy, Session, SessionState, StageEngine, StageKind, StageSession, Timestamp,
};
use mediastage_hwaccel::{download, ensure_same_device, HardwareContext, HwAttachment, HwAware};
use std::collections::VecDeque;
use tracing::{debug, info, trace};

/// Configuration state of an encoder.
///
/// An encoder opened without a stream format starts `Unconfigured` and
/// becomes `Configured` with the format of the first submitted frame. Every
/// later frame must match it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderSetup {
    Unconfigured,
    Configured(MediaParams),
}

impl EncoderSetup {
    /// The configured stream format.
    pub fn media(&self) -> Option<&MediaParams> {
        match self {
            Self::Unconfigured => None,
            Self::Configured(m) => Some(m),
        }
    }
}

// Audio frames may carry any number of samples.
fn stream_format(frame: &Frame) -> MediaParams {
    match *frame.params() {
        MediaParams::Audio(mut a) => {
            a.nb_samples = 0;
            MediaParams::Audio(a)
        }
        video => video,
    }
}

fn check_compatible(expected: &MediaParams, frame: &Frame) -> std::result::Result<(), ConfigError> {
    match (expected, frame.params()) {
        (MediaParams::Video(e), MediaParams::Video(a)) => {
            if (e.width, e.height) != (a.width, a.height) {
                return Err(ConfigError::mismatch(
                    "frame size",
                    format!("{}x{}", e.width, e.height),
                    format!("{}x{}", a.width, a.height),
                ));
            }
            if e.format != a.format {
                return Err(ConfigError::mismatch("pixel format", e.format, a.format));
            }
        }
        (MediaParams::Audio(e), MediaParams::Audio(a)) => {
            if e.format != a.format {
                return Err(ConfigError::mismatch("sample format", e.format, a.format));
            }
            if e.sample_rate != a.sample_rate {
                return Err(ConfigError::mismatch("sample rate", e.sample_rate, a.sample_rate));
            }
            if e.channel_layout != a.channel_layout {
                return Err(ConfigError::mismatch("channel layout", e.channel_layout, a.channel_layout));
            }
        }
        (e, a) => return Err(ConfigError::mismatch("media type", e.media_type(), a.media_type())),
    }
    Ok(())
}

/// Stage-specific half of [`Encoder`].
#[derive(Debug)]
pub struct EncoderEngine {
    config: EncoderConfig,
    setup: EncoderSetup,
    backend: Option<Box<dyn EncodeBackend>>,
    ready: VecDeque<Packet>,
    // Encoded frames waiting for the next anchor, in presentation order.
    pending_b: Vec<Packet>,
    // Presentation timestamps in input order; the head becomes the next dts.
    input_pts: VecDeque<Timestamp>,
    dts_delay: Option<i64>,
    frame_index: u64,
    eof: bool,
    hw: Option<HwAttachment>,
}

impl EncoderEngine {
    fn configure(&mut self, media: MediaParams) -> Result<()> {
        if self.backend.is_none() {
            self.backend = Some(find_encoder(self.config.codec_id, &media)?);
        }
        self.setup = EncoderSetup::Configured(media);
        info!(codec = self.config.codec_id.name(), ?media, "encoder configured");
        Ok(())
    }

    fn to_software(&self, frame: &Frame) -> Result<Option<Frame>> {
        if !frame.is_hw_frame() {
            return Ok(None);
        }
        let Some(attachment) = self.hw.as_ref() else {
            return Err(ConfigError::Residency {
                location: format!("{} encoder without a hardware context", self.config.codec_id.name()),
                expected: "software".into(),
                actual: "hardware".into(),
            }
            .into());
        };
        ensure_same_device(attachment.context(), frame)?;
        Ok(Some(download(frame)?))
    }

    fn reorders(&self) -> bool {
        self.config.max_b_frames > 0 && self.config.codec_id.media_type() == MediaType::Video
    }

    fn emit(&mut self, mut packet: Packet, keyframe: bool, disposable: bool) {
        let pts = self.input_pts.pop_front().unwrap_or_else(|| Timestamp::none_in(self.config.time_base));
        let delay = self.dts_delay.unwrap_or(0);
        packet.dts = match pts.value() {
            Some(v) => Timestamp::new(v.saturating_sub(delay), self.config.time_base),
            None => Timestamp::none_in(self.config.time_base),
        };
        packet.set_keyframe(keyframe);
        packet.flags.set(PacketFlags::DISPOSABLE, disposable);
        trace!(pts = %packet.pts, dts = %packet.dts, keyframe, disposable, "packet encoded");
        self.ready.push_back(packet);
    }

    fn release_pending(&mut self) {
        for packet in std::mem::take(&mut self.pending_b) {
            self.emit(packet, false, true);
        }
    }
}

impl StageEngine for EncoderEngine {
    type Input = Frame;
    type Output = Packet;

    fn kind(&self) -> StageKind {
        StageKind::Encoder
    }

    fn open(&mut self) -> Result<()> {
        if let Some(media) = self.config.media {
            self.configure(media)?;
        }
        Ok(())
    }

    fn send(&mut self, input: &Frame) -> Result<EngineSubmit> {
        if self.ready.len() + self.pending_b.len() >= self.config.max_buffered_packets {
            return Ok(EngineSubmit::Full);
        }
        let downloaded = self.to_software(input)?;
        let frame = downloaded.as_ref().unwrap_or(input);

        match self.setup {
            EncoderSetup::Unconfigured => self.configure(stream_format(frame))?,
            EncoderSetup::Configured(expected) => check_compatible(&expected, frame)?,
        }
        let payload: Bytes = match self.backend.as_mut() {
            Some(backend) => backend.encode(frame)?,
            None => return Err(ConfigError::Missing("encoder backend".into()).into()),
        };

        let tb = self.config.time_base;
        let packet = Packet::new(payload)
            .with_pts(frame.pts.rescale(tb))
            .with_duration(frame.duration.rescale(tb))
            .with_time_base(tb);
        if self.dts_delay.is_none() {
            let tick = Some(packet.duration)
                .filter(|d| d.is_valid() && d.value > 0)
                .map_or(1, |d| d.value);
            let delay = if self.reorders() { self.config.max_b_frames as i64 * tick } else { 0 };
            self.dts_delay = Some(delay);
        }
        self.input_pts.push_back(packet.pts);

        let keyframe = self.config.codec_id.media_type() == MediaType::Audio
            || self.frame_index % u64::from(self.config.gop_size) == 0;
        self.frame_index += 1;

        if !self.reorders() {
            self.emit(packet, keyframe, false);
        } else if keyframe || self.pending_b.len() == self.config.max_b_frames {
            self.emit(packet, keyframe, false);
            self.release_pending();
        } else {
            self.pending_b.push(packet);
        }
        Ok(EngineSubmit::Accepted)
    }

    fn send_eof(&mut self) -> Result<EngineSubmit> {
        // The last pending frame becomes the closing anchor.
        if let Some(anchor) = self.pending_b.pop() {
            self.emit(anchor, false, false);
            self.release_pending();
        }
        self.eof = true;
        debug!(buffered = self.ready.len(), "encoder flushing");
        Ok(EngineSubmit::Accepted)
    }

    fn receive(&mut self) -> Result<EngineOutput<Packet>> {
        Ok(match self.ready.pop_front() {
            Some(packet) => EngineOutput::Ready(packet),
            None if self.eof => EngineOutput::Finished,
            None => EngineOutput::Pending,
        })
    }

    fn reset(&mut self) -> Result<()> {
        self.ready.clear();
        self.pending_b.clear();
        self.input_pts.clear();
        self.frame_index = 0;
        self.eof = false;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.ready.clear();
        self.pending_b.clear();
        self.input_pts.clear();
        if let Some(attachment) = self.hw.as_mut() {
            attachment.detach();
        }
        Ok(())
    }

    fn buffered(&self) -> usize {
        self.ready.len() + self.pending_b.len()
    }
}

/// Encoder stage.
#[derive(Debug)]
pub struct Encoder {
    session: Session<EncoderEngine>,
}

impl Encoder {
    /// Create an encoder using the built-in backend for the configured codec.
    pub fn new(config: EncoderConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Create an encoder around an external backend. The stream format must be configured.
    pub fn with_backend(config: EncoderConfig, backend: Box<dyn EncodeBackend>) -> Result<Self> {
        if backend.codec_id() != config.codec_id {
            return Err(ConfigError::mismatch("codec", config.codec_id.name(), backend.codec_id().name()).into());
        }
        if config.media.is_none() {
            return Err(ConfigError::Missing("stream format for an external encoder".into()).into());
        }
        Self::build(config, Some(backend))
    }

    fn build(config: EncoderConfig, backend: Option<Box<dyn EncodeBackend>>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            session: Session::new(EncoderEngine {
                config,
                setup: EncoderSetup::Unconfigured,
                backend,
                ready: VecDeque::new(),
                pending_b: Vec::new(),
                input_pts: VecDeque::new(),
                dts_delay: None,
                frame_index: 0,
                eof: false,
                hw: None,
            }),
        })
    }

    /// Set the protocol violation policy.
    pub fn with_policy(mut self, policy: ProtocolPolicy) -> Self {
        self.session = self.session.with_policy(policy);
        self
    }

    /// Bind the encoder to a hardware device so it accepts that device's frames.
    /// Must happen before `open`.
    pub fn attach_hardware(&mut self, ctx: &HardwareContext) -> Result<()> {
        if self.session.state() != SessionState::Unopened {
            return Err(Error::config("hardware must be attached before open"));
        }
        let attachment = HwAttachment::attach(ctx, self.session.id())?;
        self.session.engine_mut().hw = Some(attachment);
        Ok(())
    }

    /// Encoder configuration.
    pub fn config(&self) -> &EncoderConfig {
        &self.session.engine().config
    }

    /// Whether the stream format is known yet.
    pub fn setup(&self) -> &EncoderSetup {
        &self.session.engine().setup
    }

    /// Parameters for a matching decoder, once configured.
    pub fn codec_parameters(&self) -> Option<CodecParameters> {
        let engine = self.session.engine();
        let backend = engine.backend.as_ref()?;
        engine.setup.media()?;
        Some(CodecParameters {
            codec_id: engine.config.codec_id,
            media: backend.output_media(),
            time_base: engine.config.time_base,
            reorder_depth: if engine.reorders() { engine.config.max_b_frames } else { 0 },
            extradata: backend.extradata(),
        })
    }
}

mediastage_core::delegate_stage_session!(Encoder, session, Frame, Packet);

impl HwAware for Encoder {
    fn hardware_context(&self) -> Option<&HardwareContext> {
        self.session
            .engine()
            .hw
            .as_ref()
            .filter(|a| a.is_attached())
            .map(HwAttachment::context)
    }
}
