//! Decoder stage: packets in, frames out.

use crate::backend::{find_decoder, DecodeBackend};
use crate::config::DecoderConfig;
use crate::reorder::ReorderBuffer;
use mediastage_core::error::{ConfigError, Result};
use mediastage_core::{
    EngineOutput, EngineSubmit, Frame, FrameFlags, MediaParams, Packet, PacketFlags,
    ProtocolPolicy, Session, SessionState, StageEngine, StageKind, StageSession,
};
use mediastage_hwaccel::{HardwareContext, HwAttachment, HwAware, HwFramesContext, HwFramesParams};
use std::sync::Arc;
use tracing::{debug, trace};

/// Stage-specific half of [`Decoder`].
#[derive(Debug)]
pub struct DecoderEngine {
    config: DecoderConfig,
    backend: Option<Box<dyn DecodeBackend>>,
    reorder: ReorderBuffer,
    eof: bool,
    hw: Option<HwAttachment>,
    pool: Option<Arc<HwFramesContext>>,
}

impl DecoderEngine {
    fn derive_pool(&self, attachment: &HwAttachment) -> Result<Arc<HwFramesContext>> {
        let ctx = attachment.context();
        let video = match self.config.media {
            Some(MediaParams::Video(v)) => v,
            _ => return Err(ConfigError::Missing("video stream format for hardware output".into()).into()),
        };
        let hw_format = ctx
            .device_type()
            .hw_pixel_format()
            .ok_or_else(|| ConfigError::Missing("hardware pixel format".into()))?;
        let params = HwFramesParams::new(
            video.width,
            video.height,
            video.format,
            hw_format,
            self.config.hw_pool_size,
        );
        Ok(ctx.derive_frames_context(params)?)
    }

    fn emit(&self, frame: Frame) -> Result<Frame> {
        match &self.pool {
            Some(pool) => Ok(pool.upload(&frame)?),
            None => Ok(frame),
        }
    }
}

impl StageEngine for DecoderEngine {
    type Input = Packet;
    type Output = Frame;

    fn kind(&self) -> StageKind {
        StageKind::Decoder
    }

    fn is_flush_marker(packet: &Packet) -> bool {
        packet.is_flush()
    }

    fn open(&mut self) -> Result<()> {
        if self.backend.is_none() {
            self.backend = Some(find_decoder(self.config.codec_id, self.config.media.as_ref())?);
        }
        if self.config.hw_output {
            if let Some(attachment) = &self.hw {
                let pool = self.derive_pool(attachment)?;
                debug!(codec = self.config.codec_id.name(), pool = pool.id(), "decoder emits hardware frames");
                self.pool = Some(pool);
            } else {
                debug!(codec = self.config.codec_id.name(), "hw_output without a hardware context, emitting software frames");
            }
        }
        Ok(())
    }

    fn send(&mut self, packet: &Packet) -> Result<EngineSubmit> {
        if self.reorder.len() >= self.config.max_buffered_frames {
            return Ok(EngineSubmit::Full);
        }
        let Some(backend) = self.backend.as_mut() else {
            return Err(ConfigError::Missing("decoder backend".into()).into());
        };
        let mut frame = backend.decode(packet)?;
        frame.pts = packet.pts.rescale(self.config.time_base);
        frame.duration = packet.duration.rescale(self.config.time_base);
        frame.flags.set(FrameFlags::KEYFRAME, packet.is_keyframe());
        frame.flags.set(FrameFlags::CORRUPT, packet.flags.contains(PacketFlags::CORRUPT));
        trace!(pts = %frame.pts, size = packet.size(), "packet decoded");
        if packet.flags.contains(PacketFlags::DISCARD) {
            trace!(pts = %frame.pts, "discarding decoded frame");
        } else {
            self.reorder.push(frame);
        }
        Ok(EngineSubmit::Accepted)
    }

    fn send_eof(&mut self) -> Result<EngineSubmit> {
        self.eof = true;
        debug!(buffered = self.reorder.len(), "decoder flushing");
        Ok(EngineSubmit::Accepted)
    }

    fn receive(&mut self) -> Result<EngineOutput<Frame>> {
        let next = if self.eof {
            self.reorder.pop_first()
        } else {
            self.reorder.pop_ready()
        };
        Ok(match next {
            Some(frame) => EngineOutput::Ready(self.emit(frame)?),
            None if self.eof => EngineOutput::Finished,
            None => EngineOutput::Pending,
        })
    }

    fn reset(&mut self) -> Result<()> {
        self.reorder.clear();
        self.eof = false;
        if let Some(backend) = self.backend.as_mut() {
            backend.reset();
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.reorder.clear();
        self.pool = None;
        if let Some(attachment) = self.hw.as_mut() {
            attachment.detach();
        }
        Ok(())
    }

    fn buffered(&self) -> usize {
        self.reorder.len()
    }
}

/// Decoder stage.
///
/// Frames leave in presentation order: with a reorder depth of `n` the first
/// frame is produced once `n + 1` packets were decoded, and flushing releases
/// the rest.
#[derive(Debug)]
pub struct Decoder {
    session: Session<DecoderEngine>,
}

impl Decoder {
    /// Create a decoder using the built-in backend for the configured codec.
    pub fn new(config: DecoderConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Create a decoder around an external backend.
    pub fn with_backend(config: DecoderConfig, backend: Box<dyn DecodeBackend>) -> Result<Self> {
        if backend.codec_id() != config.codec_id {
            return Err(ConfigError::mismatch("codec", config.codec_id.name(), backend.codec_id().name()).into());
        }
        Self::build(config, Some(backend))
    }

    fn build(config: DecoderConfig, backend: Option<Box<dyn DecodeBackend>>) -> Result<Self> {
        config.validate()?;
        let reorder = ReorderBuffer::new(config.reorder_depth);
        Ok(Self {
            session: Session::new(DecoderEngine {
                config,
                backend,
                reorder,
                eof: false,
                hw: None,
                pool: None,
            }),
        })
    }

    /// Set the protocol violation policy.
    pub fn with_policy(mut self, policy: ProtocolPolicy) -> Self {
        self.session = self.session.with_policy(policy);
        self
    }

    /// Bind the decoder to a hardware device. Must happen before `open`.
    pub fn attach_hardware(&mut self, ctx: &HardwareContext) -> Result<()> {
        if self.session.state() != SessionState::Unopened {
            return Err(mediastage_core::Error::config("hardware must be attached before open"));
        }
        let attachment = HwAttachment::attach(ctx, self.session.id())?;
        self.session.engine_mut().hw = Some(attachment);
        Ok(())
    }

    /// Decoder configuration.
    pub fn config(&self) -> &DecoderConfig {
        &self.session.engine().config
    }

    /// The hardware frame pool output frames are allocated from.
    pub fn frames_context(&self) -> Option<&Arc<HwFramesContext>> {
        self.session.engine().pool.as_ref()
    }
}

mediastage_core::delegate_stage_session!(Decoder, session, Packet, Frame);

impl HwAware for Decoder {
    fn hardware_context(&self) -> Option<&HardwareContext> {
        self.session
            .engine()
            .hw
            .as_ref()
            .filter(|a| a.is_attached())
            .map(HwAttachment::context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediastage_core::{
        drive, CodecId, DrainStatus, Error, PixelFormat, SubmitStatus, TimeBase, Timestamp,
        VideoParams,
    };
    use mediastage_hwaccel::{HwDeviceType, LoopbackConfig, LoopbackDriver};

    fn gray(width: u32, height: u32) -> MediaParams {
        MediaParams::Video(VideoParams::new(width, height, PixelFormat::Gray8))
    }

    fn packet(pts: i64, fill: u8) -> Packet {
        Packet::new(vec![fill; 16 * 16]).with_pts(Timestamp::new(pts, TimeBase::MPEG))
    }

    fn decoder(depth: usize) -> Decoder {
        let mut d = Decoder::new(
            DecoderConfig::new(CodecId::RawVideo)
                .with_media(gray(16, 16))
                .with_reorder_depth(depth),
        )
        .unwrap();
        d.open().unwrap();
        d
    }

    #[test]
    fn test_decode_one_packet() {
        let mut d = decoder(0);
        assert_eq!(d.submit(Some(&packet(0, 9))).unwrap(), SubmitStatus::Accepted);
        let frame = d.drain().unwrap().into_produced().unwrap();
        assert_eq!((frame.width(), frame.height()), (16, 16));
        assert_eq!(frame.plane(0).unwrap().row(15)[15], 9);
        assert!(matches!(d.drain().unwrap(), DrainStatus::NeedsInput));
    }

    #[test]
    fn test_reordering_and_flush() {
        let mut d = decoder(2);
        let mut out = Vec::new();
        let packets: Vec<Packet> = [0, 3, 1, 2].iter().map(|&p| packet(p, 0)).collect();
        drive(&mut d, packets, |f: Frame| {
            out.push(f.pts.value().unwrap());
            Ok::<(), Error>(())
        })
        .unwrap();
        assert_eq!(out, vec![0, 1, 2, 3]);
        assert!(d.drain().unwrap().is_eof());
    }

    #[test]
    fn test_empty_packet_flushes() {
        let mut d = decoder(1);
        d.submit(Some(&packet(0, 0))).unwrap();
        assert_eq!(d.submit(Some(&Packet::empty())).unwrap(), SubmitStatus::Accepted);
        assert_eq!(d.state(), SessionState::Draining);
        assert!(d.drain().unwrap().into_produced().is_some());
        assert!(d.drain().unwrap().is_eof());
    }

    #[test]
    fn test_busy_when_buffer_full() {
        let mut d = Decoder::new(
            DecoderConfig::new(CodecId::RawVideo)
                .with_media(gray(16, 16))
                .with_reorder_depth(1)
                .with_max_buffered_frames(2),
        )
        .unwrap();
        d.open().unwrap();
        d.submit(Some(&packet(0, 0))).unwrap();
        d.submit(Some(&packet(1, 0))).unwrap();
        assert_eq!(d.submit(Some(&packet(2, 0))).unwrap(), SubmitStatus::Busy);
        assert!(d.drain().unwrap().into_produced().is_some());
        assert_eq!(d.submit(Some(&packet(2, 0))).unwrap(), SubmitStatus::Accepted);
    }

    #[test]
    fn test_bad_packet_is_codec_error_not_fatal() {
        let mut d = decoder(0);
        let err = d.submit(Some(&Packet::from_slice(&[1, 2, 3]))).unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
        assert_eq!(d.state(), SessionState::Open);
    }

    #[test]
    fn test_hardware_output_and_detach_on_close() {
        let driver = LoopbackDriver::new(LoopbackConfig::default());
        let stats = driver.stats();
        let ctx = HardwareContext::create_with(&driver, HwDeviceType::Cuda).unwrap();
        let mut d = Decoder::new(
            DecoderConfig::new(CodecId::RawVideo)
                .with_media(MediaParams::Video(VideoParams::new(32, 32, PixelFormat::Nv12)))
                .with_hw_output(true),
        )
        .unwrap();
        d.attach_hardware(&ctx).unwrap();
        d.open().unwrap();
        assert!(d.hardware_context().unwrap().same_device(&ctx));

        let size = PixelFormat::Nv12.picture_size(32, 32);
        d.submit(Some(&Packet::new(vec![1u8; size]))).unwrap();
        let frame = d.drain().unwrap().into_produced().unwrap();
        assert!(frame.is_hw_frame());
        assert_eq!(frame.hw_surface().unwrap().device_id(), ctx.id());

        d.close().unwrap();
        assert!(d.hardware_context().is_none());
        assert_eq!(ctx.live_count(), 0);
        assert_eq!(stats.released(), 1);
    }

    #[test]
    fn test_attach_after_open_rejected() {
        let driver = LoopbackDriver::new(LoopbackConfig::default());
        let ctx = HardwareContext::create_with(&driver, HwDeviceType::Cuda).unwrap();
        let mut d = decoder(0);
        assert!(d.attach_hardware(&ctx).unwrap_err().is_config());
    }
}
