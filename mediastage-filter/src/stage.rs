//! The filter graph as a submit/drain stage.

use crate::config::FilterGraphConfig;
use crate::error::FilterError;
use crate::graph::GraphBuilder;
use crate::node::{FilterNode, LinkFormat, Residency};
use mediastage_core::error::{ConfigError, Result};
use mediastage_core::{
    EngineOutput, EngineSubmit, Frame, MediaParams, ProtocolPolicy, Session, StageEngine, StageKind,
};
use mediastage_hwaccel::{ensure_same_device, HardwareContext, HwAttachment, HwAware};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// A linked filter instance.
#[derive(Debug)]
pub(crate) struct GraphNode {
    pub(crate) name: String,
    pub(crate) filter: Box<dyn FilterNode>,
}

/// Stage-specific half of [`FilterGraphStage`].
#[derive(Debug)]
pub struct FilterGraphEngine {
    config: FilterGraphConfig,
    chain: Vec<GraphNode>,
    source: LinkFormat,
    output: LinkFormat,
    ready: VecDeque<Frame>,
    eof: bool,
    hw: Option<HwAttachment>,
}

impl FilterGraphEngine {
    fn check_input(&self, frame: &Frame) -> Result<()> {
        let pad = &self.config.source_pad;
        let expected = self.source.residency();
        let actual = Residency::of_frame(frame);
        if actual != expected {
            return Err(ConfigError::Residency {
                location: format!("source pad '{pad}'"),
                expected: expected.name().into(),
                actual: actual.name().into(),
            }
            .into());
        }
        match (&self.source.params, frame.params()) {
            (MediaParams::Video(want), MediaParams::Video(got)) => {
                if want.format != got.format {
                    return Err(ConfigError::mismatch("pixel format", want.format, got.format).into());
                }
                if (want.width, want.height) != (got.width, got.height) {
                    return Err(ConfigError::mismatch(
                        "frame size",
                        format!("{}x{}", want.width, want.height),
                        format!("{}x{}", got.width, got.height),
                    )
                    .into());
                }
                if let (Some(want_sw), Some(surface)) = (self.source.sw_format, frame.hw_surface()) {
                    let got_sw = surface.pool().sw_format();
                    if want_sw != got_sw {
                        return Err(ConfigError::mismatch("surface data format", want_sw, got_sw).into());
                    }
                }
            }
            (MediaParams::Audio(want), MediaParams::Audio(got)) => {
                if want.format != got.format {
                    return Err(ConfigError::mismatch("sample format", want.format, got.format).into());
                }
                if want.sample_rate != got.sample_rate {
                    return Err(ConfigError::mismatch("sample rate", want.sample_rate, got.sample_rate).into());
                }
                if want.channel_layout != got.channel_layout {
                    return Err(
                        ConfigError::mismatch("channel layout", want.channel_layout, got.channel_layout).into(),
                    );
                }
            }
            (want, got) => {
                return Err(ConfigError::mismatch("media type", want.media_type(), got.media_type()).into())
            }
        }
        if let (Residency::Hardware, Some(attachment)) = (actual, &self.hw) {
            ensure_same_device(attachment.context(), frame)?;
        }
        Ok(())
    }
}

impl StageEngine for FilterGraphEngine {
    type Input = Frame;
    type Output = Frame;

    fn kind(&self) -> StageKind {
        StageKind::Filter
    }

    fn open(&mut self) -> Result<()> {
        debug!(
            nodes = self.chain.len(),
            source = %self.source.residency(),
            sink = %self.output.residency(),
            "filter graph opened"
        );
        Ok(())
    }

    fn send(&mut self, frame: &Frame) -> Result<EngineSubmit> {
        if self.ready.len() >= self.config.max_buffered_frames {
            return Ok(EngineSubmit::Full);
        }
        self.check_input(frame)?;
        let mut frame = frame.clone();
        for node in &mut self.chain {
            frame = node.filter.process(frame).map_err(|err| {
                warn!(node = %node.name, filter = node.filter.filter_name(), error = %err, "filter failed");
                err
            })?;
        }
        self.ready.push_back(frame);
        Ok(EngineSubmit::Accepted)
    }

    fn send_eof(&mut self) -> Result<EngineSubmit> {
        self.eof = true;
        Ok(EngineSubmit::Accepted)
    }

    fn receive(&mut self) -> Result<EngineOutput<Frame>> {
        Ok(match self.ready.pop_front() {
            Some(frame) => EngineOutput::Ready(frame),
            None if self.eof => EngineOutput::Finished,
            None => EngineOutput::Pending,
        })
    }

    fn reset(&mut self) -> Result<()> {
        self.ready.clear();
        self.eof = false;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.ready.clear();
        if let Some(attachment) = self.hw.as_mut() {
            attachment.detach();
        }
        Ok(())
    }

    fn buffered(&self) -> usize {
        self.ready.len()
    }
}

/// A validated chain of filters driven as one stage.
///
/// Built with [`GraphBuilder`] or [`FilterGraphStage::parse`]. Submitting a
/// frame whose residency, media type or format differs from the configured
/// source is a configuration error; frames are never moved between host and
/// device except by `hwupload` and `hwdownload` nodes.
#[derive(Debug)]
pub struct FilterGraphStage {
    session: Session<FilterGraphEngine>,
}

impl FilterGraphStage {
    /// Build a graph from its textual description.
    ///
    /// ```ignore
    /// let mut graph = FilterGraphStage::parse(config, "format=nv12,hwupload,scale_cuda=1280:720", Some(&ctx))?;
    /// ```
    pub fn parse(
        config: FilterGraphConfig,
        description: &str,
        ctx: Option<&HardwareContext>,
    ) -> std::result::Result<Self, FilterError> {
        let mut builder = GraphBuilder::parse(config, description)?;
        if let Some(ctx) = ctx {
            builder = builder.hardware_context(ctx);
        }
        builder.build()
    }

    /// Start a structural description.
    pub fn builder(config: FilterGraphConfig) -> GraphBuilder {
        GraphBuilder::new(config)
    }

    pub(crate) fn from_parts(
        config: FilterGraphConfig,
        chain: Vec<GraphNode>,
        output: LinkFormat,
        device: Option<HardwareContext>,
    ) -> std::result::Result<Self, FilterError> {
        let source = config.source.link_format();
        let mut session = Session::new(FilterGraphEngine {
            config,
            chain,
            source,
            output,
            ready: VecDeque::new(),
            eof: false,
            hw: None,
        });
        if let Some(ctx) = device {
            let attachment = HwAttachment::attach(&ctx, mediastage_core::StageSession::id(&session))?;
            session.engine_mut().hw = Some(attachment);
        }
        Ok(Self { session })
    }

    /// Set the protocol violation policy.
    pub fn with_policy(mut self, policy: ProtocolPolicy) -> Self {
        self.session = self.session.with_policy(policy);
        self
    }

    /// Node names in processing order.
    pub fn node_names(&self) -> Vec<&str> {
        self.session
            .engine()
            .chain
            .iter()
            .map(|n| n.name.as_str())
            .collect()
    }

    /// Format of submitted frames.
    pub fn source_format(&self) -> &LinkFormat {
        &self.session.engine().source
    }

    /// Format of filtered frames.
    pub fn output_format(&self) -> &LinkFormat {
        &self.session.engine().output
    }

    /// Graph configuration.
    pub fn config(&self) -> &FilterGraphConfig {
        &self.session.engine().config
    }
}

mediastage_core::delegate_stage_session!(FilterGraphStage, session, Frame, Frame);

impl HwAware for FilterGraphStage {
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
    use crate::config::BufferSourceParams;
    use mediastage_core::{DrainStatus, PixelFormat, StageSession, SubmitStatus, Timestamp};

    fn stage(description: &str, max: usize) -> FilterGraphStage {
        let config = FilterGraphConfig::new(BufferSourceParams::video(64, 32, PixelFormat::Yuv420p))
            .with_max_buffered_frames(max);
        let mut stage = FilterGraphStage::parse(config, description, None).unwrap();
        stage.open().unwrap();
        stage
    }

    #[test]
    fn test_frames_flow_through_chain() {
        let mut graph = stage("scale=32:16,format=nv12", 4);
        let frame = Frame::video(64, 32, PixelFormat::Yuv420p)
            .unwrap()
            .with_pts(Timestamp::from_millis(40));
        assert_eq!(graph.submit(Some(&frame)).unwrap(), SubmitStatus::Accepted);
        let out = graph.drain().unwrap().into_produced().unwrap();
        assert_eq!((out.width(), out.height()), (32, 16));
        assert_eq!(out.pixel_format(), Some(PixelFormat::Nv12));
        assert_eq!(out.pts, frame.pts);
        assert!(matches!(graph.drain().unwrap(), DrainStatus::NeedsInput));
        assert_eq!(graph.kind(), StageKind::Filter);
    }

    #[test]
    fn test_busy_and_flush() {
        let mut graph = stage("null", 1);
        let frame = Frame::video(64, 32, PixelFormat::Yuv420p).unwrap();
        assert_eq!(graph.submit(Some(&frame)).unwrap(), SubmitStatus::Accepted);
        assert_eq!(graph.submit(Some(&frame)).unwrap(), SubmitStatus::Busy);
        assert!(graph.drain().unwrap().into_produced().is_some());
        assert_eq!(graph.submit(None).unwrap(), SubmitStatus::Accepted);
        assert!(graph.drain().unwrap().is_eof());
        assert_eq!(graph.submit(None).unwrap(), SubmitStatus::Ended);
    }

    #[test]
    fn test_wrong_input_format() {
        let mut graph = stage("null", 4);
        let nv12 = Frame::video(64, 32, PixelFormat::Nv12).unwrap();
        let err = graph.submit(Some(&nv12)).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("pixel format"));
    }

    #[test]
    fn test_wrong_input_size() {
        let mut graph = stage("scale=32:16", 4);
        let large = Frame::video(128, 96, PixelFormat::Yuv420p).unwrap();
        let err = graph.submit(Some(&large)).unwrap_err();
        assert!(matches!(err, mediastage_core::Error::Config(ConfigError::Mismatch { what: "frame size", .. })));
        assert!(err.to_string().contains("64x32"));
        assert!(matches!(graph.drain().unwrap(), DrainStatus::NeedsInput));
    }
}
