//! Transcoding pipeline orchestration.
//!
//! Packets of the selected stream go through the decoder; every decoded frame
//! goes through the optional filter graph and resampler and then the encoder;
//! encoded packets go to the sink. Each stage is run with the drain-first
//! loop, one source packet at a time.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::io::{PacketSink, PacketSource};
use mediastage_codec::{Decoder, Encoder};
use mediastage_core::{
    feed, record_counter, record_histogram, ConfigError, Frame, MediaType, Packet, SessionState,
    StageSession,
};
use mediastage_filter::{FilterGraphStage, Residency};
use mediastage_hwaccel::{HardwareContext, HwAware};
use mediastage_resample::ResampleStage;
use tracing::{debug, info, trace};

/// Pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum PipelineState {
    /// Built, stages not opened yet.
    Created,
    /// Stages open, no packet processed yet.
    Ready,
    /// Processing packets.
    Running,
    /// Source exhausted and every stage flushed.
    Finished,
    /// A step failed; the pipeline can only be closed.
    Failed,
    /// Every stage closed.
    Closed,
}

/// Counters of a pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Packets read from the source.
    pub packets_read: u64,
    /// Source packets of other streams.
    pub packets_skipped: u64,
    /// Frames produced by the decoder.
    pub frames_decoded: u64,
    /// Frames produced by the filter graph.
    pub frames_filtered: u64,
    /// Frames produced by the resampler.
    pub frames_resampled: u64,
    /// Packets handed to the sink.
    pub packets_written: u64,
}

struct Output {
    sink: Box<dyn PacketSink>,
    stream_index: u32,
    stats: PipelineStats,
}

impl Output {
    fn write(&mut self, mut packet: Packet) -> Result<()> {
        packet.stream_index = Some(self.stream_index);
        trace!(pts = %packet.pts, dts = %packet.dts, size = packet.size(), "writing packet");
        record_histogram!("pipeline.packet_size", packet.size() as f64);
        self.sink.write_packet(packet)?;
        self.stats.packets_written += 1;
        record_counter!("pipeline.packets_written", 1);
        Ok(())
    }
}

fn encode(encoder: &mut Encoder, frame: Option<&Frame>, out: &mut Output) -> Result<()> {
    feed(encoder, frame, |packet| out.write(packet))?;
    Ok(())
}

fn resample_and_encode(
    resampler: &mut Option<ResampleStage>,
    encoder: &mut Encoder,
    frame: Frame,
    out: &mut Output,
) -> Result<()> {
    match resampler {
        Some(resampler) => {
            feed(resampler, Some(&frame), |resampled| {
                out.stats.frames_resampled += 1;
                encode(encoder, Some(&resampled), out)
            })?;
            Ok(())
        }
        None => encode(encoder, Some(&frame), out),
    }
}

/// Stages after the decoder.
struct Downstream {
    filter: Option<FilterGraphStage>,
    resampler: Option<ResampleStage>,
    encoder: Encoder,
}

impl Downstream {
    fn push(&mut self, frame: Frame, out: &mut Output) -> Result<()> {
        let Self {
            filter,
            resampler,
            encoder,
        } = self;
        match filter {
            Some(filter) => {
                feed(filter, Some(&frame), |filtered| {
                    out.stats.frames_filtered += 1;
                    resample_and_encode(resampler, encoder, filtered, out)
                })?;
                Ok(())
            }
            None => resample_and_encode(resampler, encoder, frame, out),
        }
    }

    /// Flush each stage to end of stream before the next one.
    fn flush(&mut self, out: &mut Output) -> Result<()> {
        let Self {
            filter,
            resampler,
            encoder,
        } = self;
        if let Some(filter) = filter {
            debug!("flushing filter graph");
            mediastage_core::flush(filter, |filtered| {
                out.stats.frames_filtered += 1;
                resample_and_encode(resampler, encoder, filtered, out)
            })?;
        }
        if let Some(resampler) = resampler {
            debug!("flushing resampler");
            mediastage_core::flush(resampler, |resampled| {
                out.stats.frames_resampled += 1;
                encode(encoder, Some(&resampled), out)
            })?;
        }
        debug!("flushing encoder");
        encode(encoder, None, out)
    }
}

/// Decoder, optional filter graph and resampler, and encoder driven together.
///
/// ```ignore
/// let mut pipeline = PipelineOrchestrator::builder()
///     .source(MemorySource::new(packets))
///     .sink(sink.clone())
///     .decoder(decoder)
///     .filter(graph)
///     .encoder(encoder)
///     .build()?;
/// pipeline.run()?;
/// pipeline.close()?;
/// ```
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    state: PipelineState,
    source: Box<dyn PacketSource>,
    decoder: Decoder,
    downstream: Downstream,
    output: Output,
    hw: Option<HardwareContext>,
}

impl PipelineOrchestrator {
    /// Start building a pipeline.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Open every stage and check the source carries the selected stream.
    pub fn initialize(&mut self) -> Result<()> {
        if self.state != PipelineState::Created {
            return Err(PipelineError::InvalidConfig(
                "pipeline already initialized".into(),
            ));
        }
        if let (Some(selected), Some(indices)) = (self.config.stream_index, self.source.stream_indices()) {
            if !indices.contains(&selected) {
                return Err(PipelineError::StreamNotFound(selected));
            }
        }

        self.decoder.open()?;
        if let Some(filter) = self.downstream.filter.as_mut() {
            filter.open()?;
        }
        if let Some(resampler) = self.downstream.resampler.as_mut() {
            resampler.open()?;
        }
        self.downstream.encoder.open()?;

        self.state = PipelineState::Ready;
        info!(
            stream = ?self.config.stream_index,
            filter = self.downstream.filter.is_some(),
            resample = self.downstream.resampler.is_some(),
            hardware = self.hw.as_ref().map(|ctx| ctx.device_type().name()),
            "Pipeline initialized"
        );
        Ok(())
    }

    fn ensure_active(&self) -> Result<()> {
        match self.state {
            PipelineState::Ready | PipelineState::Running => Ok(()),
            PipelineState::Created => Err(PipelineError::NotInitialized),
            PipelineState::Finished | PipelineState::Failed | PipelineState::Closed => {
                Err(PipelineError::AlreadyFinished)
            }
        }
    }

    /// Run one step: read one source packet and push it through every stage.
    ///
    /// Returns `false` once the source is exhausted and the pipeline was flushed.
    pub fn step(&mut self) -> Result<bool> {
        self.ensure_active()?;
        self.state = PipelineState::Running;
        let result = self.read_and_process();
        if result.is_err() {
            self.state = PipelineState::Failed;
        }
        result
    }

    fn read_and_process(&mut self) -> Result<bool> {
        let Some(packet) = self.source.read_packet()? else {
            self.flush_stages()?;
            return Ok(false);
        };
        self.output.stats.packets_read += 1;
        record_counter!("pipeline.packets_read", 1);

        if !self.config.selects(packet.stream_index) {
            trace!(stream = ?packet.stream_index, "No mapping for stream, skipping packet");
            self.output.stats.packets_skipped += 1;
            return Ok(true);
        }
        self.process_packet(&packet)?;

        let read = self.output.stats.packets_read;
        if self.config.report_progress && read % u64::from(self.config.progress_interval) == 0 {
            self.report_progress();
        }
        Ok(true)
    }

    fn process_packet(&mut self, packet: &Packet) -> Result<()> {
        trace!(pts = %packet.pts, size = packet.size(), "Processing packet");
        let Self {
            decoder,
            downstream,
            output,
            ..
        } = self;
        feed(decoder, Some(packet), |frame| {
            output.stats.frames_decoded += 1;
            downstream.push(frame, output)
        })?;
        Ok(())
    }

    /// Flush the pipeline without reading the rest of the source.
    ///
    /// The decoder is flushed first and its remaining frames go through the
    /// filter graph, then the filter graph, the resampler and the encoder are
    /// flushed in that order. The sink is finished last.
    pub fn finish(&mut self) -> Result<()> {
        self.ensure_active()?;
        let result = self.flush_stages();
        if result.is_err() {
            self.state = PipelineState::Failed;
        }
        result
    }

    fn flush_stages(&mut self) -> Result<()> {
        info!("Flushing pipeline");
        let Self {
            decoder,
            downstream,
            output,
            ..
        } = self;
        mediastage_core::flush(decoder, |frame| {
            output.stats.frames_decoded += 1;
            downstream.push(frame, output)
        })?;
        downstream.flush(output)?;
        output.sink.finish()?;

        self.state = PipelineState::Finished;
        info!(
            packets = self.output.stats.packets_read,
            frames = self.output.stats.frames_decoded,
            written = self.output.stats.packets_written,
            "Pipeline finished"
        );
        Ok(())
    }

    fn report_progress(&self) {
        let stats = &self.output.stats;
        info!(
            packets = stats.packets_read,
            frames = stats.frames_decoded,
            written = stats.packets_written,
            "Progress"
        );
    }

    /// Initialize if needed and process the whole source.
    pub fn run(&mut self) -> Result<PipelineStats> {
        if self.state == PipelineState::Created {
            self.initialize()?;
        }
        while self.step()? {}
        Ok(self.output.stats)
    }

    /// Close every stage, releasing their hardware attachments.
    ///
    /// All stages are closed even when one fails; the first error is returned.
    pub fn close(&mut self) -> Result<()> {
        let mut results = vec![self.downstream.encoder.close()];
        if let Some(filter) = self.downstream.filter.as_mut() {
            results.push(filter.close());
        }
        if let Some(resampler) = self.downstream.resampler.as_mut() {
            results.push(resampler.close());
        }
        results.push(self.decoder.close());
        let first_error = results.into_iter().find_map(|r| r.err());
        self.state = PipelineState::Closed;
        debug!("Pipeline closed");
        match first_error {
            Some(err) => {
                debug!(error = %err, "stage close failed");
                Err(err.into())
            }
            None => Ok(()),
        }
    }

    /// Pipeline state.
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Run counters.
    pub fn stats(&self) -> &PipelineStats {
        &self.output.stats
    }

    /// Pipeline configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The hardware context shared by the stages.
    pub fn hardware_context(&self) -> Option<&HardwareContext> {
        self.hw.as_ref()
    }

    /// The decoder stage.
    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    /// The filter graph stage.
    pub fn filter(&self) -> Option<&FilterGraphStage> {
        self.downstream.filter.as_ref()
    }

    /// The resampler stage.
    pub fn resampler(&self) -> Option<&ResampleStage> {
        self.downstream.resampler.as_ref()
    }

    /// The encoder stage.
    pub fn encoder(&self) -> &Encoder {
        &self.downstream.encoder
    }
}

/// Builder for [`PipelineOrchestrator`].
///
/// Stages are handed over unopened; the pipeline opens them on
/// [`initialize`](PipelineOrchestrator::initialize).
#[derive(Default)]
pub struct PipelineBuilder {
    config: PipelineConfig,
    source: Option<Box<dyn PacketSource>>,
    sink: Option<Box<dyn PacketSink>>,
    decoder: Option<Decoder>,
    filter: Option<FilterGraphStage>,
    resampler: Option<ResampleStage>,
    encoder: Option<Encoder>,
    hw: Option<HardwareContext>,
}

impl PipelineBuilder {
    /// Create a new pipeline builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set configuration.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Select the source stream to transcode.
    pub fn stream_index(mut self, index: u32) -> Self {
        self.config.stream_index = Some(index);
        self
    }

    /// Set the packet source.
    pub fn source(mut self, source: impl PacketSource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Set the packet sink.
    pub fn sink(mut self, sink: impl PacketSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Set the decoder.
    pub fn decoder(mut self, decoder: Decoder) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Insert a filter graph between decoder and encoder.
    pub fn filter(mut self, filter: FilterGraphStage) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Insert a resampler in front of the encoder.
    pub fn resampler(mut self, resampler: ResampleStage) -> Self {
        self.resampler = Some(resampler);
        self
    }

    /// Set the encoder.
    pub fn encoder(mut self, encoder: Encoder) -> Self {
        self.encoder = Some(encoder);
        self
    }

    /// Share a hardware device with the stages that handle device frames.
    pub fn hardware_context(mut self, ctx: &HardwareContext) -> Self {
        self.hw = Some(ctx.clone());
        self
    }

    /// Build the pipeline.
    ///
    /// The hardware context is attached to a decoder configured for hardware
    /// output and to the encoder when device frames reach it. A filter graph
    /// is built with its context, which must be the same device.
    pub fn build(self) -> Result<PipelineOrchestrator> {
        self.config.validate()?;
        let source = self.source.ok_or_else(|| missing("packet source"))?;
        let sink = self.sink.ok_or_else(|| missing("packet sink"))?;
        let mut decoder = self.decoder.ok_or_else(|| missing("decoder"))?;
        let mut encoder = self.encoder.ok_or_else(|| missing("encoder"))?;
        let filter = self.filter;
        let resampler = self.resampler;

        ensure_unopened("decoder", decoder.state())?;
        ensure_unopened("encoder", encoder.state())?;
        if let Some(filter) = &filter {
            ensure_unopened("filter graph", filter.state())?;
        }
        if let Some(resampler) = &resampler {
            ensure_unopened("resampler", resampler.state())?;
            if decoder.config().codec_id.media_type() != MediaType::Audio {
                return Err(PipelineError::InvalidConfig(format!(
                    "resampler after a {} decoder",
                    decoder.config().codec_id.media_type()
                )));
            }
        }

        let hw = propagate_hardware(self.hw, &mut decoder, filter.as_ref(), &mut encoder)?;
        if let Some(filter) = &filter {
            check_filter_source(&decoder, filter)?;
        }

        Ok(PipelineOrchestrator {
            output: Output {
                sink,
                stream_index: self.config.output_stream_index,
                stats: PipelineStats::default(),
            },
            config: self.config,
            state: PipelineState::Created,
            source,
            decoder,
            downstream: Downstream {
                filter,
                resampler,
                encoder,
            },
            hw,
        })
    }
}

fn missing(what: &str) -> PipelineError {
    PipelineError::InvalidConfig(format!("missing {what}"))
}

fn ensure_unopened(stage: &str, state: SessionState) -> Result<()> {
    if state != SessionState::Unopened {
        return Err(PipelineError::InvalidConfig(format!(
            "{stage} must be handed over unopened, found {state:?}"
        )));
    }
    Ok(())
}

fn decoder_residency(decoder: &Decoder) -> Residency {
    if decoder.config().hw_output && decoder.hardware_context().is_some() {
        Residency::Hardware
    } else {
        Residency::Software
    }
}

/// Pick the pipeline's single context and attach it where device frames are handled.
fn propagate_hardware(
    requested: Option<HardwareContext>,
    decoder: &mut Decoder,
    filter: Option<&FilterGraphStage>,
    encoder: &mut Encoder,
) -> Result<Option<HardwareContext>> {
    let mut shared = requested;
    let attached = [
        decoder.hardware_context(),
        filter.and_then(|f| f.hardware_context()),
        encoder.hardware_context(),
    ];
    for ctx in attached.into_iter().flatten() {
        match &shared {
            Some(current) if !current.same_device(ctx) => {
                return Err(PipelineError::InvalidConfig(format!(
                    "pipeline mixes hardware contexts {} and {}",
                    current.id(),
                    ctx.id()
                )));
            }
            Some(_) => {}
            None => shared = Some(ctx.clone()),
        }
    }
    let Some(ctx) = shared else {
        return Ok(None);
    };

    if decoder.config().hw_output && decoder.hardware_context().is_none() {
        decoder.attach_hardware(&ctx)?;
    }
    let frames_reach_encoder = match filter {
        Some(filter) => filter.output_format().residency(),
        None => decoder_residency(decoder),
    };
    if frames_reach_encoder == Residency::Hardware && encoder.hardware_context().is_none() {
        encoder.attach_hardware(&ctx)?;
    }
    debug!(
        context = ctx.id(),
        device = ctx.device_type().name(),
        live = ctx.live_count(),
        "hardware context shared with pipeline stages"
    );
    Ok(Some(ctx))
}

fn check_filter_source(decoder: &Decoder, filter: &FilterGraphStage) -> Result<()> {
    let actual = decoder_residency(decoder);
    let expected = filter.source_format().residency();
    if actual != expected {
        return Err(PipelineError::Core(
            ConfigError::Residency {
                location: "filter graph source".into(),
                expected: expected.name().into(),
                actual: actual.name().into(),
            }
            .into(),
        ));
    }
    Ok(())
}
