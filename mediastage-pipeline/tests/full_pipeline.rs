//! End-to-end pipelines over the built-in raw and PCM codecs.

use mediastage_codec::{CodecParameters, Decoder, DecoderConfig, Encoder, EncoderConfig};
use mediastage_core::{
    drive, ChannelLayout, CodecId, Duration, Error, Frame, Packet, PixelFormat, SampleFormat,
    TimeBase, Timestamp, StageSession,
};
use mediastage_filter::{BufferSourceParams, FilterGraphConfig, FilterGraphStage};
use mediastage_hwaccel::{HardwareContext, HwAware, HwDeviceType, LoopbackConfig, LoopbackDriver};
use mediastage_pipeline::{
    MemorySink, MemorySource, PacketSink, PipelineError, PipelineOrchestrator, PipelineState,
};
use mediastage_resample::{ResampleConfig, ResampleStage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// =============================================================================
// Mock Implementations
// =============================================================================

/// Sink that refuses packets once its capacity is used up.
struct LimitedSink {
    capacity: usize,
    written: Arc<AtomicUsize>,
}

impl PacketSink for LimitedSink {
    fn write_packet(&mut self, _packet: Packet) -> mediastage_pipeline::Result<()> {
        if self.written.load(Ordering::SeqCst) >= self.capacity {
            return Err(PipelineError::Sink("disk full".into()));
        }
        self.written.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("mediastage=debug")
        .try_init();
}

fn loopback(device_type: HwDeviceType) -> HardwareContext {
    let driver = LoopbackDriver::new(LoopbackConfig::default());
    HardwareContext::create_with(&driver, device_type).unwrap()
}

/// Ten pictures coded with two reordered frames between anchors, as stream 0.
fn coded_stream(format: PixelFormat) -> (Vec<Packet>, CodecParameters) {
    let mut encoder = Encoder::new(
        EncoderConfig::new(CodecId::RawVideo)
            .with_time_base(TimeBase::MILLISECONDS)
            .with_gop_size(5)
            .with_max_b_frames(2),
    )
    .unwrap();
    encoder.open().unwrap();
    let frames = (0..10).map(|i| {
        let mut frame = Frame::video(64, 48, format)
            .unwrap()
            .with_pts(Timestamp::new(i * 40, TimeBase::MILLISECONDS))
            .with_duration(Duration::new(40, TimeBase::MILLISECONDS));
        frame.plane_mut(0).unwrap().data_mut().fill(i as u8);
        frame
    });
    let mut packets = Vec::new();
    drive(&mut encoder, frames, |p: Packet| {
        packets.push(p.with_stream_index(0));
        Ok::<(), Error>(())
    })
    .unwrap();
    (packets, encoder.codec_parameters().unwrap())
}

fn raw_encoder() -> Encoder {
    Encoder::new(EncoderConfig::new(CodecId::RawVideo).with_time_base(TimeBase::MILLISECONDS)).unwrap()
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn test_decodes_before_end_and_flush_recovers_buffered_frames() {
    init_tracing();
    let (packets, params) = coded_stream(PixelFormat::Yuv420p);
    assert_eq!(packets.len(), 10);
    let graph = FilterGraphStage::parse(
        FilterGraphConfig::new(BufferSourceParams::video(64, 48, PixelFormat::Yuv420p)),
        "scale=32:24",
        None,
    )
    .unwrap();
    let sink = MemorySink::new();
    let mut pipeline = PipelineOrchestrator::builder()
        .source(MemorySource::new(packets))
        .sink(sink.clone())
        .decoder(Decoder::new(DecoderConfig::from_parameters(&params)).unwrap())
        .filter(graph)
        .encoder(raw_encoder())
        .build()
        .unwrap();
    pipeline.initialize().unwrap();

    for _ in 0..9 {
        assert!(pipeline.step().unwrap());
    }
    let before_last = *pipeline.stats();
    assert!(before_last.frames_decoded >= 1);
    assert!(before_last.frames_decoded < 9);
    assert!(!sink.is_finished());

    assert!(pipeline.step().unwrap());
    assert!(!pipeline.step().unwrap());
    assert_eq!(pipeline.state(), PipelineState::Finished);

    let stats = *pipeline.stats();
    assert_eq!(stats.packets_read, 10);
    assert_eq!(stats.frames_decoded, 10);
    assert_eq!(stats.frames_filtered, 10);
    assert_eq!(stats.packets_written, 10);

    let written = sink.packets();
    assert!(sink.is_finished());
    for (i, packet) in written.iter().enumerate() {
        assert_eq!(packet.pts.value(), Some(i as i64 * 40));
        assert_eq!(packet.size(), PixelFormat::Yuv420p.picture_size(32, 24));
        assert_eq!(packet.data()[0], i as u8);
        assert_eq!(packet.stream_index, Some(0));
    }
    pipeline.close().unwrap();
}

#[test]
fn test_stream_selection_skips_other_streams() {
    let (packets, params) = coded_stream(PixelFormat::Gray8);
    let mut mixed = Vec::new();
    for packet in packets {
        mixed.push(packet);
        mixed.push(Packet::from_slice(&[0xff; 3]).with_stream_index(1));
    }
    let sink = MemorySink::new();
    let mut pipeline = PipelineOrchestrator::builder()
        .source(MemorySource::new(mixed))
        .sink(sink.clone())
        .stream_index(0)
        .decoder(Decoder::new(DecoderConfig::from_parameters(&params)).unwrap())
        .encoder(raw_encoder())
        .build()
        .unwrap();
    let stats = pipeline.run().unwrap();
    assert_eq!(stats.packets_read, 20);
    assert_eq!(stats.packets_skipped, 10);
    assert_eq!(stats.frames_decoded, 10);
    assert_eq!(stats.frames_filtered, 0);
    assert_eq!(sink.len(), 10);
    assert!(matches!(pipeline.run(), Err(PipelineError::AlreadyFinished)));
}

#[test]
fn test_hardware_context_shared_and_released() {
    init_tracing();
    let ctx = loopback(HwDeviceType::Vaapi);
    let (packets, params) = coded_stream(PixelFormat::Nv12);
    let graph = FilterGraphStage::parse(
        FilterGraphConfig::new(BufferSourceParams::hardware_video(
            64,
            48,
            PixelFormat::Vaapi,
            PixelFormat::Nv12,
        )),
        "scale_vaapi=32:24",
        Some(&ctx),
    )
    .unwrap();
    let sink = MemorySink::new();
    let mut pipeline = PipelineOrchestrator::builder()
        .source(MemorySource::new(packets))
        .sink(sink.clone())
        .decoder(Decoder::new(DecoderConfig::from_parameters(&params).with_hw_output(true)).unwrap())
        .filter(graph)
        .encoder(raw_encoder())
        .hardware_context(&ctx)
        .build()
        .unwrap();

    // Decoder, filter graph and encoder each hold the one context.
    assert_eq!(ctx.live_count(), 3);
    assert!(pipeline.decoder().hardware_context().unwrap().same_device(&ctx));
    assert!(pipeline.encoder().hardware_context().unwrap().same_device(&ctx));
    assert!(pipeline.hardware_context().unwrap().same_device(&ctx));

    let stats = pipeline.run().unwrap();
    assert_eq!(stats.packets_written, 10);
    let written = sink.packets();
    assert_eq!(written[3].size(), PixelFormat::Nv12.picture_size(32, 24));
    assert_eq!(written[3].data()[0], 3);

    pipeline.close().unwrap();
    assert_eq!(pipeline.state(), PipelineState::Closed);
    assert_eq!(ctx.live_count(), 0);
    assert!(ctx.is_disposed());
}

#[test]
fn test_pipeline_rejects_second_context() {
    let a = loopback(HwDeviceType::Vaapi);
    let b = loopback(HwDeviceType::Vaapi);
    let (packets, params) = coded_stream(PixelFormat::Nv12);
    let graph = FilterGraphStage::parse(
        FilterGraphConfig::new(BufferSourceParams::hardware_video(
            64,
            48,
            PixelFormat::Vaapi,
            PixelFormat::Nv12,
        )),
        "hwdownload",
        Some(&a),
    )
    .unwrap();
    let err = PipelineOrchestrator::builder()
        .source(MemorySource::new(packets))
        .sink(MemorySink::new())
        .decoder(Decoder::new(DecoderConfig::from_parameters(&params).with_hw_output(true)).unwrap())
        .filter(graph)
        .encoder(raw_encoder())
        .hardware_context(&b)
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, PipelineError::InvalidConfig(ref m) if m.contains("mixes")));
    assert_eq!(b.live_count(), 0);
    // The graph was dropped with the failed builder.
    assert!(a.is_disposed());
}

#[test]
fn test_filter_source_must_match_decoder_output() {
    let ctx = loopback(HwDeviceType::Cuda);
    let (packets, params) = coded_stream(PixelFormat::Nv12);
    let graph = FilterGraphStage::parse(
        FilterGraphConfig::new(BufferSourceParams::hardware_video(
            64,
            48,
            PixelFormat::Cuda,
            PixelFormat::Nv12,
        )),
        "hwdownload",
        Some(&ctx),
    )
    .unwrap();
    let err = PipelineOrchestrator::builder()
        .source(MemorySource::new(packets))
        .sink(MemorySink::new())
        .decoder(Decoder::new(DecoderConfig::from_parameters(&params)).unwrap())
        .filter(graph)
        .encoder(raw_encoder())
        .build()
        .err()
        .unwrap();
    assert!(err.is_config());
    assert!(err.to_string().contains("filter graph source"));
}

#[test]
fn test_audio_resampled_to_fixed_frames() {
    let rate = 48000;
    let tb = TimeBase::from_sample_rate(rate);
    let mut source_encoder =
        Encoder::new(EncoderConfig::new(CodecId::PcmF32le).with_time_base(tb)).unwrap();
    source_encoder.open().unwrap();
    let frames = (0..5).map(|n| {
        let mut frame = Frame::audio(SampleFormat::F32, ChannelLayout::STEREO, rate, 480).unwrap();
        let bytes: Vec<u8> = (0..960).flat_map(|_| 0.5f32.to_ne_bytes()).collect();
        frame.plane_mut(0).unwrap().data_mut()[..bytes.len()].copy_from_slice(&bytes);
        frame.with_pts(Timestamp::new(n * 480, tb))
    });
    let mut packets = Vec::new();
    drive(&mut source_encoder, frames, |p| {
        packets.push(p);
        Ok::<(), Error>(())
    })
    .unwrap();
    let params = source_encoder.codec_parameters().unwrap();

    let sink = MemorySink::new();
    let resampler = ResampleStage::new(ResampleConfig::new(rate, 24000).with_frame_size(256)).unwrap();
    let mut pipeline = PipelineOrchestrator::builder()
        .source(MemorySource::new(packets))
        .sink(sink.clone())
        .decoder(Decoder::new(DecoderConfig::from_parameters(&params)).unwrap())
        .resampler(resampler)
        .encoder(Encoder::new(EncoderConfig::new(CodecId::PcmF32le)).unwrap())
        .build()
        .unwrap();
    let stats = pipeline.run().unwrap();
    assert_eq!(stats.frames_decoded, 5);
    assert_eq!(stats.frames_resampled, stats.packets_written);

    let written = sink.packets();
    let (last, full) = written.split_last().unwrap();
    assert!(full.iter().all(|p| p.size() == 256 * 8));
    assert!(last.size() <= 256 * 8);
    let samples: usize = written.iter().map(|p| p.size() / 8).sum();
    assert!((1190..=1210).contains(&samples), "{samples} samples");
    pipeline.close().unwrap();
}

#[test]
fn test_resampler_needs_audio_decoder() {
    let (packets, params) = coded_stream(PixelFormat::Gray8);
    let err = PipelineOrchestrator::builder()
        .source(MemorySource::new(packets))
        .sink(MemorySink::new())
        .decoder(Decoder::new(DecoderConfig::from_parameters(&params)).unwrap())
        .resampler(ResampleStage::new(ResampleConfig::new(48000, 44100)).unwrap())
        .encoder(raw_encoder())
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, PipelineError::InvalidConfig(ref m) if m.contains("resampler")));
}

#[test]
fn test_close_releases_stages_after_failure() {
    let ctx = loopback(HwDeviceType::Qsv);
    let (mut packets, params) = coded_stream(PixelFormat::Nv12);
    // A truncated picture fails to decode mid-stream.
    packets[4] = Packet::from_slice(&[1, 2, 3]).with_stream_index(0);
    let mut pipeline = PipelineOrchestrator::builder()
        .source(MemorySource::new(packets))
        .sink(MemorySink::new())
        .decoder(Decoder::new(DecoderConfig::from_parameters(&params).with_hw_output(true)).unwrap())
        .encoder(raw_encoder())
        .hardware_context(&ctx)
        .build()
        .unwrap();
    assert_eq!(ctx.live_count(), 2);
    assert!(pipeline.run().is_err());
    assert_eq!(pipeline.state(), PipelineState::Failed);
    assert!(matches!(pipeline.step(), Err(PipelineError::AlreadyFinished)));

    pipeline.close().unwrap();
    assert_eq!(pipeline.decoder().state(), mediastage_core::SessionState::Closed);
    assert!(ctx.is_disposed());
}

#[test]
fn test_sink_error_stops_pipeline() {
    let (packets, params) = coded_stream(PixelFormat::Gray8);
    let written = Arc::new(AtomicUsize::new(0));
    let mut pipeline = PipelineOrchestrator::builder()
        .source(MemorySource::new(packets))
        .sink(LimitedSink {
            capacity: 4,
            written: written.clone(),
        })
        .decoder(Decoder::new(DecoderConfig::from_parameters(&params)).unwrap())
        .encoder(raw_encoder())
        .build()
        .unwrap();
    let err = pipeline.run().unwrap_err();
    assert!(matches!(err, PipelineError::Sink(_)));
    assert_eq!(written.load(Ordering::SeqCst), 4);
    assert_eq!(pipeline.stats().packets_written, 4);
    assert_eq!(pipeline.state(), PipelineState::Failed);
    pipeline.close().unwrap();
}
