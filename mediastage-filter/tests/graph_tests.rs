//! Filter graphs driven end to end, including device-resident chains on the
//! loopback driver.

use mediastage_core::{
    drive, AudioParams, ChannelLayout, ConfigError, Error, Frame, PixelFormat, SampleFormat,
    StageSession, Timestamp,
};
use mediastage_filter::{
    BufferSourceParams, FilterError, FilterGraphConfig, FilterGraphStage, GraphBuilder, Residency,
    SinkResidency,
};
use mediastage_hwaccel::{HardwareContext, HwAware, HwDeviceType, LoopbackConfig, LoopbackDriver};
use proptest::prelude::*;

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

fn nv12_frame(width: u32, height: u32, luma: u8, index: i64) -> Frame {
    let mut frame = Frame::video(width, height, PixelFormat::Nv12)
        .unwrap()
        .with_pts(Timestamp::from_millis(index * 40));
    frame.plane_mut(0).unwrap().data_mut().fill(luma);
    frame
}

fn run(graph: &mut FilterGraphStage, frames: Vec<Frame>) -> Vec<Frame> {
    let mut out = Vec::new();
    drive(graph, frames, |f| {
        out.push(f);
        Ok::<(), Error>(())
    })
    .unwrap();
    out
}

#[test]
fn test_device_scale_round_trip() {
    init_tracing();
    let ctx = loopback(HwDeviceType::Vaapi);
    let config = FilterGraphConfig::new(BufferSourceParams::video(64, 32, PixelFormat::Nv12))
        .with_sink_residency(SinkResidency::Software);
    let mut graph =
        FilterGraphStage::parse(config, "hwupload,scale_vaapi=32:16,hwdownload", Some(&ctx)).unwrap();
    assert_eq!(graph.output_format().residency(), Residency::Software);
    assert!(graph.hardware_context().unwrap().same_device(&ctx));
    graph.open().unwrap();

    let frames = (0..3).map(|i| nv12_frame(64, 32, 9 + i as u8, i)).collect();
    let out = run(&mut graph, frames);
    assert_eq!(out.len(), 3);
    for (i, frame) in out.iter().enumerate() {
        assert!(!frame.is_hw_frame());
        assert_eq!((frame.width(), frame.height()), (32, 16));
        assert_eq!(frame.pixel_format(), Some(PixelFormat::Nv12));
        assert_eq!(frame.plane(0).unwrap().row(15)[31], 9 + i as u8);
        assert_eq!(frame.pts.value(), Some(i as i64 * 40));
    }

    graph.close().unwrap();
    assert_eq!(ctx.live_count(), 0);
    assert!(ctx.is_disposed());
}

#[test]
fn test_hardware_sink_keeps_frames_on_device() {
    let ctx = loopback(HwDeviceType::Cuda);
    let config = FilterGraphConfig::new(BufferSourceParams::video(64, 32, PixelFormat::Yuv420p))
        .with_sink_residency(SinkResidency::Hardware);
    let mut graph = FilterGraphStage::parse(config, "format=nv12,hwupload", Some(&ctx)).unwrap();
    graph.open().unwrap();
    let out = run(&mut graph, vec![Frame::video(64, 32, PixelFormat::Yuv420p).unwrap()]);
    assert!(out[0].is_hw_frame());
    assert_eq!(out[0].pixel_format(), Some(PixelFormat::Cuda));
    assert_eq!(out[0].hw_surface().unwrap().device_id(), ctx.id());
}

#[test]
fn test_software_frame_into_hardware_graph_fails_at_submit() {
    let ctx = loopback(HwDeviceType::Vaapi);
    let config = FilterGraphConfig::new(BufferSourceParams::hardware_video(
        64,
        32,
        PixelFormat::Vaapi,
        PixelFormat::Nv12,
    ));
    let mut graph = FilterGraphStage::parse(config, "scale_vaapi=32:16", Some(&ctx)).unwrap();
    graph.open().unwrap();
    let err = graph.submit(Some(&nv12_frame(64, 32, 0, 0))).unwrap_err();
    assert!(matches!(err, Error::Config(ConfigError::Residency { .. })));
}

#[test]
fn test_frames_from_another_device_rejected() {
    let a = loopback(HwDeviceType::Vaapi);
    let b = loopback(HwDeviceType::Vaapi);
    let upload_config = FilterGraphConfig::new(BufferSourceParams::video(64, 32, PixelFormat::Nv12));
    let mut upload = FilterGraphStage::parse(upload_config, "hwupload", Some(&a)).unwrap();
    upload.open().unwrap();
    let on_a = run(&mut upload, vec![nv12_frame(64, 32, 1, 0)]);

    let config = FilterGraphConfig::new(BufferSourceParams::hardware_video(
        64,
        32,
        PixelFormat::Vaapi,
        PixelFormat::Nv12,
    ));
    let mut download = FilterGraphStage::parse(config, "hwdownload", Some(&b)).unwrap();
    download.open().unwrap();
    let err = download.submit(Some(&on_a[0])).unwrap_err();
    assert!(err.is_config());
}

#[test]
fn test_device_frames_checked_against_source() {
    let ctx = loopback(HwDeviceType::Vaapi);
    let upload_config = FilterGraphConfig::new(BufferSourceParams::video(64, 32, PixelFormat::Nv12));
    let mut upload = FilterGraphStage::parse(upload_config, "hwupload", Some(&ctx)).unwrap();
    upload.open().unwrap();
    let on_device = run(&mut upload, vec![nv12_frame(64, 32, 1, 0)]);

    // Surfaces hold nv12, the graph was validated for yuv420p data.
    let config = FilterGraphConfig::new(BufferSourceParams::hardware_video(
        64,
        32,
        PixelFormat::Vaapi,
        PixelFormat::Yuv420p,
    ));
    let mut graph = FilterGraphStage::parse(config, "hwdownload", Some(&ctx)).unwrap();
    graph.open().unwrap();
    let err = graph.submit(Some(&on_device[0])).unwrap_err();
    assert!(matches!(
        err,
        Error::Config(ConfigError::Mismatch { what: "surface data format", .. })
    ));

    // Validated for a different geometry.
    let config = FilterGraphConfig::new(BufferSourceParams::hardware_video(
        128,
        64,
        PixelFormat::Vaapi,
        PixelFormat::Nv12,
    ));
    let mut graph = FilterGraphStage::parse(config, "hwdownload", Some(&ctx)).unwrap();
    graph.open().unwrap();
    let err = graph.submit(Some(&on_device[0])).unwrap_err();
    assert!(matches!(err, Error::Config(ConfigError::Mismatch { what: "frame size", .. })));
}

#[test]
fn test_two_contexts_in_one_graph_rejected() {
    let a = loopback(HwDeviceType::Cuda);
    let b = loopback(HwDeviceType::Cuda);
    let config = FilterGraphConfig::new(BufferSourceParams::video(64, 32, PixelFormat::Nv12));
    let err = GraphBuilder::new(config)
        .node("up", "hwupload")
        .node("shrink", "scale_cuda=32:16")
        .link("in", "up")
        .link("up", "shrink")
        .link("shrink", "out")
        .device("up", &a)
        .device("shrink", &b)
        .build()
        .unwrap_err();
    assert!(matches!(err, FilterError::Config(ConfigError::Invalid(ref m)) if m.contains("mixes")));
    assert_eq!(a.live_count(), 0);
    assert_eq!(b.live_count(), 0);
}

#[test]
fn test_per_node_device_assignment() {
    let ctx = loopback(HwDeviceType::Qsv);
    let config = FilterGraphConfig::new(BufferSourceParams::video(64, 32, PixelFormat::Nv12));
    let graph = GraphBuilder::new(config.clone())
        .node("up", "hwupload")
        .node("shrink", "scale_qsv=w=32:h=-1")
        .link("in", "up")
        .link("up", "shrink")
        .link("shrink", "out")
        .device("up", &ctx)
        .device("shrink", &ctx)
        .build()
        .unwrap();
    assert_eq!(graph.node_names(), vec!["up", "shrink"]);

    // A hardware node left without a device.
    let err = GraphBuilder::new(config)
        .node("up", "hwupload")
        .node("shrink", "scale_qsv=32:16")
        .link("in", "up")
        .link("up", "shrink")
        .link("shrink", "out")
        .device("up", &ctx)
        .build()
        .unwrap_err();
    assert!(matches!(err, FilterError::Config(ConfigError::Missing(_))));
}

#[test]
fn test_device_type_must_match_filter() {
    let ctx = loopback(HwDeviceType::Vaapi);
    let config = FilterGraphConfig::new(BufferSourceParams::video(64, 32, PixelFormat::Nv12));
    let err = FilterGraphStage::parse(config, "hwupload,scale_cuda=32:16", Some(&ctx)).unwrap_err();
    assert!(matches!(err, FilterError::Config(ConfigError::Mismatch { .. })));
}

#[test]
fn test_software_sink_after_upload_rejected() {
    let ctx = loopback(HwDeviceType::Vaapi);
    let config = FilterGraphConfig::new(BufferSourceParams::video(64, 32, PixelFormat::Nv12))
        .with_sink_residency(SinkResidency::Software);
    let err = FilterGraphStage::parse(config, "hwupload", Some(&ctx)).unwrap_err();
    assert!(matches!(err, FilterError::Config(ConfigError::Residency { .. })));
}

#[test]
fn test_software_node_after_upload_rejected() {
    let ctx = loopback(HwDeviceType::Vaapi);
    let config = FilterGraphConfig::new(BufferSourceParams::video(64, 32, PixelFormat::Nv12));
    let err = FilterGraphStage::parse(config, "hwupload,scale=32:16", Some(&ctx)).unwrap_err();
    assert!(matches!(err, FilterError::Config(ConfigError::Residency { .. })));
}

#[test]
fn test_audio_chain() {
    let params = AudioParams {
        format: SampleFormat::F32,
        sample_rate: 48000,
        channel_layout: ChannelLayout::STEREO,
        nb_samples: 4,
    };
    let config = FilterGraphConfig::new(BufferSourceParams::audio(params));
    let mut graph = FilterGraphStage::parse(config, "anull,volume=0.25", None).unwrap();
    graph.open().unwrap();

    let mut frame = Frame::audio(SampleFormat::F32, ChannelLayout::STEREO, 48000, 4).unwrap();
    let bytes: Vec<u8> = (0..8).flat_map(|_| 1.0f32.to_ne_bytes()).collect();
    frame.plane_mut(0).unwrap().data_mut()[..32].copy_from_slice(&bytes);
    let out = run(&mut graph, vec![frame]);
    let data = out[0].plane(0).unwrap().data();
    for sample in data[..32].chunks_exact(4) {
        assert_eq!(f32::from_ne_bytes([sample[0], sample[1], sample[2], sample[3]]), 0.25);
    }

    let video = Frame::video(64, 32, PixelFormat::Yuv420p).unwrap();
    let mut graph = FilterGraphStage::parse(
        FilterGraphConfig::new(BufferSourceParams::audio(params)),
        "anull",
        None,
    )
    .unwrap();
    graph.open().unwrap();
    assert!(graph.submit(Some(&video)).unwrap_err().is_config());
}

proptest! {
    #[test]
    fn prop_scale_output_geometry(
        src_w in 1u32..96,
        src_h in 1u32..96,
        dst_w in 1u32..96,
        dst_h in 1u32..96,
    ) {
        let config = FilterGraphConfig::new(BufferSourceParams::video(src_w, src_h, PixelFormat::Yuv420p));
        let mut graph = FilterGraphStage::parse(config, &format!("scale={dst_w}:{dst_h}"), None).unwrap();
        graph.open().unwrap();
        let out = run(&mut graph, vec![Frame::video(src_w, src_h, PixelFormat::Yuv420p).unwrap()]);
        prop_assert_eq!(out.len(), 1);
        prop_assert_eq!((out[0].width(), out[0].height()), (dst_w, dst_h));
    }
}
