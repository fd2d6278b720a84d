//! Built-in filters.

use crate::error::{FilterError, Result};
use crate::node::{FilterNode, LinkContext, LinkFormat, SinkResidency};
use crate::parser::FilterSpec;
use mediastage_core::error::{ConfigError, Error as CoreError};
use mediastage_core::{Frame, MediaParams, MediaType, PixelFormat, VideoParams};
use mediastage_hwaccel::{
    download, ensure_same_device, HardwareContext, HwDeviceType, HwFramesContext, HwFramesParams,
};
use std::sync::Arc;
use tracing::{debug, trace};

const DEFAULT_POOL_SIZE: usize = 16;

fn video_input(link: &LinkContext<'_>) -> Result<VideoParams> {
    match link.input.params {
        MediaParams::Video(v) => Ok(v),
        other => Err(ConfigError::mismatch("media type", MediaType::Video, other.media_type()).into()),
    }
}

fn parse_arg<T: std::str::FromStr>(spec: &FilterSpec, what: &str, raw: Option<&str>) -> Result<Option<T>> {
    raw.map(|raw| {
        raw.parse()
            .map_err(|_| FilterError::argument(&spec.name, format!("invalid {what} '{raw}'")))
    })
    .transpose()
}

// Bytes per pixel within one plane.
fn pixel_bytes(format: PixelFormat, plane: usize) -> usize {
    match (format, plane) {
        (PixelFormat::Nv12, 1) => 2,
        (PixelFormat::Rgb24, _) => 3,
        (PixelFormat::Rgba, _) => 4,
        _ => 1,
    }
}

/// Nearest-neighbour resize of a software video frame.
pub fn scale_nearest(src: &Frame, width: u32, height: u32) -> mediastage_core::Result<Frame> {
    let params = *src
        .video_params()
        .ok_or_else(|| CoreError::invalid_param("scale needs a video frame"))?;
    let planes = src
        .planes()
        .ok_or_else(|| CoreError::invalid_param("scale needs a software frame"))?;
    let format = params.format;
    let mut dst = Frame::video(width, height, format)?;
    dst.copy_props(src);
    dst.set_sample_aspect_ratio(params.sample_aspect_ratio);
    for (p, src_plane) in planes.iter().enumerate().take(format.num_planes()) {
        let bpp = pixel_bytes(format, p);
        let (src_row, src_rows) = format.plane_dims(p, params.width, params.height);
        let (dst_row, dst_rows) = format.plane_dims(p, width, height);
        let (src_w, dst_w) = (src_row / bpp, dst_row / bpp);
        let dst_plane = dst
            .plane_mut(p)
            .ok_or_else(|| CoreError::invalid_param(format!("missing plane {p}")))?;
        for y in 0..dst_rows {
            let src_line = src_plane.row(y * src_rows / dst_rows);
            let dst_line = dst_plane.row_mut(y);
            for x in 0..dst_w {
                let sx = x * src_w / dst_w;
                dst_line[x * bpp..(x + 1) * bpp].copy_from_slice(&src_line[sx * bpp..(sx + 1) * bpp]);
            }
        }
    }
    Ok(dst)
}

/// Requested output size; `-1` keeps the aspect ratio along that axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TargetSize {
    width: i64,
    height: i64,
}

impl TargetSize {
    fn from_spec(spec: &FilterSpec) -> Result<Self> {
        let width: Option<i64> = parse_arg(spec, "width", spec.arg("w", 0).or(spec.named("width")))?;
        let height: Option<i64> = parse_arg(spec, "height", spec.arg("h", 1).or(spec.named("height")))?;
        let (Some(width), Some(height)) = (width, height) else {
            return Err(FilterError::argument(&spec.name, "width and height are required"));
        };
        for v in [width, height] {
            if v == 0 || v < -1 || v > i64::from(u16::MAX) {
                return Err(FilterError::argument(&spec.name, format!("invalid dimension {v}")));
            }
        }
        if width == -1 && height == -1 {
            return Err(FilterError::argument(&spec.name, "only one dimension may be -1"));
        }
        Ok(Self { width, height })
    }

    // Derived dimensions are rounded down to even, at least 2.
    fn resolve(&self, input: &VideoParams) -> Result<(u32, u32)> {
        let dimension = |v: i64| {
            u32::try_from(v).map_err(|_| ConfigError::Invalid(format!("scaled dimension {v} out of range")))
        };
        let derive = |known: i64, num: u32, den: u32| {
            let v = dimension(known * i64::from(num) / i64::from(den.max(1)))?;
            Ok::<u32, ConfigError>((v & !1).max(2))
        };
        let size = match (self.width, self.height) {
            (-1, h) => (derive(h, input.width, input.height)?, dimension(h)?),
            (w, -1) => (dimension(w)?, derive(w, input.height, input.width)?),
            (w, h) => (dimension(w)?, dimension(h)?),
        };
        Ok(size)
    }
}

/// `null` and `anull`: frames pass through unchanged.
#[derive(Debug)]
pub struct Passthrough {
    media_type: MediaType,
}

impl Passthrough {
    pub fn video() -> Self {
        Self {
            media_type: MediaType::Video,
        }
    }

    pub fn audio() -> Self {
        Self {
            media_type: MediaType::Audio,
        }
    }
}

impl FilterNode for Passthrough {
    fn filter_name(&self) -> &'static str {
        match self.media_type {
            MediaType::Audio => "anull",
            _ => "null",
        }
    }

    fn media_type(&self) -> Option<MediaType> {
        Some(self.media_type)
    }

    fn input_residency(&self) -> SinkResidency {
        SinkResidency::Any
    }

    fn configure(&mut self, link: &LinkContext<'_>) -> Result<LinkFormat> {
        Ok(*link.input)
    }

    fn process(&mut self, frame: Frame) -> mediastage_core::Result<Frame> {
        Ok(frame)
    }
}

/// `scale=w:h`: software resize.
#[derive(Debug)]
pub struct Scale {
    target: TargetSize,
    size: (u32, u32),
}

impl Scale {
    pub fn from_spec(spec: &FilterSpec) -> Result<Self> {
        Ok(Self {
            target: TargetSize::from_spec(spec)?,
            size: (0, 0),
        })
    }
}

impl FilterNode for Scale {
    fn filter_name(&self) -> &'static str {
        "scale"
    }

    fn configure(&mut self, link: &LinkContext<'_>) -> Result<LinkFormat> {
        let input = video_input(link)?;
        self.size = self.target.resolve(&input)?;
        let mut output = VideoParams::new(self.size.0, self.size.1, input.format);
        output.sample_aspect_ratio = input.sample_aspect_ratio;
        Ok(LinkFormat::new(MediaParams::Video(output)))
    }

    fn process(&mut self, frame: Frame) -> mediastage_core::Result<Frame> {
        let (width, height) = self.size;
        if (frame.width(), frame.height()) == (width, height) {
            return Ok(frame);
        }
        trace!(from_width = frame.width(), from_height = frame.height(), width, height, "scaling");
        scale_nearest(&frame, width, height)
    }
}

/// `format=pix_fmts`: software pixel format conversion between `yuv420p` and `nv12`.
#[derive(Debug)]
pub struct Format {
    target: PixelFormat,
}

impl Format {
    pub fn from_spec(spec: &FilterSpec) -> Result<Self> {
        let name = spec
            .arg("pix_fmts", 0)
            .ok_or_else(|| FilterError::argument(&spec.name, "pixel format is required"))?;
        let target = PixelFormat::from_name(name)
            .filter(|f| !f.is_hardware())
            .ok_or_else(|| FilterError::argument(&spec.name, format!("unknown software pixel format '{name}'")))?;
        Ok(Self { target })
    }

    fn supported(from: PixelFormat, to: PixelFormat) -> bool {
        from == to
            || matches!(
                (from, to),
                (PixelFormat::Yuv420p, PixelFormat::Nv12) | (PixelFormat::Nv12, PixelFormat::Yuv420p)
            )
    }

    fn convert(&self, frame: &Frame) -> mediastage_core::Result<Frame> {
        let (width, height) = (frame.width(), frame.height());
        let src = frame
            .planes()
            .ok_or_else(|| CoreError::invalid_param("format needs a software frame"))?;
        let mut out = Frame::video(width, height, self.target)?;
        out.copy_props(frame);
        let (cw, ch) = PixelFormat::Yuv420p.plane_dims(1, width, height);
        let luma = out
            .plane_mut(0)
            .ok_or_else(|| CoreError::invalid_param("missing luma plane"))?;
        for y in 0..height as usize {
            luma.row_mut(y).copy_from_slice(src[0].row(y));
        }
        match self.target {
            PixelFormat::Nv12 => {
                let uv = out
                    .plane_mut(1)
                    .ok_or_else(|| CoreError::invalid_param("missing chroma plane"))?;
                for y in 0..ch {
                    let (u, v) = (src[1].row(y), src[2].row(y));
                    for (x, pair) in uv.row_mut(y).chunks_exact_mut(2).take(cw).enumerate() {
                        pair[0] = u[x];
                        pair[1] = v[x];
                    }
                }
            }
            _ => {
                for (plane, offset) in [(1usize, 0usize), (2, 1)] {
                    let dst = out
                        .plane_mut(plane)
                        .ok_or_else(|| CoreError::invalid_param(format!("missing plane {plane}")))?;
                    for y in 0..ch {
                        let uv = src[1].row(y);
                        for (x, sample) in dst.row_mut(y).iter_mut().take(cw).enumerate() {
                            *sample = uv[x * 2 + offset];
                        }
                    }
                }
            }
        }
        Ok(out)
    }
}

impl FilterNode for Format {
    fn filter_name(&self) -> &'static str {
        "format"
    }

    fn configure(&mut self, link: &LinkContext<'_>) -> Result<LinkFormat> {
        let input = video_input(link)?;
        if !Self::supported(input.format, self.target) {
            return Err(FilterError::argument(
                "format",
                format!("cannot convert {} to {}", input.format, self.target),
            ));
        }
        Ok(LinkFormat::new(MediaParams::Video(VideoParams {
            format: self.target,
            ..input
        })))
    }

    fn process(&mut self, frame: Frame) -> mediastage_core::Result<Frame> {
        match frame.pixel_format() {
            Some(format) if format == self.target => Ok(frame),
            Some(format) if Self::supported(format, self.target) => self.convert(&frame),
            other => Err(ConfigError::mismatch(
                "pixel format",
                "yuv420p or nv12",
                other.map_or_else(|| frame.media_type().to_string(), |f| f.to_string()),
            )
            .into()),
        }
    }
}

/// `volume=gain`: scale every audio sample.
#[derive(Debug)]
pub struct Volume {
    gain: f32,
}

impl Volume {
    pub fn from_spec(spec: &FilterSpec) -> Result<Self> {
        let gain: f32 = parse_arg(spec, "gain", spec.arg("volume", 0))?.unwrap_or(1.0);
        if !gain.is_finite() || gain < 0.0 {
            return Err(FilterError::argument(&spec.name, format!("invalid gain {gain}")));
        }
        Ok(Self { gain })
    }
}

impl FilterNode for Volume {
    fn filter_name(&self) -> &'static str {
        "volume"
    }

    fn media_type(&self) -> Option<MediaType> {
        Some(MediaType::Audio)
    }

    fn configure(&mut self, link: &LinkContext<'_>) -> Result<LinkFormat> {
        Ok(*link.input)
    }

    fn process(&mut self, mut frame: Frame) -> mediastage_core::Result<Frame> {
        let Some(params) = frame.audio_params().copied() else {
            return Err(ConfigError::mismatch("media type", MediaType::Audio, frame.media_type()).into());
        };
        if self.gain == 1.0 {
            return Ok(frame);
        }
        let format = params.format;
        let bps = format.bytes_per_sample();
        let size = params.plane_size();
        for p in 0..params.num_planes() {
            let plane = frame
                .plane_mut(p)
                .ok_or_else(|| CoreError::invalid_param(format!("missing plane {p}")))?;
            for sample in plane.data_mut()[..size].chunks_exact_mut(bps) {
                let value = format.read_normalized(sample);
                format.write_normalized(value * self.gain, sample);
            }
        }
        Ok(frame)
    }
}

/// `hwupload`: copy software frames into device surfaces.
#[derive(Debug)]
pub struct HwUpload {
    pool_size: usize,
    ctx: Option<HardwareContext>,
    pool: Option<Arc<HwFramesContext>>,
}

impl HwUpload {
    pub fn from_spec(spec: &FilterSpec) -> Result<Self> {
        let pool_size = parse_arg(spec, "pool_size", spec.arg("pool_size", 0))?.unwrap_or(DEFAULT_POOL_SIZE);
        if pool_size == 0 {
            return Err(FilterError::argument(&spec.name, "pool_size must be positive"));
        }
        Ok(Self {
            pool_size,
            ctx: None,
            pool: None,
        })
    }

    fn pool_for(ctx: &HardwareContext, video: &VideoParams, pool_size: usize) -> Result<Arc<HwFramesContext>> {
        let hw_format = ctx
            .device_type()
            .hw_pixel_format()
            .ok_or_else(|| ConfigError::Missing("hardware pixel format".into()))?;
        let params = HwFramesParams::new(video.width, video.height, video.format, hw_format, pool_size);
        Ok(ctx.new_frames_context(params)?)
    }
}

impl FilterNode for HwUpload {
    fn filter_name(&self) -> &'static str {
        "hwupload"
    }

    fn uses_device(&self) -> bool {
        true
    }

    fn configure(&mut self, link: &LinkContext<'_>) -> Result<LinkFormat> {
        let input = video_input(link)?;
        let ctx = link.require_device()?;
        let pool = Self::pool_for(ctx, &input, self.pool_size)?;
        let output = VideoParams {
            format: pool.params().hw_format,
            ..input
        };
        debug!(node = link.node, device = ctx.id(), pool = pool.id(), "upload pool ready");
        self.ctx = Some(ctx.clone());
        self.pool = Some(pool);
        Ok(LinkFormat::hardware(MediaParams::Video(output), input.format))
    }

    fn process(&mut self, frame: Frame) -> mediastage_core::Result<Frame> {
        let (Some(ctx), Some(pool)) = (&self.ctx, &self.pool) else {
            return Err(ConfigError::Missing("hwupload frame pool".into()).into());
        };
        let geometry = (frame.width(), frame.height(), frame.pixel_format());
        let params = pool.params();
        if geometry != (params.width, params.height, Some(params.sw_format)) {
            let video = frame
                .video_params()
                .copied()
                .ok_or_else(|| ConfigError::mismatch("media type", MediaType::Video, frame.media_type()))?;
            debug!(width = video.width, height = video.height, "upload pool reconfigured");
            let pool = Self::pool_for(ctx, &video, self.pool_size)?;
            self.pool = Some(pool);
        }
        match &self.pool {
            Some(pool) => Ok(pool.upload(&frame)?),
            None => Err(ConfigError::Missing("hwupload frame pool".into()).into()),
        }
    }
}

/// `hwdownload`: copy device surfaces back to host memory.
#[derive(Debug)]
pub struct HwDownload;

impl FilterNode for HwDownload {
    fn filter_name(&self) -> &'static str {
        "hwdownload"
    }

    fn input_residency(&self) -> SinkResidency {
        SinkResidency::Hardware
    }

    fn configure(&mut self, link: &LinkContext<'_>) -> Result<LinkFormat> {
        let input = video_input(link)?;
        let sw_format = link.input.sw_format.unwrap_or(PixelFormat::Nv12);
        Ok(LinkFormat::new(MediaParams::Video(VideoParams {
            format: sw_format,
            ..input
        })))
    }

    fn process(&mut self, frame: Frame) -> mediastage_core::Result<Frame> {
        Ok(download(&frame)?)
    }
}

/// `scale_cuda`, `scale_vaapi`, `scale_vt`, `scale_qsv`: resize on the device.
#[derive(Debug)]
pub struct HwScale {
    name: &'static str,
    device_type: HwDeviceType,
    target: TargetSize,
    ctx: Option<HardwareContext>,
    pool: Option<Arc<HwFramesContext>>,
}

impl HwScale {
    const VARIANTS: [(&'static str, HwDeviceType); 4] = [
        ("scale_cuda", HwDeviceType::Cuda),
        ("scale_vaapi", HwDeviceType::Vaapi),
        ("scale_vt", HwDeviceType::VideoToolbox),
        ("scale_qsv", HwDeviceType::Qsv),
    ];

    /// Device type served by a hardware scale filter name.
    pub fn device_for(name: &str) -> Option<HwDeviceType> {
        Self::VARIANTS.iter().find(|(n, _)| *n == name).map(|(_, t)| *t)
    }

    pub fn from_spec(spec: &FilterSpec, device_type: HwDeviceType) -> Result<Self> {
        let name = Self::VARIANTS
            .iter()
            .find(|(_, t)| *t == device_type)
            .map(|(n, _)| *n)
            .ok_or_else(|| FilterError::UnknownFilter {
                name: spec.name.clone(),
            })?;
        Ok(Self {
            name,
            device_type,
            target: TargetSize::from_spec(spec)?,
            ctx: None,
            pool: None,
        })
    }
}

impl FilterNode for HwScale {
    fn filter_name(&self) -> &'static str {
        self.name
    }

    fn input_residency(&self) -> SinkResidency {
        SinkResidency::Hardware
    }

    fn uses_device(&self) -> bool {
        true
    }

    fn configure(&mut self, link: &LinkContext<'_>) -> Result<LinkFormat> {
        let input = video_input(link)?;
        let ctx = link.require_device()?;
        if ctx.device_type() != self.device_type {
            return Err(ConfigError::mismatch("hardware device type", self.device_type, ctx.device_type()).into());
        }
        let hw_format = self
            .device_type
            .hw_pixel_format()
            .ok_or_else(|| ConfigError::Missing("hardware pixel format".into()))?;
        if input.format != hw_format {
            return Err(ConfigError::mismatch("hardware pixel format", hw_format, input.format).into());
        }
        let sw_format = link.input.sw_format.unwrap_or(PixelFormat::Nv12);
        let (width, height) = self.target.resolve(&input)?;
        let pool = ctx.new_frames_context(HwFramesParams::new(width, height, sw_format, hw_format, DEFAULT_POOL_SIZE))?;
        self.ctx = Some(ctx.clone());
        self.pool = Some(pool);
        Ok(LinkFormat::hardware(
            MediaParams::Video(VideoParams {
                width,
                height,
                ..input
            }),
            sw_format,
        ))
    }

    fn process(&mut self, frame: Frame) -> mediastage_core::Result<Frame> {
        let (Some(ctx), Some(pool)) = (&self.ctx, &self.pool) else {
            return Err(ConfigError::Missing(format!("{} frame pool", self.name)).into());
        };
        ensure_same_device(ctx, &frame)?;
        let params = pool.params();
        let host = download(&frame)?;
        let scaled = if (host.width(), host.height()) == (params.width, params.height) {
            host
        } else {
            scale_nearest(&host, params.width, params.height)?
        };
        Ok(pool.upload(&scaled)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediastage_core::{ChannelLayout, SampleFormat};

    fn link_video(format: PixelFormat) -> LinkFormat {
        LinkFormat::new(MediaParams::Video(VideoParams::new(64, 32, format)))
    }

    fn configured(node: &mut dyn FilterNode, input: &LinkFormat) -> LinkFormat {
        node.configure(&LinkContext {
            node: "test",
            input,
            device: None,
        })
        .unwrap()
    }

    #[test]
    fn test_derived_size_keeps_aspect() {
        let target = TargetSize { width: 32, height: -1 };
        assert_eq!(target.resolve(&VideoParams::new(64, 36, PixelFormat::Yuv420p)).unwrap(), (32, 18));
        let target = TargetSize { width: -1, height: 1 };
        assert_eq!(target.resolve(&VideoParams::new(2, 64, PixelFormat::Yuv420p)).unwrap(), (2, 1));
    }

    #[test]
    fn test_derived_size_out_of_range() {
        let target = TargetSize { width: -1, height: 65535 };
        let wide = VideoParams::new(4_000_000_000, 1, PixelFormat::Yuv420p);
        assert!(matches!(
            target.resolve(&wide),
            Err(FilterError::Config(ConfigError::Invalid(_)))
        ));
    }

    #[test]
    fn test_scale_nearest_picks_source_pixels() {
        let mut src = Frame::video(4, 2, PixelFormat::Gray8).unwrap();
        src.plane_mut(0).unwrap().row_mut(0).copy_from_slice(&[1, 2, 3, 4]);
        src.plane_mut(0).unwrap().row_mut(1).copy_from_slice(&[5, 6, 7, 8]);
        let dst = scale_nearest(&src, 2, 1).unwrap();
        assert_eq!(dst.plane(0).unwrap().row(0), &[1, 3]);
        let up = scale_nearest(&src, 8, 2).unwrap();
        assert_eq!(up.plane(0).unwrap().row(1), &[5, 5, 6, 6, 7, 7, 8, 8]);
    }

    #[test]
    fn test_scale_keeps_aspect() {
        let spec = FilterSpec::parse("scale=w=32:h=-1").unwrap();
        let mut scale = Scale::from_spec(&spec).unwrap();
        let out = configured(&mut scale, &link_video(PixelFormat::Yuv420p));
        assert_eq!(out.params, MediaParams::Video(VideoParams::new(32, 16, PixelFormat::Yuv420p)));

        assert!(Scale::from_spec(&FilterSpec::parse("scale=-1:-1").unwrap()).is_err());
        assert!(Scale::from_spec(&FilterSpec::parse("scale=64").unwrap()).is_err());
        assert!(Scale::from_spec(&FilterSpec::parse("scale=0:4").unwrap()).is_err());
    }

    #[test]
    fn test_format_round_trip() {
        let mut src = Frame::video(4, 4, PixelFormat::Yuv420p).unwrap();
        src.plane_mut(1).unwrap().row_mut(0).copy_from_slice(&[10, 11]);
        src.plane_mut(2).unwrap().row_mut(0).copy_from_slice(&[20, 21]);
        let mut to_nv12 = Format::from_spec(&FilterSpec::parse("format=nv12").unwrap()).unwrap();
        let nv12 = to_nv12.process(src.clone()).unwrap();
        assert_eq!(nv12.pixel_format(), Some(PixelFormat::Nv12));
        assert_eq!(nv12.plane(1).unwrap().row(0), &[10, 20, 11, 21]);

        let mut back = Format::from_spec(&FilterSpec::parse("format=pix_fmts=yuv420p").unwrap()).unwrap();
        let yuv = back.process(nv12).unwrap();
        assert_eq!(yuv.plane(1).unwrap().row(0), &[10, 11]);
        assert_eq!(yuv.plane(2).unwrap().row(0), &[20, 21]);
    }

    #[test]
    fn test_format_rejects_unsupported() {
        assert!(Format::from_spec(&FilterSpec::parse("format=cuda").unwrap()).is_err());
        let mut rgb = Format::from_spec(&FilterSpec::parse("format=rgb24").unwrap()).unwrap();
        let err = rgb
            .configure(&LinkContext {
                node: "f",
                input: &link_video(PixelFormat::Yuv420p),
                device: None,
            })
            .unwrap_err();
        assert!(matches!(err, FilterError::InvalidArgument { .. }));
    }

    #[test]
    fn test_volume_halves_samples() {
        let mut frame = Frame::audio(SampleFormat::S16, ChannelLayout::MONO, 8000, 2).unwrap();
        let bytes: Vec<u8> = [16384i16, -16384].iter().flat_map(|v| v.to_ne_bytes()).collect();
        frame.plane_mut(0).unwrap().data_mut()[..4].copy_from_slice(&bytes);
        let mut volume = Volume::from_spec(&FilterSpec::parse("volume=0.5").unwrap()).unwrap();
        let out = volume.process(frame).unwrap();
        let data = out.plane(0).unwrap().data();
        assert_eq!(i16::from_ne_bytes([data[0], data[1]]), 8192);
        assert_eq!(i16::from_ne_bytes([data[2], data[3]]), -8192);
        assert!(Volume::from_spec(&FilterSpec::parse("volume=-1").unwrap()).is_err());
    }

    #[test]
    fn test_hw_nodes_need_device() {
        let mut upload = HwUpload::from_spec(&FilterSpec::parse("hwupload").unwrap()).unwrap();
        let err = upload
            .configure(&LinkContext {
                node: "up",
                input: &link_video(PixelFormat::Nv12),
                device: None,
            })
            .unwrap_err();
        assert!(matches!(err, FilterError::Config(ConfigError::Missing(_))));
        assert_eq!(HwScale::device_for("scale_vaapi"), Some(HwDeviceType::Vaapi));
        assert_eq!(HwScale::device_for("scale"), None);
    }
}
