//! Raw media frames.
//!
//! A [`Frame`] carries either video or audio parameters and its storage is
//! either a set of software planes or an opaque hardware surface owned by a
//! device frame pool. The storage is an enum, so a frame can never be partly
//! software and partly hardware resident.

use crate::error::{ConfigError, Error, Result};
use crate::rational::Rational;
use crate::sample::{AudioParams, ChannelLayout, SampleFormat};
use crate::timestamp::{Duration, Timestamp};
use crate::format::MediaType;
use bitflags::bitflags;
use std::fmt;
use std::sync::Arc;

/// Stride alignment for software planes.
const STRIDE_ALIGN: usize = 32;

/// Pixel format for video frames. Hardware formats describe opaque device surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum PixelFormat {
    /// Planar YUV 4:2:0, 12bpp (1 Cr & Cb sample per 2x2 Y samples).
    Yuv420p,
    /// Planar YUV 4:2:2, 16bpp (1 Cr & Cb sample per 2x1 Y samples).
    Yuv422p,
    /// Planar YUV 4:4:4, 24bpp (no subsampling).
    Yuv444p,
    /// Y plane followed by an interleaved UV plane, 4:2:0.
    Nv12,
    /// Packed RGB24, 24bpp.
    Rgb24,
    /// Packed RGBA, 32bpp.
    Rgba,
    /// Grayscale, 8bpp.
    Gray8,
    /// CUDA device memory.
    Cuda,
    /// VA-API surface.
    Vaapi,
    /// VideoToolbox pixel buffer.
    VideoToolbox,
    /// Intel Quick Sync surface.
    Qsv,
    /// VDPAU surface.
    Vdpau,
    /// Direct3D 11 texture.
    D3d11,
    /// DXVA2 surface.
    Dxva2,
    /// DRM PRIME buffer.
    DrmPrime,
    /// OpenCL image.
    OpenCl,
    /// Android MediaCodec buffer.
    MediaCodec,
    /// Vulkan image.
    Vulkan,
}

impl PixelFormat {
    /// Check if frames of this format live on a hardware device.
    pub fn is_hardware(&self) -> bool {
        !matches!(
            self,
            Self::Yuv420p
                | Self::Yuv422p
                | Self::Yuv444p
                | Self::Nv12
                | Self::Rgb24
                | Self::Rgba
                | Self::Gray8
        )
    }

    /// Get the number of planes for this pixel format. Hardware formats have none.
    pub fn num_planes(&self) -> usize {
        match self {
            Self::Yuv420p | Self::Yuv422p | Self::Yuv444p => 3,
            Self::Nv12 => 2,
            Self::Rgb24 | Self::Rgba | Self::Gray8 => 1,
            _ => 0,
        }
    }

    /// Get chroma subsampling factors (horizontal, vertical).
    pub fn chroma_subsampling(&self) -> (u32, u32) {
        match self {
            Self::Yuv420p | Self::Nv12 => (2, 2),
            Self::Yuv422p => (2, 1),
            _ => (1, 1),
        }
    }

    /// Visible bytes per row and number of rows of `plane` for the given dimensions.
    pub fn plane_dims(&self, plane: usize, width: u32, height: u32) -> (usize, usize) {
        let (w, h) = (width as usize, height as usize);
        let (hsub, vsub) = self.chroma_subsampling();
        let (cw, ch) = (
            w.div_ceil(hsub as usize),
            h.div_ceil(vsub as usize),
        );
        match (self, plane) {
            (Self::Yuv420p | Self::Yuv422p | Self::Yuv444p, 0) => (w, h),
            (Self::Yuv420p | Self::Yuv422p | Self::Yuv444p, 1 | 2) => (cw, ch),
            (Self::Nv12, 0) => (w, h),
            (Self::Nv12, 1) => (cw * 2, ch),
            (Self::Rgb24, 0) => (w * 3, h),
            (Self::Rgba, 0) => (w * 4, h),
            (Self::Gray8, 0) => (w, h),
            _ => (0, 0),
        }
    }

    /// Tightly packed size of one picture in bytes.
    pub fn picture_size(&self, width: u32, height: u32) -> usize {
        (0..self.num_planes())
            .map(|p| {
                let (row, rows) = self.plane_dims(p, width, height);
                row * rows
            })
            .sum()
    }

    /// Look up a format by name.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "yuv420p" => Self::Yuv420p,
            "yuv422p" => Self::Yuv422p,
            "yuv444p" => Self::Yuv444p,
            "nv12" => Self::Nv12,
            "rgb24" => Self::Rgb24,
            "rgba" => Self::Rgba,
            "gray" | "gray8" => Self::Gray8,
            "cuda" => Self::Cuda,
            "vaapi" => Self::Vaapi,
            "videotoolbox_vld" => Self::VideoToolbox,
            "qsv" => Self::Qsv,
            "vdpau" => Self::Vdpau,
            "d3d11" => Self::D3d11,
            "dxva2_vld" => Self::Dxva2,
            "drm_prime" => Self::DrmPrime,
            "opencl" => Self::OpenCl,
            "mediacodec" => Self::MediaCodec,
            "vulkan" => Self::Vulkan,
            _ => return None,
        })
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Yuv420p => "yuv420p",
            Self::Yuv422p => "yuv422p",
            Self::Yuv444p => "yuv444p",
            Self::Nv12 => "nv12",
            Self::Rgb24 => "rgb24",
            Self::Rgba => "rgba",
            Self::Gray8 => "gray8",
            Self::Cuda => "cuda",
            Self::Vaapi => "vaapi",
            Self::VideoToolbox => "videotoolbox_vld",
            Self::Qsv => "qsv",
            Self::Vdpau => "vdpau",
            Self::D3d11 => "d3d11",
            Self::Dxva2 => "dxva2_vld",
            Self::DrmPrime => "drm_prime",
            Self::OpenCl => "opencl",
            Self::MediaCodec => "mediacodec",
            Self::Vulkan => "vulkan",
        };
        f.write_str(name)
    }
}

bitflags! {
    /// Frame flags indicating frame properties.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FrameFlags: u32 {
        /// This is a keyframe (I-frame).
        const KEYFRAME = 0x0001;
        /// Frame is corrupted or incomplete.
        const CORRUPT = 0x0002;
        /// Frame should be discarded after decoding (used for reference only).
        const DISCARD = 0x0004;
    }
}

/// Parameters of a video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VideoParams {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel format; a hardware format for device-resident frames.
    pub format: PixelFormat,
    /// Sample aspect ratio, zero when unknown.
    pub sample_aspect_ratio: Rational,
}

impl VideoParams {
    /// Create video parameters with unknown aspect ratio.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            sample_aspect_ratio: Rational::zero(),
        }
    }
}

/// Video or audio parameters of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MediaParams {
    Video(VideoParams),
    Audio(AudioParams),
}

impl MediaParams {
    /// Media type of these parameters.
    pub fn media_type(&self) -> MediaType {
        match self {
            Self::Video(_) => MediaType::Video,
            Self::Audio(_) => MediaType::Audio,
        }
    }

    fn num_planes(&self) -> usize {
        match self {
            Self::Video(v) => v.format.num_planes(),
            Self::Audio(a) => a.num_planes(),
        }
    }

    fn plane_dims(&self, plane: usize) -> (usize, usize) {
        match self {
            Self::Video(v) => v.format.plane_dims(plane, v.width, v.height),
            Self::Audio(a) => (a.plane_size(), 1),
        }
    }
}

/// One software plane: `rows` rows of `row_bytes` visible bytes, `stride` bytes apart.
#[derive(Clone, PartialEq, Eq)]
pub struct Plane {
    data: Vec<u8>,
    stride: usize,
    row_bytes: usize,
    rows: usize,
}

impl Plane {
    /// Allocate a zeroed plane with an aligned stride.
    pub fn alloc(row_bytes: usize, rows: usize) -> Self {
        let stride = (row_bytes + STRIDE_ALIGN - 1) & !(STRIDE_ALIGN - 1);
        Self {
            data: vec![0u8; stride * rows],
            stride,
            row_bytes,
            rows,
        }
    }

    /// Wrap tightly packed rows.
    pub fn packed(data: Vec<u8>, row_bytes: usize, rows: usize) -> Result<Self> {
        if data.len() < row_bytes * rows {
            return Err(Error::invalid_param(format!(
                "plane of {} bytes cannot hold {} rows of {} bytes",
                data.len(),
                rows,
                row_bytes
            )));
        }
        Ok(Self {
            data,
            stride: row_bytes,
            row_bytes,
            rows,
        })
    }

    /// Raw plane memory including stride padding.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable raw plane memory.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Distance in bytes between row starts.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Visible bytes per row.
    pub fn row_bytes(&self) -> usize {
        self.row_bytes
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Visible bytes of row `y`.
    pub fn row(&self, y: usize) -> &[u8] {
        let start = y * self.stride;
        &self.data[start..start + self.row_bytes]
    }

    /// Mutable visible bytes of row `y`.
    pub fn row_mut(&mut self, y: usize) -> &mut [u8] {
        let start = y * self.stride;
        &mut self.data[start..start + self.row_bytes]
    }

    /// Visible bytes with stride padding removed.
    pub fn to_packed(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.row_bytes * self.rows);
        for y in 0..self.rows {
            out.extend_from_slice(self.row(y));
        }
        out
    }
}

impl fmt::Debug for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plane")
            .field("stride", &self.stride)
            .field("row_bytes", &self.row_bytes)
            .field("rows", &self.rows)
            .finish()
    }
}

/// A device frame pool that hands out opaque surfaces.
///
/// Implemented by the hardware layer; the core only needs to identify the
/// owning device, read surfaces back and return them when the last frame
/// referencing them goes away.
pub trait HwSurfacePool: Send + Sync + fmt::Debug {
    /// Unique id of this pool.
    fn pool_id(&self) -> u64;

    /// Unique id of the device context owning this pool.
    fn device_id(&self) -> u64;

    /// Hardware pixel format of surfaces in this pool.
    fn hw_format(&self) -> PixelFormat;

    /// Software format the surfaces hold.
    fn sw_format(&self) -> PixelFormat;

    /// A retired pool hands out no new surfaces but keeps existing ones valid.
    fn is_retired(&self) -> bool;

    /// Copy the surface contents to host memory.
    fn read_surface(&self, index: usize) -> Result<Vec<Plane>>;

    /// Return a surface to the pool.
    fn release_surface(&self, index: usize);
}

struct SurfaceLease {
    pool: Arc<dyn HwSurfacePool>,
    index: usize,
}

impl Drop for SurfaceLease {
    fn drop(&mut self) {
        self.pool.release_surface(self.index);
    }
}

/// Reference to a surface in a device frame pool. The surface returns to its
/// pool when the last clone is dropped.
#[derive(Clone)]
pub struct HwSurface {
    lease: Arc<SurfaceLease>,
}

impl HwSurface {
    /// Take ownership of surface `index` of `pool`.
    pub fn new(pool: Arc<dyn HwSurfacePool>, index: usize) -> Self {
        Self {
            lease: Arc::new(SurfaceLease { pool, index }),
        }
    }

    /// Slot index inside the pool.
    pub fn index(&self) -> usize {
        self.lease.index
    }

    /// The owning pool.
    pub fn pool(&self) -> &Arc<dyn HwSurfacePool> {
        &self.lease.pool
    }

    /// Device the surface lives on.
    pub fn device_id(&self) -> u64 {
        self.lease.pool.device_id()
    }

    /// Copy the surface contents to host memory.
    pub fn read(&self) -> Result<Vec<Plane>> {
        self.lease.pool.read_surface(self.lease.index)
    }
}

impl fmt::Debug for HwSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HwSurface")
            .field("pool", &self.lease.pool.pool_id())
            .field("device", &self.lease.pool.device_id())
            .field("index", &self.lease.index)
            .finish()
    }
}

/// Backing storage of a frame.
#[derive(Clone, Debug)]
pub enum FrameStorage {
    /// No payload; the frame was unreferenced.
    Empty,
    /// Host-addressable planes, shared copy-on-write.
    Software(Arc<Vec<Plane>>),
    /// Opaque device surface.
    Hardware(HwSurface),
}

/// A raw media frame.
#[derive(Clone)]
pub struct Frame {
    params: MediaParams,
    storage: FrameStorage,
    /// Presentation timestamp.
    pub pts: Timestamp,
    /// Frame duration.
    pub duration: Duration,
    /// Frame flags.
    pub flags: FrameFlags,
}

impl Frame {
    /// Allocate a zeroed software video frame.
    pub fn video(width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        if format.is_hardware() {
            return Err(Error::invalid_param(format!(
                "{format} frames must be allocated from a hardware frames context"
            )));
        }
        if width == 0 || height == 0 {
            return Err(Error::invalid_param(format!(
                "invalid frame size {width}x{height}"
            )));
        }
        let params = MediaParams::Video(VideoParams::new(width, height, format));
        Ok(Self::with_alloc(params))
    }

    /// Allocate a zeroed software audio frame.
    pub fn audio(
        format: SampleFormat,
        channel_layout: ChannelLayout,
        sample_rate: u32,
        nb_samples: u32,
    ) -> Result<Self> {
        if !channel_layout.is_valid() {
            return Err(Error::invalid_param(format!(
                "invalid channel layout {channel_layout}"
            )));
        }
        if sample_rate == 0 {
            return Err(Error::invalid_param("sample rate must be positive"));
        }
        let params = MediaParams::Audio(AudioParams {
            format,
            sample_rate,
            channel_layout,
            nb_samples,
        });
        Ok(Self::with_alloc(params))
    }

    fn with_alloc(params: MediaParams) -> Self {
        let planes = (0..params.num_planes())
            .map(|p| {
                let (row, rows) = params.plane_dims(p);
                Plane::alloc(row, rows)
            })
            .collect();
        Self::from_parts(params, FrameStorage::Software(Arc::new(planes)))
    }

    fn from_parts(params: MediaParams, storage: FrameStorage) -> Self {
        Self {
            params,
            storage,
            pts: Timestamp::none(),
            duration: Duration::zero(),
            flags: FrameFlags::empty(),
        }
    }

    /// Build a software frame from existing planes.
    pub fn from_planes(params: MediaParams, planes: Vec<Plane>) -> Result<Self> {
        if let MediaParams::Video(v) = &params {
            if v.format.is_hardware() {
                return Err(ConfigError::Residency {
                    location: "software frame".into(),
                    expected: "software pixel format".into(),
                    actual: v.format.to_string(),
                }
                .into());
            }
        }
        if planes.len() != params.num_planes() {
            return Err(Error::invalid_param(format!(
                "expected {} planes, got {}",
                params.num_planes(),
                planes.len()
            )));
        }
        for (i, plane) in planes.iter().enumerate() {
            let (row, rows) = params.plane_dims(i);
            if plane.row_bytes() < row || plane.rows() < rows {
                return Err(Error::invalid_param(format!(
                    "plane {i} is {}x{} bytes, need {row}x{rows}",
                    plane.row_bytes(),
                    plane.rows()
                )));
            }
        }
        Ok(Self::from_parts(params, FrameStorage::Software(Arc::new(planes))))
    }

    /// Wrap a device surface. `params.format` must be the pool's hardware format.
    pub fn from_hw_surface(params: VideoParams, surface: HwSurface) -> Result<Self> {
        let hw_format = surface.pool().hw_format();
        if params.format != hw_format {
            return Err(ConfigError::mismatch("hardware pixel format", hw_format, params.format).into());
        }
        Ok(Self::from_parts(
            MediaParams::Video(params),
            FrameStorage::Hardware(surface),
        ))
    }

    /// Media parameters.
    pub fn params(&self) -> &MediaParams {
        &self.params
    }

    /// Media type.
    pub fn media_type(&self) -> MediaType {
        self.params.media_type()
    }

    /// Video parameters, if this is a video frame.
    pub fn video_params(&self) -> Option<&VideoParams> {
        match &self.params {
            MediaParams::Video(v) => Some(v),
            MediaParams::Audio(_) => None,
        }
    }

    /// Audio parameters, if this is an audio frame.
    pub fn audio_params(&self) -> Option<&AudioParams> {
        match &self.params {
            MediaParams::Audio(a) => Some(a),
            MediaParams::Video(_) => None,
        }
    }

    /// Width in pixels, zero for audio.
    pub fn width(&self) -> u32 {
        self.video_params().map_or(0, |v| v.width)
    }

    /// Height in pixels, zero for audio.
    pub fn height(&self) -> u32 {
        self.video_params().map_or(0, |v| v.height)
    }

    /// Pixel format of a video frame.
    pub fn pixel_format(&self) -> Option<PixelFormat> {
        self.video_params().map(|v| v.format)
    }

    /// Sample format of an audio frame.
    pub fn sample_format(&self) -> Option<SampleFormat> {
        self.audio_params().map(|a| a.format)
    }

    /// Number of samples per channel, zero for video.
    pub fn nb_samples(&self) -> u32 {
        self.audio_params().map_or(0, |a| a.nb_samples)
    }

    /// Set the sample aspect ratio of a video frame.
    pub fn set_sample_aspect_ratio(&mut self, sar: Rational) {
        if let MediaParams::Video(v) = &mut self.params {
            v.sample_aspect_ratio = sar;
        }
    }

    /// Storage of this frame.
    pub fn storage(&self) -> &FrameStorage {
        &self.storage
    }

    /// Check if the frame lives on a hardware device.
    pub fn is_hw_frame(&self) -> bool {
        matches!(self.storage, FrameStorage::Hardware(_))
    }

    /// Device surface of a hardware frame.
    pub fn hw_surface(&self) -> Option<&HwSurface> {
        match &self.storage {
            FrameStorage::Hardware(s) => Some(s),
            _ => None,
        }
    }

    /// Check if the frame has no payload.
    pub fn is_empty(&self) -> bool {
        matches!(self.storage, FrameStorage::Empty)
    }

    /// Software planes.
    pub fn planes(&self) -> Option<&[Plane]> {
        match &self.storage {
            FrameStorage::Software(p) => Some(p.as_slice()),
            _ => None,
        }
    }

    /// One software plane.
    pub fn plane(&self, index: usize) -> Option<&Plane> {
        self.planes().and_then(|p| p.get(index))
    }

    /// Mutable access to a software plane, copying shared planes first.
    pub fn plane_mut(&mut self, index: usize) -> Option<&mut Plane> {
        match &mut self.storage {
            FrameStorage::Software(p) => Arc::make_mut(p).get_mut(index),
            _ => None,
        }
    }

    /// Copy software planes into independent buffers. Hardware surfaces are
    /// write-once and stay shared.
    pub fn deep_clone(&self) -> Self {
        let mut copy = self.clone();
        if let FrameStorage::Software(p) = &self.storage {
            copy.storage = FrameStorage::Software(Arc::new(p.as_ref().clone()));
        }
        copy
    }

    /// Release the payload, keeping parameters and timing.
    pub fn unref(&mut self) {
        self.storage = FrameStorage::Empty;
    }

    /// Copy timing and flags from another frame.
    pub fn copy_props(&mut self, other: &Frame) {
        self.pts = other.pts;
        self.duration = other.duration;
        self.flags = other.flags;
    }

    /// Set the presentation timestamp.
    pub fn with_pts(mut self, pts: Timestamp) -> Self {
        self.pts = pts;
        self
    }

    /// Set the duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Check if this is a keyframe.
    pub fn is_keyframe(&self) -> bool {
        self.flags.contains(FrameFlags::KEYFRAME)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let residency = match &self.storage {
            FrameStorage::Empty => "empty",
            FrameStorage::Software(_) => "software",
            FrameStorage::Hardware(_) => "hardware",
        };
        f.debug_struct("Frame")
            .field("params", &self.params)
            .field("storage", &residency)
            .field("pts", &self.pts.value())
            .field("flags", &self.flags)
            .finish()
    }
}
