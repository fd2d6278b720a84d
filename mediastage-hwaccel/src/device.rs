//! Hardware device types and their stable names.

use crate::error::HwAccelError;
use mediastage_core::PixelFormat;
use std::fmt;
use std::str::FromStr;

/// Hardware device type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HwDeviceType {
    /// No device; the "unknown" sentinel.
    #[default]
    None,
    /// NVIDIA CUDA.
    Cuda,
    /// Apple VideoToolbox.
    VideoToolbox,
    /// VA-API (Linux).
    Vaapi,
    /// Intel Quick Sync Video.
    Qsv,
    /// VDPAU (older Linux API).
    Vdpau,
    /// Direct3D 11 Video Acceleration.
    D3d11va,
    /// DXVA2 (Windows).
    Dxva2,
    /// DRM PRIME buffers.
    Drm,
    /// OpenCL.
    OpenCl,
    /// Android MediaCodec.
    MediaCodec,
    /// Vulkan.
    Vulkan,
}

const ALL_TYPES: [HwDeviceType; 11] = [
    HwDeviceType::Cuda,
    HwDeviceType::VideoToolbox,
    HwDeviceType::Vaapi,
    HwDeviceType::Qsv,
    HwDeviceType::Vdpau,
    HwDeviceType::D3d11va,
    HwDeviceType::Dxva2,
    HwDeviceType::Drm,
    HwDeviceType::OpenCl,
    HwDeviceType::MediaCodec,
    HwDeviceType::Vulkan,
];

impl HwDeviceType {
    /// Every real device type.
    pub fn all() -> &'static [HwDeviceType] {
        &ALL_TYPES
    }

    /// Stable lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Cuda => "cuda",
            Self::VideoToolbox => "videotoolbox",
            Self::Vaapi => "vaapi",
            Self::Qsv => "qsv",
            Self::Vdpau => "vdpau",
            Self::D3d11va => "d3d11va",
            Self::Dxva2 => "dxva2",
            Self::Drm => "drm",
            Self::OpenCl => "opencl",
            Self::MediaCodec => "mediacodec",
            Self::Vulkan => "vulkan",
        }
    }

    /// Look up a type by name. Unknown names map to [`HwDeviceType::None`].
    pub fn find_by_name(name: &str) -> Self {
        ALL_TYPES
            .iter()
            .copied()
            .find(|t| t.name() == name)
            .unwrap_or(Self::None)
    }

    /// Check for the "none" sentinel.
    pub fn is_none(&self) -> bool {
        *self == Self::None
    }

    /// Pixel format of surfaces allocated on this device type.
    pub fn hw_pixel_format(&self) -> Option<PixelFormat> {
        Some(match self {
            Self::None => return None,
            Self::Cuda => PixelFormat::Cuda,
            Self::VideoToolbox => PixelFormat::VideoToolbox,
            Self::Vaapi => PixelFormat::Vaapi,
            Self::Qsv => PixelFormat::Qsv,
            Self::Vdpau => PixelFormat::Vdpau,
            Self::D3d11va => PixelFormat::D3d11,
            Self::Dxva2 => PixelFormat::Dxva2,
            Self::Drm => PixelFormat::DrmPrime,
            Self::OpenCl => PixelFormat::OpenCl,
            Self::MediaCodec => PixelFormat::MediaCodec,
            Self::Vulkan => PixelFormat::Vulkan,
        })
    }
}

impl fmt::Display for HwDeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HwDeviceType {
    type Err = HwAccelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Self::find_by_name(s) {
            Self::None => Err(HwAccelError::UnknownDeviceType(s.to_string())),
            t => Ok(t),
        }
    }
}

/// Device types this platform can host, in no particular order.
pub fn list_supported_device_types() -> Vec<HwDeviceType> {
    #[cfg(target_os = "macos")]
    {
        vec![HwDeviceType::VideoToolbox, HwDeviceType::OpenCl, HwDeviceType::Vulkan]
    }

    #[cfg(target_os = "linux")]
    {
        vec![
            HwDeviceType::Cuda,
            HwDeviceType::Vaapi,
            HwDeviceType::Qsv,
            HwDeviceType::Vdpau,
            HwDeviceType::Drm,
            HwDeviceType::OpenCl,
            HwDeviceType::Vulkan,
        ]
    }

    #[cfg(target_os = "windows")]
    {
        vec![
            HwDeviceType::Cuda,
            HwDeviceType::D3d11va,
            HwDeviceType::Dxva2,
            HwDeviceType::Qsv,
            HwDeviceType::OpenCl,
            HwDeviceType::Vulkan,
        ]
    }

    #[cfg(target_os = "android")]
    {
        vec![HwDeviceType::MediaCodec, HwDeviceType::Vulkan, HwDeviceType::OpenCl]
    }

    #[cfg(not(any(
        target_os = "macos",
        target_os = "linux",
        target_os = "windows",
        target_os = "android"
    )))]
    {
        Vec::new()
    }
}
