//! Host device probing and the platform-preferred probe order.

use crate::device::{list_supported_device_types, HwDeviceType};
use std::path::{Path, PathBuf};
use tracing::trace;

/// A device found on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbedDevice {
    /// Device type.
    pub device_type: HwDeviceType,
    /// Device node backing it, when the platform exposes one.
    pub node: Option<PathBuf>,
    /// Priority (higher = preferred).
    pub priority: u32,
}

/// Order in which [`crate::HardwareContext::auto`] tries device types.
///
/// Native platform APIs come first, then vendor APIs, then generic compute APIs.
pub fn preferred_probe_order() -> Vec<HwDeviceType> {
    probe_order_for(&list_supported_device_types())
}

/// Preferred order restricted to `supported`.
pub(crate) fn probe_order_for(supported: &[HwDeviceType]) -> Vec<HwDeviceType> {
    const ORDER: &[HwDeviceType] = &[
        HwDeviceType::VideoToolbox,
        HwDeviceType::MediaCodec,
        HwDeviceType::Cuda,
        HwDeviceType::D3d11va,
        HwDeviceType::Vaapi,
        HwDeviceType::Qsv,
        HwDeviceType::Dxva2,
        HwDeviceType::Vdpau,
        HwDeviceType::Drm,
        HwDeviceType::Vulkan,
        HwDeviceType::OpenCl,
    ];
    ORDER
        .iter()
        .copied()
        .filter(|t| supported.contains(t))
        .collect()
}

const DRI_RENDER_NODE: &str = "/dev/dri/renderD128";
const NVIDIA_NODE: &str = "/dev/nvidia0";
const INTEL_VENDOR_ID: &str = "0x8086";

fn node_if_exists(path: &str) -> Option<PathBuf> {
    let path = Path::new(path);
    path.exists().then(|| path.to_path_buf())
}

fn is_intel_render_node() -> bool {
    std::fs::read_to_string("/sys/class/drm/renderD128/device/vendor")
        .map(|v| v.trim() == INTEL_VENDOR_ID)
        .unwrap_or(false)
}

/// Probe one device type. Returns `None` when the host shows no sign of it.
pub fn probe_device(device_type: HwDeviceType) -> Option<ProbedDevice> {
    if !list_supported_device_types().contains(&device_type) {
        return None;
    }
    let (node, priority) = match device_type {
        HwDeviceType::None => return None,
        HwDeviceType::VideoToolbox => (None, 100),
        HwDeviceType::MediaCodec => (None, 100),
        HwDeviceType::Cuda | HwDeviceType::Vdpau => {
            let node = if cfg!(target_os = "windows") {
                None
            } else {
                Some(node_if_exists(NVIDIA_NODE)?)
            };
            let priority = if device_type == HwDeviceType::Cuda { 90 } else { 40 };
            (node, priority)
        }
        HwDeviceType::Vaapi | HwDeviceType::Drm => (Some(node_if_exists(DRI_RENDER_NODE)?), 80),
        HwDeviceType::Qsv => {
            if cfg!(target_os = "linux") {
                let node = node_if_exists(DRI_RENDER_NODE)?;
                if !is_intel_render_node() {
                    return None;
                }
                (Some(node), 85)
            } else {
                (None, 85)
            }
        }
        HwDeviceType::D3d11va | HwDeviceType::Dxva2 => (None, 70),
        HwDeviceType::Vulkan | HwDeviceType::OpenCl => {
            if cfg!(target_os = "linux") {
                (Some(node_if_exists(DRI_RENDER_NODE)?), 20)
            } else {
                (None, 20)
            }
        }
    };
    trace!(device = %device_type, ?node, "device probed");
    Some(ProbedDevice {
        device_type,
        node,
        priority,
    })
}

/// Detect all device types with a visible presence on the host, best first.
pub fn probe_devices() -> Vec<ProbedDevice> {
    let mut found: Vec<ProbedDevice> = HwDeviceType::all()
        .iter()
        .filter_map(|t| probe_device(*t))
        .collect();
    found.sort_by(|a, b| b.priority.cmp(&a.priority));
    found
}
