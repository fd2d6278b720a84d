//! Device drivers: the seam between hardware contexts and actual devices.

use crate::device::HwDeviceType;
use crate::error::{HwAccelError, Result};
use crate::probe::probe_device;
use mediastage_core::error::ConfigError;
use mediastage_core::PixelFormat;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Geometry and formats a device accepts for frame pools.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FramesConstraints {
    pub min_width: u32,
    pub min_height: u32,
    pub max_width: u32,
    pub max_height: u32,
    /// Software formats the device can hold.
    pub sw_formats: Vec<PixelFormat>,
}

impl FramesConstraints {
    /// Validate a requested geometry.
    pub fn check_geometry(&self, width: u32, height: u32) -> std::result::Result<(), ConfigError> {
        if width < self.min_width || width > self.max_width {
            return Err(ConfigError::OutOfRange {
                what: "width",
                min: self.min_width,
                max: self.max_width,
                actual: width,
            });
        }
        if height < self.min_height || height > self.max_height {
            return Err(ConfigError::OutOfRange {
                what: "height",
                min: self.min_height,
                max: self.max_height,
                actual: height,
            });
        }
        Ok(())
    }

    /// Validate a software format.
    pub fn check_sw_format(&self, format: PixelFormat) -> std::result::Result<(), ConfigError> {
        if self.sw_formats.contains(&format) {
            return Ok(());
        }
        let allowed: Vec<String> = self.sw_formats.iter().map(|f| f.to_string()).collect();
        Err(ConfigError::mismatch(
            "software pixel format",
            format!("one of [{}]", allowed.join(", ")),
            format,
        ))
    }
}

impl Default for FramesConstraints {
    fn default() -> Self {
        Self {
            min_width: 16,
            min_height: 16,
            max_width: 4096,
            max_height: 4096,
            sw_formats: vec![PixelFormat::Nv12, PixelFormat::Yuv420p],
        }
    }
}

/// An open device. Released exactly once by its owning context.
pub trait DeviceHandle: Send + Sync + fmt::Debug {
    /// Device type.
    fn device_type(&self) -> HwDeviceType;

    /// Human readable device description.
    fn description(&self) -> String;

    /// Frame pool constraints.
    fn constraints(&self) -> FramesConstraints;

    /// Free the device.
    fn release(&mut self);
}

/// Opens devices.
pub trait DeviceDriver: Send + Sync + fmt::Debug {
    /// Driver name, for logs.
    fn name(&self) -> &'static str;

    /// Device types this driver can try to open.
    fn supported_types(&self) -> Vec<HwDeviceType>;

    /// Open a device of the given type. `device` selects a specific device, driver-defined.
    fn open(&self, device_type: HwDeviceType, device: Option<&str>) -> Result<Box<dyn DeviceHandle>>;
}

/// Driver for real host devices.
///
/// The build carries no native device backends, so opening a device whose
/// node is present still fails with [`HwAccelError::DeviceInit`]; contexts
/// created through this driver only ever report the environment limitation.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDriver;

impl DeviceDriver for SystemDriver {
    fn name(&self) -> &'static str {
        "system"
    }

    fn supported_types(&self) -> Vec<HwDeviceType> {
        crate::device::list_supported_device_types()
    }

    fn open(&self, device_type: HwDeviceType, _device: Option<&str>) -> Result<Box<dyn DeviceHandle>> {
        if device_type.is_none() {
            return Err(HwAccelError::UnknownDeviceType(device_type.name().to_string()));
        }
        if !self.supported_types().contains(&device_type) {
            return Err(HwAccelError::DeviceInit {
                device_type,
                reason: "not supported on this platform".into(),
            });
        }
        let reason = match probe_device(device_type) {
            Some(found) => match found.node {
                Some(node) => format!("{} present but no native backend in this build", node.display()),
                None => "no native backend in this build".to_string(),
            },
            None => "no device found".to_string(),
        };
        debug!(device = %device_type, %reason, "system device unavailable");
        Err(HwAccelError::DeviceInit {
            device_type,
            reason,
        })
    }
}

/// Configuration of the loopback driver.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LoopbackConfig {
    /// Device types the driver emulates.
    pub device_types: Vec<HwDeviceType>,
    /// Emulated types whose initialization fails.
    pub failing: Vec<HwDeviceType>,
    /// Constraints reported by every emulated device.
    pub constraints: FramesConstraints,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            device_types: vec![
                HwDeviceType::Cuda,
                HwDeviceType::VideoToolbox,
                HwDeviceType::Vaapi,
                HwDeviceType::Qsv,
            ],
            failing: Vec::new(),
            constraints: FramesConstraints::default(),
        }
    }
}

impl LoopbackConfig {
    /// Emulate only the given types.
    pub fn with_device_types(mut self, types: Vec<HwDeviceType>) -> Self {
        self.device_types = types;
        self
    }

    /// Make initialization of `device_type` fail.
    pub fn with_failing(mut self, device_type: HwDeviceType) -> Self {
        self.failing.push(device_type);
        self
    }

    /// Override the device constraints.
    pub fn with_constraints(mut self, constraints: FramesConstraints) -> Self {
        self.constraints = constraints;
        self
    }
}

/// Open and release counters shared by a loopback driver and its devices.
#[derive(Debug, Default)]
pub struct LoopbackStats {
    opened: AtomicUsize,
    released: AtomicUsize,
}

impl LoopbackStats {
    /// Devices opened so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Devices released so far.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

/// Driver whose devices keep "device memory" in host RAM.
#[derive(Debug, Clone, Default)]
pub struct LoopbackDriver {
    config: LoopbackConfig,
    stats: Arc<LoopbackStats>,
}

impl LoopbackDriver {
    /// Create a loopback driver.
    pub fn new(config: LoopbackConfig) -> Self {
        Self {
            config,
            stats: Arc::new(LoopbackStats::default()),
        }
    }

    /// Shared open/release counters.
    pub fn stats(&self) -> Arc<LoopbackStats> {
        self.stats.clone()
    }
}

impl DeviceDriver for LoopbackDriver {
    fn name(&self) -> &'static str {
        "loopback"
    }

    fn supported_types(&self) -> Vec<HwDeviceType> {
        self.config.device_types.clone()
    }

    fn open(&self, device_type: HwDeviceType, device: Option<&str>) -> Result<Box<dyn DeviceHandle>> {
        if device_type.is_none() {
            return Err(HwAccelError::UnknownDeviceType(device_type.name().to_string()));
        }
        if !self.config.device_types.contains(&device_type) {
            return Err(HwAccelError::DeviceInit {
                device_type,
                reason: "not emulated by this loopback driver".into(),
            });
        }
        if self.config.failing.contains(&device_type) {
            return Err(HwAccelError::DeviceInit {
                device_type,
                reason: "emulated initialization failure".into(),
            });
        }
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(LoopbackDevice {
            device_type,
            label: device.unwrap_or("0").to_string(),
            constraints: self.config.constraints.clone(),
            stats: self.stats.clone(),
            released: false,
        }))
    }
}

#[derive(Debug)]
struct LoopbackDevice {
    device_type: HwDeviceType,
    label: String,
    constraints: FramesConstraints,
    stats: Arc<LoopbackStats>,
    released: bool,
}

impl DeviceHandle for LoopbackDevice {
    fn device_type(&self) -> HwDeviceType {
        self.device_type
    }

    fn description(&self) -> String {
        format!("loopback {} device {}", self.device_type, self.label)
    }

    fn constraints(&self) -> FramesConstraints {
        self.constraints.clone()
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.stats.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}
