//! Hardware acceleration contexts for mediastage.
//!
//! A [`HardwareContext`] owns one device handle and, once derived, one device
//! frame pool. Any number of stages attach to it; the device is released
//! exactly once, when the last attached stage detaches, when the owner calls
//! [`HardwareContext::dispose`], or when the last handle is dropped,
//! whichever comes first.
//!
//! Devices are opened through a [`DeviceDriver`]:
//!
//! - [`SystemDriver`] probes the host for device nodes of each type.
//! - [`LoopbackDriver`] emulates device memory in host RAM, for tests and for
//!   running hardware-shaped pipelines on machines without accelerators.
//!
//! # Example
//!
//! ```ignore
//! use mediastage_hwaccel::{HardwareContext, HwFramesParams, LoopbackDriver};
//!
//! // No hardware is an expected outcome, not an error.
//! let Some(ctx) = HardwareContext::auto() else {
//!     return run_in_software();
//! };
//! let constraints = ctx.get_hardware_frames_constraints()?;
//! let pool = ctx.derive_frames_context(HwFramesParams::new(
//!     1920, 1080, PixelFormat::Nv12, ctx.device_type().hw_pixel_format().unwrap(), 8,
//! ))?;
//! ```

pub mod attachment;
pub mod context;
pub mod device;
pub mod driver;
pub mod error;
pub mod frames;
pub mod probe;
pub mod transfer;

pub use attachment::{HwAttachment, HwAware};
pub use context::HardwareContext;
pub use device::{list_supported_device_types, HwDeviceType};
pub use driver::{
    DeviceDriver, DeviceHandle, FramesConstraints, LoopbackConfig, LoopbackDriver, LoopbackStats,
    SystemDriver,
};
pub use error::{HwAccelError, Result};
pub use frames::{HwFramesContext, HwFramesParams};
pub use probe::{preferred_probe_order, probe_devices, ProbedDevice};
pub use transfer::{download, ensure_same_device, upload};
