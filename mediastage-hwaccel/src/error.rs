//! Error types for hardware acceleration.

use crate::device::HwDeviceType;
use mediastage_core::error::{ConfigError, Error as CoreError};
use thiserror::Error;

/// Hardware acceleration error.
///
/// Creation failures come in three flavours that callers handle differently:
/// an unknown device type is a configuration bug, a device that fails to
/// initialize is an environment limitation, and no device of any type is the
/// expected cue to fall back to software.
#[derive(Error, Debug)]
pub enum HwAccelError {
    /// The device type name or value is not a known hardware type.
    #[error("Unknown hardware device type: {0}")]
    UnknownDeviceType(String),

    /// The device type is known but the device could not be initialized.
    #[error("Failed to initialize {device_type} device: {reason}")]
    DeviceInit {
        device_type: HwDeviceType,
        reason: String,
    },

    /// Probing found no usable device of any type.
    #[error("No hardware device available (tried {tried:?})")]
    NoDevicesAvailable { tried: Vec<HwDeviceType> },

    /// Invalid frames context or stage configuration.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Every surface of the pool is in use.
    #[error("Frame pool exhausted: all {pool_size} surfaces in use")]
    PoolExhausted { pool_size: usize },

    /// The pool was replaced or its device disposed; it hands out no new surfaces.
    #[error("Frame pool {0} is retired")]
    PoolRetired(u64),

    /// The context was disposed.
    #[error("Hardware context {0} is disposed")]
    Disposed(u64),

    /// Frame belongs to a different device than the stage it was given to.
    #[error("Frame from device {actual} given to a stage bound to device {expected}")]
    DeviceMismatch { expected: u64, actual: u64 },

    /// Frame is not device resident.
    #[error("Frame is not a hardware frame")]
    NotHardwareFrame,

    /// Memory transfer error.
    #[error("Failed to transfer data: {0}")]
    Transfer(String),
}

/// Result type for hardware acceleration operations.
pub type Result<T> = std::result::Result<T, HwAccelError>;

impl HwAccelError {
    /// Check if this means "no usable hardware here" rather than a bug.
    pub fn is_environment_limitation(&self) -> bool {
        matches!(
            self,
            HwAccelError::DeviceInit { .. } | HwAccelError::NoDevicesAvailable { .. }
        )
    }
}

impl From<HwAccelError> for CoreError {
    fn from(err: HwAccelError) -> Self {
        match err {
            HwAccelError::Config(c) => CoreError::Config(c),
            HwAccelError::UnknownDeviceType(name) => {
                CoreError::Config(ConfigError::Invalid(format!("unknown hardware device type {name}")))
            }
            HwAccelError::DeviceMismatch { expected, actual } => CoreError::Config(
                ConfigError::mismatch("hardware device", expected, actual),
            ),
            HwAccelError::NotHardwareFrame => CoreError::Config(ConfigError::Residency {
                location: "hardware transfer".into(),
                expected: "hardware".into(),
                actual: "software".into(),
            }),
            HwAccelError::PoolExhausted { .. } => CoreError::ResourceExhausted(err.to_string()),
            other => CoreError::Hardware(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creation_failures_are_distinct() {
        let unknown = HwAccelError::UnknownDeviceType("foo".into());
        let init = HwAccelError::DeviceInit {
            device_type: HwDeviceType::Cuda,
            reason: "driver missing".into(),
        };
        let none = HwAccelError::NoDevicesAvailable {
            tried: vec![HwDeviceType::Vaapi],
        };
        assert!(!unknown.is_environment_limitation());
        assert!(init.is_environment_limitation());
        assert!(none.is_environment_limitation());
        assert_eq!(init.to_string(), "Failed to initialize cuda device: driver missing");
    }

    #[test]
    fn test_core_conversion() {
        let err: CoreError = HwAccelError::PoolExhausted { pool_size: 4 }.into();
        assert!(err.is_fatal());
        let err: CoreError = HwAccelError::DeviceMismatch {
            expected: 1,
            actual: 2,
        }
        .into();
        assert!(err.is_config());
        let err: CoreError = HwAccelError::UnknownDeviceType("x".into()).into();
        assert!(err.is_config());
    }
}
