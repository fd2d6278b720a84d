//! Error types for audio resampling.

use mediastage_core::{CodecError, ConfigError, Error};
use thiserror::Error;

/// Result type for resampling operations.
pub type Result<T> = std::result::Result<T, ResampleError>;

/// Errors that can occur during resampling.
#[derive(Debug, Error)]
pub enum ResampleError {
    /// Invalid sample rate specified.
    #[error("Invalid sample rate: {rate} Hz (must be > 0)")]
    InvalidSampleRate { rate: u32 },

    /// Invalid channel layout.
    #[error("Invalid channel layout: {layout}")]
    InvalidChannelLayout { layout: String },

    /// Input frame does not match the configured input format.
    #[error("Input {what} mismatch: expected {expected}, got {actual}")]
    InputMismatch {
        what: &'static str,
        expected: String,
        actual: String,
    },

    /// Input buffer size mismatch.
    #[error("Input buffer size {actual} is not divisible by channel count {channels}")]
    BufferSizeMismatch { actual: usize, channels: usize },

    /// Resampling ratio too extreme.
    #[error("Resampling ratio {ratio} exceeds maximum supported ratio")]
    RatioTooExtreme { ratio: f64 },

    /// Inconsistent buffer settings.
    #[error("Invalid resampler configuration: {0}")]
    InvalidConfig(String),

    /// Internal processing error.
    #[error("Internal resampling error: {message}")]
    Internal { message: String },
}

impl ResampleError {
    /// Create an internal error with a message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub(crate) fn mismatch(
        what: &'static str,
        expected: impl std::fmt::Display,
        actual: impl std::fmt::Display,
    ) -> Self {
        Self::InputMismatch {
            what,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

impl From<ResampleError> for Error {
    fn from(err: ResampleError) -> Self {
        match err {
            ResampleError::InputMismatch {
                what,
                expected,
                actual,
            } => Error::Config(ConfigError::Mismatch {
                what,
                expected,
                actual,
            }),
            ResampleError::BufferSizeMismatch { .. } => Error::InvalidParameter(err.to_string()),
            ResampleError::Internal { message } => Error::Codec(CodecError::Other(message)),
            other => Error::Config(ConfigError::Invalid(other.to_string())),
        }
    }
}
