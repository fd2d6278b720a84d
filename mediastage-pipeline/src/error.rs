//! Pipeline error types.

use mediastage_core::error::Error as CoreError;
use mediastage_filter::FilterError;
use mediastage_resample::ResampleError;
use thiserror::Error;

/// Pipeline error type.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Error raised by a stage.
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    /// Filter graph construction error.
    #[error("Filter graph error: {0}")]
    Filter(#[from] FilterError),

    /// Resampler construction error.
    #[error("Resample error: {0}")]
    Resample(#[from] ResampleError),

    /// Packet source failure.
    #[error("Source error: {0}")]
    Source(String),

    /// Packet sink failure.
    #[error("Sink error: {0}")]
    Sink(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Pipeline not initialized.
    #[error("Pipeline not initialized")]
    NotInitialized,

    /// The pipeline already flushed its stages or was closed.
    #[error("Pipeline already finished")]
    AlreadyFinished,

    /// The selected stream is not provided by the source.
    #[error("Stream {0} not found")]
    StreamNotFound(u32),
}

impl PipelineError {
    /// Check whether the error came from a stage breaking the submit/drain protocol.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::Core(e) if e.is_protocol_violation())
    }

    /// Check whether the error is a configuration mismatch.
    pub fn is_config(&self) -> bool {
        match self {
            Self::Core(e) => e.is_config(),
            Self::Filter(_) | Self::InvalidConfig(_) | Self::StreamNotFound(_) => true,
            _ => false,
        }
    }
}

/// Pipeline result type.
pub type Result<T> = std::result::Result<T, PipelineError>;
