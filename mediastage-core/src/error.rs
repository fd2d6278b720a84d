//! Error types for mediastage.
//!
//! Errors are split along the lines callers act on: protocol violations are
//! programming bugs, configuration errors describe an expected/actual mismatch,
//! codec errors come from the wrapped codec, and resource exhaustion is fatal
//! to the stage that hit it. "Needs more input", "needs draining" and "end of
//! stream" are not errors at all; they are return states of the stage protocol.

use crate::session::{StageId, StageKind};
use thiserror::Error;

/// Main error type for mediastage.
#[derive(Error, Debug)]
pub enum Error {
    /// The caller broke the submit/drain protocol.
    #[error("Protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    /// Incompatible configuration, detected at the call that exposes it.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Codec errors (encoding/decoding/bitstream rewriting).
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Hardware device or transfer failure.
    #[error("Hardware error: {0}")]
    Hardware(String),

    /// Resource exhausted (memory, frame pools, device surfaces).
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Invalid parameter provided.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Unsupported feature or format.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// The stage was closed after a fatal error.
    #[error("Stage {0} is closed")]
    Closed(StageId),

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Misuse of the submit/drain protocol.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// An operation was issued before `open`.
    #[error("{kind} {stage}: {operation} called before open")]
    NotOpen {
        stage: StageId,
        kind: StageKind,
        operation: &'static str,
    },

    /// `open` was called twice.
    #[error("{kind} {stage}: already open")]
    AlreadyOpen { stage: StageId, kind: StageKind },

    /// An operation was issued after `close`.
    #[error("{kind} {stage}: {operation} called after close")]
    AfterClose {
        stage: StageId,
        kind: StageKind,
        operation: &'static str,
    },

    /// Submit was called again after the stage already reported `Ended`.
    #[error("{kind} {stage}: submit after end of stream was already reported")]
    SubmitAfterEnded { stage: StageId, kind: StageKind },

    /// A payload rejected with `Busy` was re-submitted without draining first.
    #[error("{kind} {stage}: busy payload re-submitted without an intervening drain")]
    ResubmitWithoutDrain { stage: StageId, kind: StageKind },

    /// The stage reported `Busy` but draining it produced nothing.
    #[error("{kind} {stage}: stage is busy but has no output to drain")]
    Stalled { stage: StageId, kind: StageKind },
}

/// Configuration errors. Each variant carries what was expected and what was found.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Frame or stream format differs from the configured one.
    #[error("{what} mismatch: expected {expected}, got {actual}")]
    Mismatch {
        what: &'static str,
        expected: String,
        actual: String,
    },

    /// Geometry outside the device constraints.
    #[error("{what} {actual} outside allowed range {min}..={max}")]
    OutOfRange {
        what: &'static str,
        min: u32,
        max: u32,
        actual: u32,
    },

    /// Software and hardware residency mixed where they must not be.
    #[error("{location}: expected {expected} frame, got {actual} frame")]
    Residency {
        location: String,
        expected: String,
        actual: String,
    },

    /// Required setting missing.
    #[error("missing {0}")]
    Missing(String),

    /// Any other invalid configuration.
    #[error("{0}")]
    Invalid(String),
}

impl ConfigError {
    /// Build a mismatch error from anything displayable.
    pub fn mismatch(
        what: &'static str,
        expected: impl std::fmt::Display,
        actual: impl std::fmt::Display,
    ) -> Self {
        ConfigError::Mismatch {
            what,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// Codec errors.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Codec not found in the registry.
    #[error("Unknown codec: {0}")]
    UnknownCodec(String),

    /// Payload is malformed for this codec.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Payload size does not match the configured geometry.
    #[error("Invalid payload size: expected {expected} bytes, got {actual}")]
    InvalidSize { expected: usize, actual: usize },

    /// Invalid NAL unit.
    #[error("Invalid NAL unit: {0}")]
    InvalidNalUnit(String),

    /// Invalid codec extradata.
    #[error("Invalid extradata: {0}")]
    InvalidExtradata(String),

    /// Generic codec error message.
    #[error("{0}")]
    Other(String),
}

impl From<String> for CodecError {
    fn from(s: String) -> Self {
        CodecError::Other(s)
    }
}

impl From<&str> for CodecError {
    fn from(s: &str) -> Self {
        CodecError::Other(s.to_string())
    }
}

/// Result type alias using the mediastage Error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an invalid parameter error.
    pub fn invalid_param(msg: impl Into<String>) -> Self {
        Error::InvalidParameter(msg.into())
    }

    /// Create an unsupported error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Create an invalid configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(ConfigError::Invalid(msg.into()))
    }

    /// Check if this is a caller bug.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }

    /// Check if this is a configuration error.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// Check if the stage that produced this error can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ResourceExhausted(_) | Error::Closed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatch_message_names_both_sides() {
        let err: Error = ConfigError::mismatch("width", 1920, 1280).into();
        assert!(err.is_config());
        assert_eq!(
            err.to_string(),
            "Configuration error: width mismatch: expected 1920, got 1280"
        );
    }

    #[test]
    fn test_classification() {
        let stage = StageId::new();
        let err: Error = ProtocolViolation::ResubmitWithoutDrain {
            stage,
            kind: StageKind::Decoder,
        }
        .into();
        assert!(err.is_protocol_violation());
        assert!(!err.is_fatal());

        assert!(Error::ResourceExhausted("pool".into()).is_fatal());
        assert!(!Error::invalid_param("x").is_fatal());
    }

    #[test]
    fn test_codec_error_from_str() {
        let err: CodecError = "broken".into();
        assert!(matches!(err, CodecError::Other(ref s) if s == "broken"));
    }
}
