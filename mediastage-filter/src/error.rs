//! Filter graph errors.

use mediastage_core::error::{ConfigError, Error as CoreError};
use mediastage_hwaccel::HwAccelError;
use thiserror::Error;

/// Errors raised while describing or building a filter graph.
#[derive(Error, Debug)]
pub enum FilterError {
    /// The textual description is malformed.
    #[error("Parse error at byte {position}: {message}")]
    Parse { position: usize, message: String },

    /// No filter of that name exists.
    #[error("Unknown filter '{name}'")]
    UnknownFilter { name: String },

    /// A filter argument is missing or malformed.
    #[error("Invalid argument for '{filter}': {message}")]
    InvalidArgument { filter: String, message: String },

    /// Two nodes share a name, or a link label is used twice.
    #[error("Duplicate {what} '{name}'")]
    Duplicate { what: &'static str, name: String },

    /// A node or pad is not on the path from the source pad to the sink pad.
    #[error("'{name}' is not connected: {message}")]
    Unconnected { name: String, message: String },

    /// Residency, media type or device checks failed while linking nodes.
    #[error("Invalid graph: {0}")]
    Config(#[from] ConfigError),

    /// A device frame pool could not be set up.
    #[error(transparent)]
    Hardware(HwAccelError),
}

/// Result type for graph construction.
pub type Result<T> = std::result::Result<T, FilterError>;

impl FilterError {
    pub(crate) fn parse(position: usize, message: impl Into<String>) -> Self {
        FilterError::Parse {
            position,
            message: message.into(),
        }
    }

    pub(crate) fn argument(filter: &str, message: impl Into<String>) -> Self {
        FilterError::InvalidArgument {
            filter: filter.to_string(),
            message: message.into(),
        }
    }
}

impl From<HwAccelError> for FilterError {
    fn from(err: HwAccelError) -> Self {
        match err {
            HwAccelError::Config(c) => FilterError::Config(c),
            other => FilterError::Hardware(other),
        }
    }
}

impl From<FilterError> for CoreError {
    fn from(err: FilterError) -> Self {
        match err {
            FilterError::Config(c) => CoreError::Config(c),
            FilterError::Hardware(e) => e.into(),
            other => CoreError::Config(ConfigError::Invalid(other.to_string())),
        }
    }
}
