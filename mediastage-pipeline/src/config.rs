//! Pipeline configuration.

use crate::error::{PipelineError, Result};

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PipelineConfig {
    /// Stream to transcode. `None` takes every packet the source yields.
    pub stream_index: Option<u32>,
    /// Stream index stamped on written packets.
    pub output_stream_index: u32,
    /// Log progress while running.
    pub report_progress: bool,
    /// Progress report interval, in source packets.
    pub progress_interval: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stream_index: None,
            output_stream_index: 0,
            report_progress: false,
            progress_interval: 100,
        }
    }
}

impl PipelineConfig {
    /// Select the source stream to transcode.
    pub fn with_stream_index(mut self, index: u32) -> Self {
        self.stream_index = Some(index);
        self
    }

    /// Set the stream index of written packets.
    pub fn with_output_stream_index(mut self, index: u32) -> Self {
        self.output_stream_index = index;
        self
    }

    /// Log progress every `interval` source packets.
    pub fn with_progress(mut self, interval: u32) -> Self {
        self.report_progress = true;
        self.progress_interval = interval;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.report_progress && self.progress_interval == 0 {
            return Err(PipelineError::InvalidConfig(
                "progress_interval must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Whether a packet from `stream_index` belongs to the selected stream.
    pub(crate) fn selects(&self, stream_index: Option<u32>) -> bool {
        match self.stream_index {
            None => true,
            Some(selected) => stream_index == Some(selected),
        }
    }
}
