//! Transcoding pipeline for mediastage.
//!
//! Connects a packet source, a [`Decoder`](mediastage_codec::Decoder), an
//! optional [`FilterGraphStage`](mediastage_filter::FilterGraphStage) and
//! [`ResampleStage`](mediastage_resample::ResampleStage), an
//! [`Encoder`](mediastage_codec::Encoder) and a packet sink. End of stream is
//! propagated stage by stage so frames buffered anywhere reach the sink.
//!
//! A pipeline uses at most one hardware device. Its context is attached to the
//! stages that handle device frames and released as each of them closes.

mod config;
mod error;
mod io;
mod pipeline;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use io::{MemorySink, MemorySource, PacketSink, PacketSource};
pub use pipeline::{PipelineBuilder, PipelineOrchestrator, PipelineState, PipelineStats};
