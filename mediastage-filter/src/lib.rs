//! # mediastage filter
//!
//! Frame filter graphs for mediastage. A graph is a chain of named filter
//! nodes between a source pad and a sink pad, built once and then driven as
//! a single [`StageSession`](mediastage_core::StageSession).
//!
//! Building checks that frames stay where each node expects them: nodes that
//! work on device surfaces only see hardware frames, reached through
//! `hwupload` or a hardware source, and software nodes only see host frames,
//! reached through `hwdownload` or a software source. A graph uses at most
//! one [`HardwareContext`](mediastage_hwaccel::HardwareContext).
//!
//! Built-in filters: `null`, `anull`, `scale`, `format`, `volume`,
//! `hwupload`, `hwdownload`, `scale_cuda`, `scale_vaapi`, `scale_vt`,
//! `scale_qsv`.
//!
//! ## Example
//!
//! ```ignore
//! use mediastage_filter::{BufferSourceParams, FilterGraphConfig, FilterGraphStage, SinkResidency};
//!
//! let config = FilterGraphConfig::new(BufferSourceParams::video(1920, 1080, PixelFormat::Yuv420p))
//!     .with_sink_residency(SinkResidency::Hardware);
//! let mut graph = FilterGraphStage::parse(config, "format=nv12,hwupload,scale_vaapi=1280:720", Some(&ctx))?;
//! graph.open()?;
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod node;
pub mod nodes;
pub mod parser;
mod stage;

pub use config::{BufferSourceParams, FilterGraphConfig};
pub use error::{FilterError, Result};
pub use graph::GraphBuilder;
pub use node::{filter_names, FilterNode, LinkContext, LinkFormat, Residency, SinkResidency};
pub use parser::{FilterArg, FilterSpec, GraphDescription};
pub use stage::{FilterGraphEngine, FilterGraphStage};
