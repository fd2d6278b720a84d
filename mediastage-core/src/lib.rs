//! # mediastage core
//!
//! Core types shared by every mediastage component:
//! - Error handling types
//! - Rational numbers, time bases and timestamps
//! - Packets (compressed units) and frames (raw units, software or hardware resident)
//! - The non-blocking submit/drain stage protocol and its canonical driver loop
//! - Optional metrics macros

pub mod error;
pub mod format;
pub mod frame;
pub mod metrics;
pub mod packet;
pub mod rational;
pub mod sample;
pub mod session;
pub mod timestamp;

pub use error::{CodecError, ConfigError, Error, ProtocolViolation, Result};
pub use format::{CodecId, MediaType};
pub use frame::{
    Frame, FrameFlags, FrameStorage, HwSurface, HwSurfacePool, MediaParams, PixelFormat, Plane,
    VideoParams,
};
pub use packet::{Packet, PacketFlags, SideData, SideDataType};
pub use rational::Rational;
pub use sample::{AudioParams, ChannelLayout, ChannelOrder, SampleFormat};
pub use session::{
    drive, feed, flush, DrainStatus, EngineOutput, EngineSubmit, ProtocolPolicy, Session,
    SessionState, StageEngine, StageId, StageKind, StageSession, SubmitStatus,
};
pub use timestamp::{Duration, TimeBase, Timestamp};

// Lets the exported metrics macros expand in crates without a direct `metrics` dependency.
#[cfg(feature = "metrics")]
#[doc(hidden)]
pub use ::metrics as __metrics;
