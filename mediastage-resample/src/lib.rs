//! # mediastage resample
//!
//! Audio conversion stage for mediastage:
//! - Sample rate conversion by streaming linear interpolation
//! - Sample format conversion between any packed or planar format
//! - Channel layout remixing (up-mix, down-mix, reorder)
//! - Fixed-size output frames for encoders with a frame size
//!
//! ## Example
//!
//! ```ignore
//! use mediastage_core::{drive, Error, StageSession};
//! use mediastage_resample::{ResampleConfig, ResampleStage};
//!
//! let config = ResampleConfig::from_params(&decoded, &encoder_input).with_frame_size(1024);
//! let mut resampler = ResampleStage::new(config)?;
//! resampler.open()?;
//! drive(&mut resampler, frames, |frame| {
//!     encode(frame);
//!     Ok::<(), Error>(())
//! })?;
//! ```

pub mod config;
pub mod error;
pub mod linear;
pub mod remix;
mod stage;

pub use config::ResampleConfig;
pub use error::{ResampleError, Result};
pub use linear::LinearResampler;
pub use remix::ChannelMixer;
pub use stage::{ResampleEngine, ResampleStage};
