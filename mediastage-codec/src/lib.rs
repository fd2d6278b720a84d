//! Codec stages for mediastage.
//!
//! - [`Decoder`]: packets in, frames out, with decode-order to
//!   presentation-order reordering.
//! - [`Encoder`]: frames in, packets out. Configures itself from the first
//!   frame when the stream format was not given up front.
//! - [`BitstreamFilterStage`]: packets in, packets out (`null`,
//!   `h264_mp4toannexb`, `nal_split`).
//!
//! All three implement [`StageSession`](mediastage_core::StageSession), so
//! they are driven with the same drain-first loop.
//!
//! The built-in backends are `rawvideo`, `pcm_s16le` and `pcm_f32le`. Other
//! codecs are plugged in through [`DecodeBackend`] and [`EncodeBackend`].
//!
//! # Example
//!
//! ```ignore
//! use mediastage_codec::{Decoder, DecoderConfig};
//! use mediastage_core::{drive, CodecId, Error, StageSession};
//!
//! let mut decoder = Decoder::new(DecoderConfig::from_parameters(&params))?;
//! decoder.open()?;
//! drive(&mut decoder, packets, |frame| {
//!     display(frame);
//!     Ok::<(), Error>(())
//! })?;
//! ```

pub mod backend;
pub mod bsf;
pub mod config;
pub mod decoder;
pub mod encoder;
pub mod nal;
pub mod pcm;
pub mod rawvideo;
pub mod reorder;

pub use backend::{codec_descriptors, find_decoder, find_encoder, CodecDescriptor, DecodeBackend, EncodeBackend};
pub use bsf::{BitstreamFilterKind, BitstreamFilterStage};
pub use config::{BitstreamFilterConfig, CodecParameters, DecoderConfig, EncoderConfig};
pub use decoder::Decoder;
pub use encoder::{Encoder, EncoderSetup};
pub use reorder::ReorderBuffer;
