//! Uncompressed video: one tightly packed picture per packet.

use crate::backend::{DecodeBackend, EncodeBackend};
use bytes::{Bytes, BytesMut};
use mediastage_core::error::{CodecError, ConfigError, Error, Result};
use mediastage_core::frame::Plane;
use mediastage_core::{CodecId, Frame, MediaParams, Packet, VideoParams};

fn check_software(params: &VideoParams) -> Result<()> {
    if params.format.is_hardware() {
        return Err(ConfigError::Residency {
            location: "rawvideo".into(),
            expected: "software".into(),
            actual: params.format.to_string(),
        }
        .into());
    }
    if params.width == 0 || params.height == 0 {
        return Err(Error::invalid_param(format!(
            "invalid picture size {}x{}",
            params.width, params.height
        )));
    }
    Ok(())
}

/// Splits packed pictures into planes.
#[derive(Debug)]
pub struct RawVideoDecoder {
    params: VideoParams,
    picture_size: usize,
}

impl RawVideoDecoder {
    /// Create a decoder for pictures of the given format.
    pub fn new(params: VideoParams) -> Result<Self> {
        check_software(&params)?;
        Ok(Self {
            params,
            picture_size: params.format.picture_size(params.width, params.height),
        })
    }
}

impl DecodeBackend for RawVideoDecoder {
    fn codec_id(&self) -> CodecId {
        CodecId::RawVideo
    }

    fn decode(&mut self, packet: &Packet) -> Result<Frame> {
        let data = packet.data();
        if data.len() != self.picture_size {
            return Err(CodecError::InvalidSize {
                expected: self.picture_size,
                actual: data.len(),
            }
            .into());
        }
        let (w, h) = (self.params.width, self.params.height);
        let mut planes = Vec::with_capacity(self.params.format.num_planes());
        let mut offset = 0;
        for p in 0..self.params.format.num_planes() {
            let (row_bytes, rows) = self.params.format.plane_dims(p, w, h);
            let len = row_bytes * rows;
            planes.push(Plane::packed(data[offset..offset + len].to_vec(), row_bytes, rows)?);
            offset += len;
        }
        Frame::from_planes(MediaParams::Video(self.params), planes)
    }
}

/// Packs planes into one buffer, dropping stride padding.
#[derive(Debug)]
pub struct RawVideoEncoder {
    params: VideoParams,
}

impl RawVideoEncoder {
    /// Create an encoder for pictures of the given format.
    pub fn new(params: VideoParams) -> Result<Self> {
        check_software(&params)?;
        Ok(Self { params })
    }
}

impl EncodeBackend for RawVideoEncoder {
    fn codec_id(&self) -> CodecId {
        CodecId::RawVideo
    }

    fn encode(&mut self, frame: &Frame) -> Result<Bytes> {
        let planes = frame
            .planes()
            .ok_or_else(|| Error::invalid_param("rawvideo encoder needs a software frame"))?;
        let size = self
            .params
            .format
            .picture_size(self.params.width, self.params.height);
        let mut out = BytesMut::with_capacity(size);
        for plane in planes {
            for y in 0..plane.rows() {
                out.extend_from_slice(plane.row(y));
            }
        }
        Ok(out.freeze())
    }

    fn output_media(&self) -> MediaParams {
        MediaParams::Video(self.params)
    }
}
