//! Interleaved little-endian PCM.

use crate::backend::{DecodeBackend, EncodeBackend};
use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use mediastage_core::error::{CodecError, ConfigError, Error, Result};
use mediastage_core::frame::Plane;
use mediastage_core::{AudioParams, CodecId, Frame, MediaParams, Packet, SampleFormat};

fn wire_format(codec: CodecId) -> Result<SampleFormat> {
    match codec {
        CodecId::PcmS16le => Ok(SampleFormat::S16),
        CodecId::PcmF32le => Ok(SampleFormat::F32),
        other => Err(Error::unsupported(format!("{} is not a PCM codec", other.name()))),
    }
}

fn check_layout(params: &AudioParams) -> Result<()> {
    if !params.channel_layout.is_valid() || params.sample_rate == 0 {
        return Err(Error::invalid_param(format!(
            "invalid PCM stream: {} Hz, {}",
            params.sample_rate, params.channel_layout
        )));
    }
    Ok(())
}

/// Decodes PCM packets into packed native-endian frames.
#[derive(Debug)]
pub struct PcmDecoder {
    codec: CodecId,
    params: AudioParams,
}

impl PcmDecoder {
    /// Create a decoder. Only rate and layout of `params` are used.
    pub fn new(codec: CodecId, params: AudioParams) -> Result<Self> {
        let format = wire_format(codec)?;
        check_layout(&params)?;
        Ok(Self {
            codec,
            params: AudioParams {
                format,
                nb_samples: 0,
                ..params
            },
        })
    }
}

impl DecodeBackend for PcmDecoder {
    fn codec_id(&self) -> CodecId {
        self.codec
    }

    fn decode(&mut self, packet: &Packet) -> Result<Frame> {
        let data = packet.data();
        let bps = self.params.format.bytes_per_sample();
        let frame_bytes = bps * self.params.channel_layout.nb_channels as usize;
        if data.len() % frame_bytes != 0 {
            return Err(CodecError::InvalidData(format!(
                "{} bytes is not a whole number of {frame_bytes}-byte sample frames",
                data.len()
            ))
            .into());
        }
        let mut samples = vec![0u8; data.len()];
        match self.params.format {
            SampleFormat::S16 => {
                for (src, dst) in data.chunks_exact(2).zip(samples.chunks_exact_mut(2)) {
                    dst.copy_from_slice(&LittleEndian::read_i16(src).to_ne_bytes());
                }
            }
            _ => {
                for (src, dst) in data.chunks_exact(4).zip(samples.chunks_exact_mut(4)) {
                    dst.copy_from_slice(&LittleEndian::read_f32(src).to_ne_bytes());
                }
            }
        }
        let params = AudioParams {
            nb_samples: (data.len() / frame_bytes) as u32,
            ..self.params
        };
        let len = samples.len();
        Frame::from_planes(MediaParams::Audio(params), vec![Plane::packed(samples, len, 1)?])
    }
}

/// Encodes packed or planar frames of the matching sample type.
#[derive(Debug)]
pub struct PcmEncoder {
    codec: CodecId,
    params: AudioParams,
}

impl PcmEncoder {
    /// Create an encoder. `params.format` may be packed or planar.
    pub fn new(codec: CodecId, params: AudioParams) -> Result<Self> {
        let wire = wire_format(codec)?;
        check_layout(&params)?;
        if params.format.to_packed() != wire {
            return Err(ConfigError::mismatch("sample format", wire, params.format).into());
        }
        Ok(Self { codec, params })
    }
}

impl EncodeBackend for PcmEncoder {
    fn codec_id(&self) -> CodecId {
        self.codec
    }

    fn encode(&mut self, frame: &Frame) -> Result<Bytes> {
        let planes = frame
            .planes()
            .ok_or_else(|| Error::invalid_param("PCM encoder needs a software frame"))?;
        let bps = self.params.format.bytes_per_sample();
        let channels = self.params.channel_layout.nb_channels as usize;
        let nb_samples = frame.nb_samples() as usize;
        let mut out = vec![0u8; nb_samples * channels * bps];
        for i in 0..nb_samples {
            for ch in 0..channels {
                let src = if self.params.format.is_planar() {
                    &planes[ch].data()[i * bps..(i + 1) * bps]
                } else {
                    let at = (i * channels + ch) * bps;
                    &planes[0].data()[at..at + bps]
                };
                let at = (i * channels + ch) * bps;
                let dst = &mut out[at..at + bps];
                if bps == 2 {
                    LittleEndian::write_i16(dst, i16::from_ne_bytes([src[0], src[1]]));
                } else {
                    LittleEndian::write_f32(dst, f32::from_ne_bytes([src[0], src[1], src[2], src[3]]));
                }
            }
        }
        Ok(Bytes::from(out))
    }

    fn output_media(&self) -> MediaParams {
        MediaParams::Audio(AudioParams {
            format: self.params.format.to_packed(),
            nb_samples: 0,
            ..self.params
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediastage_core::ChannelLayout;

    fn stereo(format: SampleFormat) -> AudioParams {
        AudioParams {
            format,
            sample_rate: 48000,
            channel_layout: ChannelLayout::STEREO,
            nb_samples: 0,
        }
    }

    #[test]
    fn test_s16_wire_is_little_endian() {
        let mut dec = PcmDecoder::new(CodecId::PcmS16le, stereo(SampleFormat::S16)).unwrap();
        let frame = dec.decode(&Packet::from_slice(&[0x01, 0x02, 0xff, 0x7f])).unwrap();
        assert_eq!(frame.nb_samples(), 1);
        let data = frame.plane(0).unwrap().data();
        assert_eq!(i16::from_ne_bytes([data[0], data[1]]), 0x0201);
        assert_eq!(i16::from_ne_bytes([data[2], data[3]]), i16::MAX);
    }

    #[test]
    fn test_planar_input_is_interleaved() {
        let mut frame = Frame::audio(SampleFormat::S16p, ChannelLayout::STEREO, 48000, 2).unwrap();
        frame.plane_mut(0).unwrap().data_mut()[..4]
            .copy_from_slice(&[1i16.to_ne_bytes(), 2i16.to_ne_bytes()].concat());
        frame.plane_mut(1).unwrap().data_mut()[..4]
            .copy_from_slice(&[(-1i16).to_ne_bytes(), (-2i16).to_ne_bytes()].concat());

        let mut enc = PcmEncoder::new(CodecId::PcmS16le, stereo(SampleFormat::S16p)).unwrap();
        let payload = enc.encode(&frame).unwrap();
        let values: Vec<i16> = payload.chunks_exact(2).map(LittleEndian::read_i16).collect();
        assert_eq!(values, vec![1, -1, 2, -2]);
    }

    #[test]
    fn test_partial_sample_frame_rejected() {
        let mut dec = PcmDecoder::new(CodecId::PcmF32le, stereo(SampleFormat::F32)).unwrap();
        assert!(dec.decode(&Packet::from_slice(&[0; 12])).is_err());
    }

    #[test]
    fn test_encoder_rejects_wrong_sample_type() {
        assert!(matches!(
            PcmEncoder::new(CodecId::PcmS16le, stereo(SampleFormat::F32)),
            Err(Error::Config(_))
        ));
    }
}
