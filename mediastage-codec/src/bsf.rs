//! Bitstream filters: packet-to-packet rewriting without decoding.

use crate::config::BitstreamFilterConfig;
use crate::nal::{is_annex_b, parse_length_prefixed, put_annex_b, AvcConfig, NalIterator, NalUnitType};
use bytes::{Bytes, BytesMut};
use mediastage_core::error::{CodecError, ConfigError, Result};
use mediastage_core::{
    EngineOutput, EngineSubmit, Packet, ProtocolPolicy, Session, SessionState, SideDataType,
    StageEngine, StageKind, StageSession,
};
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, trace};

/// Built-in bitstream filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitstreamFilterKind {
    /// Passes packets through untouched.
    Null,
    /// Converts length-prefixed H.264 to Annex B, inserting parameter sets before IDR pictures.
    H264Mp4ToAnnexB,
    /// Splits Annex B packets into one packet per NAL unit.
    NalSplit,
}

impl BitstreamFilterKind {
    /// Look up a filter by name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "null" => Some(Self::Null),
            "h264_mp4toannexb" => Some(Self::H264Mp4ToAnnexB),
            "nal_split" => Some(Self::NalSplit),
            _ => None,
        }
    }

    /// Filter name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::H264Mp4ToAnnexB => "h264_mp4toannexb",
            Self::NalSplit => "nal_split",
        }
    }
}

impl fmt::Display for BitstreamFilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Framing of `h264_mp4toannexb` input, fixed by the configuration record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputFraming {
    /// No configuration seen; each packet is inspected.
    Unknown,
    /// avcC configuration: NAL units carry a length prefix.
    LengthPrefixed,
    /// Annex B parameter sets: packets already carry start codes.
    AnnexB,
}

/// Stage-specific half of [`BitstreamFilterStage`].
#[derive(Debug)]
pub struct BitstreamFilterEngine {
    config: BitstreamFilterConfig,
    kind: BitstreamFilterKind,
    extradata: Bytes,
    framing: InputFraming,
    length_size: usize,
    // Annex B SPS/PPS inserted before IDR pictures.
    parameter_sets: Bytes,
    ready: VecDeque<Packet>,
    eof: bool,
}

impl BitstreamFilterEngine {
    fn apply_extradata(&mut self, extradata: &[u8]) -> Result<()> {
        if extradata.is_empty() {
            return Ok(());
        }
        if is_annex_b(extradata) {
            self.parameter_sets = Bytes::copy_from_slice(extradata);
            self.framing = InputFraming::AnnexB;
            return Ok(());
        }
        let avc = AvcConfig::parse(extradata)?;
        self.framing = InputFraming::LengthPrefixed;
        self.length_size = avc.length_size;
        self.parameter_sets = avc.parameter_sets_annex_b();
        debug!(
            length_size = avc.length_size,
            sps = avc.sps.len(),
            pps = avc.pps.len(),
            "avcC configuration applied"
        );
        Ok(())
    }

    fn to_annex_b(&mut self, packet: &Packet) -> Result<Option<Packet>> {
        let mut out = packet.clone();
        if let Some(side) = out.remove_side_data(SideDataType::NewExtradata) {
            self.apply_extradata(&side.data)?;
        }
        if packet.is_empty() {
            return Ok(None);
        }
        // A length prefix can itself look like a start code, so packets are
        // only inspected when no configuration record fixed the framing.
        let annex_b = match self.framing {
            InputFraming::AnnexB => true,
            InputFraming::LengthPrefixed => false,
            InputFraming::Unknown => is_annex_b(packet.data()),
        };
        if annex_b {
            return Ok(Some(out));
        }

        let units = parse_length_prefixed(packet.data(), self.length_size)?;
        let carries_sps = units.iter().any(|u| u.nal_type == NalUnitType::Sps);
        let mut buf = BytesMut::with_capacity(packet.size() + self.parameter_sets.len() + 4 * units.len());
        let mut inserted = carries_sps;
        for unit in &units {
            if unit.is_idr() && !inserted {
                buf.extend_from_slice(&self.parameter_sets);
                inserted = true;
            }
            put_annex_b(&mut buf, unit.data);
        }
        out.set_data(buf.freeze());
        Ok(Some(out))
    }

    fn split(&self, packet: &Packet) -> Result<Vec<Packet>> {
        if !is_annex_b(packet.data()) {
            return Err(CodecError::InvalidData("nal_split expects Annex B input".into()).into());
        }
        let mut parts = Vec::new();
        for unit in NalIterator::new(packet.data()) {
            let unit = unit?;
            let mut buf = BytesMut::with_capacity(unit.data.len() + 4);
            put_annex_b(&mut buf, unit.data);
            let mut part = Packet::new(buf.freeze());
            part.copy_props(packet);
            let key = unit.is_idr() || unit.nal_type.is_parameter_set();
            part.set_keyframe(packet.is_keyframe() && key);
            parts.push(part);
        }
        Ok(parts)
    }
}

impl StageEngine for BitstreamFilterEngine {
    type Input = Packet;
    type Output = Packet;

    fn kind(&self) -> StageKind {
        StageKind::BitstreamFilter
    }

    fn is_flush_marker(packet: &Packet) -> bool {
        packet.is_flush()
    }

    fn open(&mut self) -> Result<()> {
        if self.kind == BitstreamFilterKind::H264Mp4ToAnnexB {
            let extradata = self.extradata.clone();
            self.apply_extradata(&extradata)?;
        }
        debug!(filter = %self.kind, "bitstream filter opened");
        Ok(())
    }

    fn send(&mut self, packet: &Packet) -> Result<EngineSubmit> {
        if self.ready.len() >= self.config.max_buffered_packets {
            return Ok(EngineSubmit::Full);
        }
        match self.kind {
            BitstreamFilterKind::Null => self.ready.push_back(packet.clone()),
            BitstreamFilterKind::H264Mp4ToAnnexB => {
                if let Some(out) = self.to_annex_b(packet)? {
                    self.ready.push_back(out);
                }
            }
            BitstreamFilterKind::NalSplit => {
                let parts = self.split(packet)?;
                trace!(nal_units = parts.len(), "packet split");
                self.ready.extend(parts);
            }
        }
        Ok(EngineSubmit::Accepted)
    }

    fn send_eof(&mut self) -> Result<EngineSubmit> {
        self.eof = true;
        Ok(EngineSubmit::Accepted)
    }

    fn receive(&mut self) -> Result<EngineOutput<Packet>> {
        Ok(match self.ready.pop_front() {
            Some(packet) => EngineOutput::Ready(packet),
            None if self.eof => EngineOutput::Finished,
            None => EngineOutput::Pending,
        })
    }

    fn reset(&mut self) -> Result<()> {
        self.ready.clear();
        self.eof = false;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.ready.clear();
        Ok(())
    }

    fn buffered(&self) -> usize {
        self.ready.len()
    }
}

/// Bitstream filter stage.
#[derive(Debug)]
pub struct BitstreamFilterStage {
    session: Session<BitstreamFilterEngine>,
}

impl BitstreamFilterStage {
    /// Create the named filter.
    pub fn new(config: BitstreamFilterConfig) -> Result<Self> {
        config.validate()?;
        let kind = BitstreamFilterKind::from_name(&config.name)
            .ok_or_else(|| ConfigError::Invalid(format!("unknown bitstream filter {}", config.name)))?;
        Ok(Self {
            session: Session::new(BitstreamFilterEngine {
                config,
                kind,
                extradata: Bytes::new(),
                framing: InputFraming::Unknown,
                length_size: 4,
                parameter_sets: Bytes::new(),
                ready: VecDeque::new(),
                eof: false,
            }),
        })
    }

    /// Codec configuration record of the input stream (`avcC` or Annex B parameter sets).
    /// Must be set before `open`.
    pub fn set_extradata(&mut self, extradata: impl Into<Bytes>) -> Result<()> {
        if self.session.state() != SessionState::Unopened {
            return Err(mediastage_core::Error::config("extradata must be set before open"));
        }
        self.session.engine_mut().extradata = extradata.into();
        Ok(())
    }

    /// Set the protocol violation policy.
    pub fn with_policy(mut self, policy: ProtocolPolicy) -> Self {
        self.session = self.session.with_policy(policy);
        self
    }

    /// Which filter this stage runs.
    pub fn filter_kind(&self) -> BitstreamFilterKind {
        self.session.engine().kind
    }
}

mediastage_core::delegate_stage_session!(BitstreamFilterStage, session, Packet, Packet);

#[cfg(test)]
mod tests {
    use super::*;
    use mediastage_core::{DrainStatus, Error, PacketFlags, SideData, SubmitStatus};

    const AVCC: [u8; 19] = [
        0x01, 0x42, 0x00, 0x1E, 0xFF, 0xE1, 0x00, 0x04, 0x67, 0x42, 0x00, 0x1E, 0x01, 0x00, 0x04,
        0x68, 0xCE, 0x3C, 0x80,
    ];
    const SETS: [u8; 16] = [
        0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1E, 0, 0, 0, 1, 0x68, 0xCE, 0x3C, 0x80,
    ];

    fn stage(name: &str, extradata: &[u8]) -> BitstreamFilterStage {
        let mut s = BitstreamFilterStage::new(BitstreamFilterConfig::new(name)).unwrap();
        s.set_extradata(Bytes::copy_from_slice(extradata)).unwrap();
        s.open().unwrap();
        s
    }

    fn run(s: &mut BitstreamFilterStage, packet: Packet) -> Vec<Packet> {
        assert_eq!(s.submit(Some(&packet)).unwrap(), SubmitStatus::Accepted);
        let mut out = Vec::new();
        while let DrainStatus::Produced(p) = s.drain().unwrap() {
            out.push(p);
        }
        out
    }

    #[test]
    fn test_idr_gets_parameter_sets() {
        let mut s = stage("h264_mp4toannexb", &AVCC);
        let idr = Packet::from_slice(&[0, 0, 0, 2, 0x65, 0x88]).with_flags(PacketFlags::KEYFRAME);
        let out = run(&mut s, idr);
        assert_eq!(out.len(), 1);
        let expected: Vec<u8> = SETS.iter().copied().chain([0, 0, 0, 1, 0x65, 0x88]).collect();
        assert_eq!(out[0].data(), expected.as_slice());
        assert!(out[0].is_keyframe());

        let slice = Packet::from_slice(&[0, 0, 0, 2, 0x41, 0x9A]);
        assert_eq!(run(&mut s, slice)[0].data(), &[0, 0, 0, 1, 0x41, 0x9A]);
    }

    #[test]
    fn test_new_extradata_side_data() {
        let mut s = stage("h264_mp4toannexb", &[]);
        let mut packet = Packet::from_slice(&[0, 0, 0, 2, 0x65, 0x88]);
        packet.add_side_data(SideData::new(SideDataType::NewExtradata, AVCC.to_vec()));
        let out = run(&mut s, packet);
        assert!(out[0].data().starts_with(&SETS));
        assert!(out[0].get_side_data(SideDataType::NewExtradata).is_none());
    }

    #[test]
    fn test_annex_b_input_passes_through() {
        let mut s = stage("h264_mp4toannexb", &SETS);
        let out = run(&mut s, Packet::from_slice(&[0, 0, 1, 0x65, 0x88]));
        assert_eq!(out[0].data(), &[0, 0, 1, 0x65, 0x88]);

        let mut s = stage("h264_mp4toannexb", &[]);
        let out = run(&mut s, Packet::from_slice(&[0, 0, 0, 1, 0x65, 0x88]));
        assert_eq!(out[0].data(), &[0, 0, 0, 1, 0x65, 0x88]);
    }

    #[test]
    fn test_length_prefix_resembling_start_code() {
        let mut s = stage("h264_mp4toannexb", &AVCC);

        // A 256 byte NAL unit has the prefix 00 00 01 00.
        let mut nal = vec![0x41, 0x9A];
        nal.resize(256, 0xAB);
        let mut data = vec![0, 0, 1, 0];
        data.extend_from_slice(&nal);
        let out = run(&mut s, Packet::from_slice(&data));
        assert_eq!(out[0].size(), 4 + 256);
        assert!(out[0].data().starts_with(&[0, 0, 0, 1, 0x41, 0x9A]));

        // A one byte NAL unit has the prefix 00 00 00 01.
        let out = run(&mut s, Packet::from_slice(&[0, 0, 0, 1, 0x65]));
        let expected: Vec<u8> = SETS.iter().copied().chain([0, 0, 0, 1, 0x65]).collect();
        assert_eq!(out[0].data(), expected.as_slice());
    }

    #[test]
    fn test_truncated_packet_is_codec_error() {
        let mut s = stage("h264_mp4toannexb", &AVCC);
        let err = s.submit(Some(&Packet::from_slice(&[0, 0, 0, 9, 0x65]))).unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
        assert_eq!(s.state(), SessionState::Open);
    }

    #[test]
    fn test_nal_split_yields_many_outputs() {
        let mut s = stage("nal_split", &[]);
        let mut data = SETS.to_vec();
        data.extend_from_slice(&[0, 0, 1, 0x65, 0x88]);
        let out = run(&mut s, Packet::from_slice(&data).with_flags(PacketFlags::KEYFRAME));
        assert_eq!(out.len(), 3);
        assert_eq!(out[2].data(), &[0, 0, 0, 1, 0x65, 0x88]);
        assert!(out.iter().all(|p| p.is_keyframe()));
    }

    #[test]
    fn test_null_and_unknown() {
        let mut s = stage("null", &[]);
        assert_eq!(run(&mut s, Packet::from_slice(&[7])).len(), 1);
        s.submit(None).unwrap();
        assert!(s.drain().unwrap().is_eof());
        assert_eq!(s.submit(None).unwrap(), SubmitStatus::Ended);

        assert!(BitstreamFilterStage::new(BitstreamFilterConfig::new("vp9_superframe")).is_err());
    }
}
