//! H.264 NAL unit helpers: header parsing, Annex B and length-prefixed
//! framing, and the `avcC` decoder configuration record.

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use mediastage_core::error::{CodecError, Result};

/// Maximum size for a single NAL unit (10 MB).
/// Prevents excessive memory allocation from malformed length fields.
const MAX_NAL_UNIT_SIZE: usize = 10 * 1024 * 1024;

/// Four-byte Annex B start code.
pub const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// NAL unit type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalUnitType {
    /// Unspecified.
    Unspecified,
    /// Non-IDR slice.
    Slice,
    /// Slice data partition A, B or C.
    SliceData(u8),
    /// IDR slice.
    IdrSlice,
    /// Supplemental enhancement information (SEI).
    Sei,
    /// Sequence parameter set (SPS).
    Sps,
    /// Picture parameter set (PPS).
    Pps,
    /// Access unit delimiter.
    Aud,
    /// End of sequence.
    EndOfSequence,
    /// End of stream.
    EndOfStream,
    /// Filler data.
    Filler,
    /// Unknown/reserved type.
    Unknown(u8),
}

impl NalUnitType {
    /// Create from raw NAL unit type value.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Unspecified,
            1 => Self::Slice,
            2..=4 => Self::SliceData(value),
            5 => Self::IdrSlice,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            9 => Self::Aud,
            10 => Self::EndOfSequence,
            11 => Self::EndOfStream,
            12 => Self::Filler,
            n => Self::Unknown(n),
        }
    }

    /// Get the raw value.
    pub fn to_u8(&self) -> u8 {
        match self {
            Self::Unspecified => 0,
            Self::Slice => 1,
            Self::SliceData(n) => *n,
            Self::IdrSlice => 5,
            Self::Sei => 6,
            Self::Sps => 7,
            Self::Pps => 8,
            Self::Aud => 9,
            Self::EndOfSequence => 10,
            Self::EndOfStream => 11,
            Self::Filler => 12,
            Self::Unknown(n) => *n,
        }
    }

    /// Check if this is a VCL (Video Coding Layer) NAL unit.
    pub fn is_vcl(&self) -> bool {
        matches!(self, Self::Slice | Self::SliceData(_) | Self::IdrSlice)
    }

    /// Check if this is a parameter set.
    pub fn is_parameter_set(&self) -> bool {
        matches!(self, Self::Sps | Self::Pps)
    }
}

/// A NAL unit borrowed from a packet payload, header byte included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalUnit<'a> {
    /// NAL unit type.
    pub nal_type: NalUnitType,
    /// NAL reference IDC (0-3).
    pub nal_ref_idc: u8,
    /// Header byte and payload.
    pub data: &'a [u8],
}

impl<'a> NalUnit<'a> {
    /// Parse the header of a NAL unit.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let Some(&header) = data.first() else {
            return Err(CodecError::InvalidNalUnit("Empty NAL unit".into()).into());
        };
        if header & 0x80 != 0 {
            return Err(CodecError::InvalidNalUnit("Forbidden zero bit is set".into()).into());
        }
        Ok(Self {
            nal_type: NalUnitType::from_u8(header & 0x1F),
            nal_ref_idc: (header >> 5) & 3,
            data,
        })
    }

    /// Check if this is an IDR picture.
    pub fn is_idr(&self) -> bool {
        self.nal_type == NalUnitType::IdrSlice
    }
}

/// Find the next start code: `(offset, length)`.
pub fn find_start_code(data: &[u8]) -> Option<(usize, usize)> {
    let len = data.len();
    if len < 3 {
        return None;
    }
    for i in 0..len - 2 {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                return Some((i, 3));
            } else if i + 3 < len && data[i + 2] == 0 && data[i + 3] == 1 {
                return Some((i, 4));
            }
        }
    }
    None
}

/// Check if a payload begins with an Annex B start code.
pub fn is_annex_b(data: &[u8]) -> bool {
    data.starts_with(&[0, 0, 1]) || data.starts_with(&START_CODE)
}

/// Iterator over the NAL units of an Annex B byte stream.
pub struct NalIterator<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> NalIterator<'a> {
    /// Create a new NAL iterator for an Annex B bitstream.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl<'a> Iterator for NalIterator<'a> {
    type Item = Result<NalUnit<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }
        let (offset, len) = find_start_code(&self.data[self.pos..])?;
        let nal_start = self.pos + offset + len;
        if nal_start >= self.data.len() {
            self.pos = self.data.len();
            return None;
        }
        let nal_end = match find_start_code(&self.data[nal_start..]) {
            Some((next, _)) => nal_start + next,
            None => self.data.len(),
        };
        self.pos = nal_end;
        Some(NalUnit::parse(&self.data[nal_start..nal_end]))
    }
}

/// Split a length-prefixed (AVCC) payload into NAL units.
pub fn parse_length_prefixed(data: &[u8], length_size: usize) -> Result<Vec<NalUnit<'_>>> {
    if !matches!(length_size, 1 | 2 | 4) {
        return Err(CodecError::InvalidNalUnit(format!("Invalid length size: {length_size}")).into());
    }
    let mut units = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        if pos + length_size > data.len() {
            return Err(CodecError::InvalidNalUnit("Truncated length prefix".into()).into());
        }
        let length = BigEndian::read_uint(&data[pos..], length_size) as usize;
        pos += length_size;
        if length > MAX_NAL_UNIT_SIZE {
            return Err(CodecError::InvalidNalUnit(format!(
                "NAL unit size {length} exceeds maximum {MAX_NAL_UNIT_SIZE}"
            ))
            .into());
        }
        if pos + length > data.len() {
            return Err(CodecError::InvalidNalUnit("NAL unit truncated".into()).into());
        }
        units.push(NalUnit::parse(&data[pos..pos + length])?);
        pos += length;
    }
    Ok(units)
}

/// Parsed `avcC` decoder configuration record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvcConfig {
    /// Bytes per NAL length prefix in packets.
    pub length_size: usize,
    /// Sequence parameter sets.
    pub sps: Vec<Bytes>,
    /// Picture parameter sets.
    pub pps: Vec<Bytes>,
}

impl AvcConfig {
    /// Parse an `avcC` record.
    pub fn parse(extradata: &[u8]) -> Result<Self> {
        let invalid = |msg: &str| CodecError::InvalidExtradata(msg.to_string());
        if extradata.len() < 7 {
            return Err(invalid("avcC record too short").into());
        }
        if extradata[0] != 1 {
            return Err(invalid("unsupported avcC version").into());
        }
        let length_size = usize::from(extradata[4] & 0x03) + 1;
        if length_size == 3 {
            return Err(invalid("3-byte NAL length prefix").into());
        }

        let mut pos = 5;
        let read_sets = |count: usize, pos: &mut usize| -> Result<Vec<Bytes>> {
            let mut sets = Vec::with_capacity(count);
            for _ in 0..count {
                if *pos + 2 > extradata.len() {
                    return Err(invalid("truncated parameter set length").into());
                }
                let len = usize::from(BigEndian::read_u16(&extradata[*pos..]));
                *pos += 2;
                if *pos + len > extradata.len() {
                    return Err(invalid("truncated parameter set").into());
                }
                sets.push(Bytes::copy_from_slice(&extradata[*pos..*pos + len]));
                *pos += len;
            }
            Ok(sets)
        };

        let sps_count = usize::from(extradata[pos] & 0x1F);
        pos += 1;
        let sps = read_sets(sps_count, &mut pos)?;
        let pps_count = match extradata.get(pos) {
            Some(&n) => usize::from(n),
            None => return Err(invalid("missing PPS count").into()),
        };
        pos += 1;
        let pps = read_sets(pps_count, &mut pos)?;

        Ok(Self { length_size, sps, pps })
    }

    /// Parameter sets as an Annex B byte stream, SPS first.
    pub fn parameter_sets_annex_b(&self) -> Bytes {
        let mut out = BytesMut::new();
        for set in self.sps.iter().chain(&self.pps) {
            put_annex_b(&mut out, set);
        }
        out.freeze()
    }
}

/// Append one NAL unit with a four-byte start code.
pub fn put_annex_b(out: &mut BytesMut, nal: &[u8]) {
    out.reserve(START_CODE.len() + nal.len());
    out.put_slice(&START_CODE);
    out.put_slice(nal);
}

#[cfg(test)]
mod tests {
    use super::*;

    const AVCC: [u8; 19] = [
        0x01, 0x42, 0x00, 0x1E, 0xFF, // version, profile, compat, level, length size 4
        0xE1, 0x00, 0x04, 0x67, 0x42, 0x00, 0x1E, // one SPS
        0x01, 0x00, 0x04, 0x68, 0xCE, 0x3C, 0x80, // one PPS
    ];

    #[test]
    fn test_nal_unit_type() {
        assert_eq!(NalUnitType::from_u8(7), NalUnitType::Sps);
        assert_eq!(NalUnitType::from_u8(8), NalUnitType::Pps);
        assert_eq!(NalUnitType::from_u8(5), NalUnitType::IdrSlice);
        assert_eq!(NalUnitType::from_u8(3), NalUnitType::SliceData(3));
        assert_eq!(NalUnitType::Unknown(30).to_u8(), 30);
        assert!(NalUnitType::IdrSlice.is_vcl());
        assert!(!NalUnitType::Sps.is_vcl());
        assert!(NalUnitType::Pps.is_parameter_set());
    }

    #[test]
    fn test_nal_unit_parse() {
        let nal = NalUnit::parse(&[0x67, 0x42, 0x00, 0x1E]).unwrap();
        assert_eq!(nal.nal_type, NalUnitType::Sps);
        assert_eq!(nal.nal_ref_idc, 3);
        assert!(NalUnit::parse(&[]).is_err());
        assert!(NalUnit::parse(&[0x87]).is_err());
    }

    #[test]
    fn test_annex_b_parsing() {
        let data = [
            0x00, 0x00, 0x00, 0x01, 0x67, 0x42, // SPS
            0x00, 0x00, 0x01, 0x68, 0xCE, // PPS
        ];
        let nals: Vec<_> = NalIterator::new(&data).collect::<Result<_>>().unwrap();
        assert_eq!(nals.len(), 2);
        assert_eq!(nals[0].data, &[0x67, 0x42]);
        assert_eq!(nals[1].nal_type, NalUnitType::Pps);
        assert!(is_annex_b(&data));
        assert!(!is_annex_b(&data[4..]));
    }

    #[test]
    fn test_length_prefixed_parsing() {
        let data = [0x00, 0x02, 0x67, 0x42, 0x00, 0x01, 0x65];
        let nals = parse_length_prefixed(&data, 2).unwrap();
        assert_eq!(nals.len(), 2);
        assert!(nals[1].is_idr());

        assert!(parse_length_prefixed(&data, 3).is_err());
        assert!(parse_length_prefixed(&[0x00, 0x00, 0x00, 0x0A, 0x67], 4).is_err());
    }

    #[test]
    fn test_avcc_record() {
        let config = AvcConfig::parse(&AVCC).unwrap();
        assert_eq!(config.length_size, 4);
        assert_eq!(config.sps.len(), 1);
        assert_eq!(config.pps[0].as_ref(), &[0x68, 0xCE, 0x3C, 0x80]);
        let sets = config.parameter_sets_annex_b();
        assert_eq!(
            sets.as_ref(),
            &[0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1E, 0, 0, 0, 1, 0x68, 0xCE, 0x3C, 0x80]
        );
        assert!(AvcConfig::parse(&AVCC[..10]).is_err());
    }
}
