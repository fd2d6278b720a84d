//! Packet abstractions for encoded media data.
//!
//! A packet is one coded access unit plus timing metadata. The payload is a
//! reference-counted [`Bytes`] buffer: cloning a packet shares the payload,
//! [`Packet::deep_clone`] copies it.

use crate::timestamp::{Duration, TimeBase, Timestamp};
use bitflags::bitflags;
use bytes::Bytes;
use std::fmt;

bitflags! {
    /// Flags for packet properties.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PacketFlags: u32 {
        /// This packet contains a keyframe.
        const KEYFRAME = 0x0001;
        /// Packet data is corrupted.
        const CORRUPT = 0x0002;
        /// Packet should be discarded after decoding.
        const DISCARD = 0x0004;
        /// Packet contains a disposable frame (can be dropped).
        const DISPOSABLE = 0x0008;
    }
}

/// Types of side data that can be attached to packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SideDataType {
    /// Replacement codec extradata, effective from this packet on.
    NewExtradata,
    /// Palette for paletted pixel formats.
    Palette,
    /// Key/value string metadata.
    StringsMetadata,
    /// H.264/H.265 parameter sets (SPS, PPS).
    ParameterSets,
    /// Skip samples (for gapless playback).
    SkipSamples,
    /// Custom/unknown.
    Custom(u32),
}

/// Side data attached to a packet.
#[derive(Debug, Clone)]
pub struct SideData {
    /// Type of side data.
    pub data_type: SideDataType,
    /// The side data payload.
    pub data: Bytes,
}

impl SideData {
    /// Create new side data.
    pub fn new(data_type: SideDataType, data: impl Into<Bytes>) -> Self {
        Self {
            data_type,
            data: data.into(),
        }
    }
}

/// An encoded media packet.
#[derive(Clone)]
pub struct Packet {
    data: Bytes,
    /// Presentation timestamp.
    pub pts: Timestamp,
    /// Decode timestamp.
    pub dts: Timestamp,
    /// Duration of the packet.
    pub duration: Duration,
    /// Stream index this packet belongs to, `None` until assigned.
    pub stream_index: Option<u32>,
    /// Packet flags.
    pub flags: PacketFlags,
    /// Byte position in the input stream.
    pub pos: Option<u64>,
    side_data: Vec<SideData>,
}

impl Packet {
    /// Create a new packet over the given payload.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pts: Timestamp::none(),
            dts: Timestamp::none(),
            duration: Duration::zero(),
            stream_index: None,
            flags: PacketFlags::empty(),
            pos: None,
            side_data: Vec::new(),
        }
    }

    /// Create a packet copying the given bytes.
    pub fn from_slice(data: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(data))
    }

    /// Create an empty packet.
    pub fn empty() -> Self {
        Self::new(Bytes::new())
    }

    /// Get the packet data.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Shared handle to the payload.
    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    /// Replace the payload.
    pub fn set_data(&mut self, data: impl Into<Bytes>) {
        self.data = data.into();
    }

    /// Get the size of the packet data.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Check if this packet has no payload.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// An empty packet without side data is the end-of-stream signal.
    pub fn is_flush(&self) -> bool {
        self.data.is_empty() && self.side_data.is_empty()
    }

    /// Check if this is a keyframe packet.
    pub fn is_keyframe(&self) -> bool {
        self.flags.contains(PacketFlags::KEYFRAME)
    }

    /// Set the keyframe flag.
    pub fn set_keyframe(&mut self, keyframe: bool) {
        self.flags.set(PacketFlags::KEYFRAME, keyframe);
    }

    /// Time base of the packet timestamps.
    pub fn time_base(&self) -> TimeBase {
        self.pts.time_base
    }

    /// Copy payload and side data into independent buffers.
    pub fn deep_clone(&self) -> Self {
        let mut copy = self.clone();
        copy.data = Bytes::copy_from_slice(&self.data);
        copy.side_data = self
            .side_data
            .iter()
            .map(|sd| SideData::new(sd.data_type, Bytes::copy_from_slice(&sd.data)))
            .collect();
        copy
    }

    /// Release the payload and reset metadata, keeping the packet reusable.
    pub fn unref(&mut self) {
        *self = Self::empty();
    }

    /// Attach side data, replacing any existing entry of the same type.
    pub fn add_side_data(&mut self, data: SideData) {
        match self
            .side_data
            .iter_mut()
            .find(|sd| sd.data_type == data.data_type)
        {
            Some(existing) => *existing = data,
            None => self.side_data.push(data),
        }
    }

    /// Get side data of a specific type.
    pub fn get_side_data(&self, data_type: SideDataType) -> Option<&SideData> {
        self.side_data.iter().find(|sd| sd.data_type == data_type)
    }

    /// Remove and return side data of a specific type.
    pub fn remove_side_data(&mut self, data_type: SideDataType) -> Option<SideData> {
        let idx = self
            .side_data
            .iter()
            .position(|sd| sd.data_type == data_type)?;
        Some(self.side_data.remove(idx))
    }

    /// All side data entries.
    pub fn side_data(&self) -> &[SideData] {
        &self.side_data
    }

    /// Rescale timestamps to a new time base.
    pub fn rescale(&mut self, target: TimeBase) {
        self.pts = self.pts.rescale(target);
        self.dts = self.dts.rescale(target);
        self.duration = self.duration.rescale(target);
    }

    /// Interpret the timestamps in `src` and rescale them into `dst`.
    pub fn rescale_ts(&mut self, src: TimeBase, dst: TimeBase) {
        self.pts.time_base = src;
        self.dts.time_base = src;
        self.duration.time_base = src;
        self.rescale(dst);
    }

    /// Copy timing, flags and stream assignment from another packet.
    pub fn copy_props(&mut self, other: &Packet) {
        self.pts = other.pts;
        self.dts = other.dts;
        self.duration = other.duration;
        self.stream_index = other.stream_index;
        self.flags = other.flags;
        self.pos = other.pos;
    }

    /// Set the presentation timestamp.
    pub fn with_pts(mut self, pts: Timestamp) -> Self {
        self.pts = pts;
        self
    }

    /// Set the decode timestamp.
    pub fn with_dts(mut self, dts: Timestamp) -> Self {
        self.dts = dts;
        self
    }

    /// Set the duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Set the stream index.
    pub fn with_stream_index(mut self, index: u32) -> Self {
        self.stream_index = Some(index);
        self
    }

    /// Set the flags.
    pub fn with_flags(mut self, flags: PacketFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Attach a time base to every timing field without converting values.
    pub fn with_time_base(mut self, time_base: TimeBase) -> Self {
        self.pts.time_base = time_base;
        self.dts.time_base = time_base;
        self.duration.time_base = time_base;
        self
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("size", &self.size())
            .field("pts", &self.pts.value())
            .field("dts", &self.dts.value())
            .field("time_base", &self.pts.time_base)
            .field("stream_index", &self.stream_index)
            .field("flags", &self.flags)
            .field("side_data", &self.side_data.len())
            .finish()
    }
}

impl Default for Packet {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_creation() {
        let packet = Packet::new(vec![0u8; 100]);
        assert_eq!(packet.size(), 100);
        assert!(!packet.is_empty());
        assert_eq!(packet.stream_index, None);
        assert_eq!(packet.pos, None);
        assert!(!packet.pts.is_valid());
    }

    #[test]
    fn test_flush_sentinel() {
        let mut packet = Packet::empty();
        assert!(packet.is_flush());
        packet.add_side_data(SideData::new(SideDataType::NewExtradata, vec![1, 2]));
        assert!(packet.is_empty());
        assert!(!packet.is_flush());
    }

    #[test]
    fn test_clone_shares_deep_clone_copies() {
        let packet = Packet::new(vec![1u8, 2, 3]);
        let shared = packet.clone();
        assert_eq!(shared.data().as_ptr(), packet.data().as_ptr());

        let deep = packet.deep_clone();
        assert_eq!(deep.data(), packet.data());
        assert_ne!(deep.data().as_ptr(), packet.data().as_ptr());
    }

    #[test]
    fn test_unref_resets_shell() {
        let mut packet = Packet::new(vec![1u8, 2, 3])
            .with_stream_index(2)
            .with_flags(PacketFlags::KEYFRAME)
            .with_pts(Timestamp::new(5, TimeBase::MILLISECONDS));
        packet.add_side_data(SideData::new(SideDataType::Palette, vec![0; 4]));
        packet.unref();
        assert!(packet.is_flush());
        assert_eq!(packet.stream_index, None);
        assert!(!packet.is_keyframe());
        assert!(!packet.pts.is_valid());
    }

    #[test]
    fn test_side_data_replaces_same_kind() {
        let mut packet = Packet::empty();
        packet.add_side_data(SideData::new(SideDataType::NewExtradata, vec![1]));
        packet.add_side_data(SideData::new(SideDataType::NewExtradata, vec![2]));
        packet.add_side_data(SideData::new(SideDataType::StringsMetadata, vec![3]));
        assert_eq!(packet.side_data().len(), 2);
        assert_eq!(
            packet
                .get_side_data(SideDataType::NewExtradata)
                .map(|sd| sd.data.to_vec()),
            Some(vec![2])
        );
        assert!(packet.remove_side_data(SideDataType::Palette).is_none());
        assert!(packet.remove_side_data(SideDataType::StringsMetadata).is_some());
    }

    #[test]
    fn test_rescale_ms_to_mpeg() {
        let mut packet = Packet::new(vec![0u8])
            .with_time_base(TimeBase::MILLISECONDS)
            .with_pts(Timestamp::new(1000, TimeBase::MILLISECONDS))
            .with_dts(Timestamp::new(960, TimeBase::MILLISECONDS))
            .with_duration(Duration::new(40, TimeBase::MILLISECONDS));
        packet.rescale(TimeBase::MPEG);
        assert_eq!(packet.pts.value, 90000);
        assert_eq!(packet.dts.value, 86400);
        assert_eq!(packet.duration.value, 3600);
        assert_eq!(packet.time_base(), TimeBase::MPEG);
    }

    #[test]
    fn test_rescale_ts_keeps_unknown() {
        let mut packet = Packet::new(vec![0u8]);
        packet.pts.value = 1000;
        packet.rescale_ts(TimeBase::MILLISECONDS, TimeBase::MPEG);
        assert_eq!(packet.pts.value, 90000);
        assert!(!packet.dts.is_valid());
    }
}
