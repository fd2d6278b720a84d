//! Packet source and sink collaborators.
//!
//! Container demuxing and muxing live outside mediastage. A pipeline reads
//! fully formed packets from a [`PacketSource`] and hands encoded packets to a
//! [`PacketSink`]; the in-memory adapters serve tests and callers that already
//! hold their packets.

use crate::error::{PipelineError, Result};
use mediastage_core::Packet;
use parking_lot::Mutex;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

/// Supplier of compressed packets, one coded access unit each.
pub trait PacketSource: Send {
    /// Next packet, or `None` once the input is exhausted.
    fn read_packet(&mut self) -> Result<Option<Packet>>;

    /// Stream indices the source carries, when known up front.
    fn stream_indices(&self) -> Option<Vec<u32>> {
        None
    }
}

/// Consumer of encoded packets.
pub trait PacketSink: Send {
    /// Write one packet.
    fn write_packet(&mut self, packet: Packet) -> Result<()>;

    /// Called once after the last packet.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Source over packets held in memory.
#[derive(Debug, Default)]
pub struct MemorySource {
    packets: VecDeque<Packet>,
}

impl MemorySource {
    /// Create a source yielding `packets` in order.
    pub fn new(packets: impl IntoIterator<Item = Packet>) -> Self {
        Self {
            packets: packets.into_iter().collect(),
        }
    }

    /// Packets not read yet.
    pub fn remaining(&self) -> usize {
        self.packets.len()
    }
}

impl PacketSource for MemorySource {
    fn read_packet(&mut self) -> Result<Option<Packet>> {
        Ok(self.packets.pop_front())
    }

    fn stream_indices(&self) -> Option<Vec<u32>> {
        let indices: BTreeSet<u32> = self.packets.iter().filter_map(|p| p.stream_index).collect();
        Some(indices.into_iter().collect())
    }
}

#[derive(Debug, Default)]
struct SinkState {
    packets: Vec<Packet>,
    finished: bool,
}

/// Sink collecting packets in memory.
///
/// Clones share the same storage, so a handle kept by the caller sees what
/// the pipeline wrote.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<SinkState>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the packets written so far.
    pub fn packets(&self) -> Vec<Packet> {
        self.state.lock().packets.clone()
    }

    /// Number of packets written so far.
    pub fn len(&self) -> usize {
        self.state.lock().packets.len()
    }

    /// Check whether nothing was written.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check whether the writer finished the stream.
    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }
}

impl PacketSink for MemorySink {
    fn write_packet(&mut self, packet: Packet) -> Result<()> {
        let mut state = self.state.lock();
        if state.finished {
            return Err(PipelineError::Sink("write after finish".into()));
        }
        state.packets.push(packet);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        if state.finished {
            return Err(PipelineError::Sink("stream already finished".into()));
        }
        state.finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_source_order() {
        let mut source = MemorySource::new([
            Packet::from_slice(&[1]).with_stream_index(1),
            Packet::from_slice(&[2]).with_stream_index(0),
            Packet::from_slice(&[3]).with_stream_index(1),
        ]);
        assert_eq!(source.stream_indices(), Some(vec![0, 1]));
        assert_eq!(source.read_packet().unwrap().unwrap().data(), &[1]);
        assert_eq!(source.remaining(), 2);
        source.read_packet().unwrap();
        source.read_packet().unwrap();
        assert!(source.read_packet().unwrap().is_none());
    }

    #[test]
    fn test_memory_sink_shared_handle() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();
        writer.write_packet(Packet::from_slice(&[7])).unwrap();
        assert_eq!(sink.len(), 1);
        writer.finish().unwrap();
        assert!(sink.is_finished());
        assert!(writer.write_packet(Packet::from_slice(&[8])).is_err());
        assert!(writer.finish().is_err());
        assert_eq!(sink.packets()[0].data(), &[7]);
    }
}
