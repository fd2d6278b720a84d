//! Decode-order to presentation-order reordering.

use mediastage_core::Frame;
use std::collections::BTreeMap;

/// Holds back up to `depth` frames and releases them in presentation order.
///
/// Frames without a timestamp sort before every timestamped frame; ties keep
/// arrival order.
#[derive(Debug)]
pub struct ReorderBuffer {
    depth: usize,
    frames: BTreeMap<(i64, u64), Frame>,
    seq: u64,
}

impl ReorderBuffer {
    /// Create a buffer holding back `depth` frames.
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            frames: BTreeMap::new(),
            seq: 0,
        }
    }

    /// Reorder depth.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Frames currently held.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Check if no frames are held.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Add a frame in decode order.
    pub fn push(&mut self, frame: Frame) {
        let key = (frame.pts.value().unwrap_or(i64::MIN), self.seq);
        self.seq += 1;
        self.frames.insert(key, frame);
    }

    /// Release the earliest frame once more than `depth` are held.
    pub fn pop_ready(&mut self) -> Option<Frame> {
        if self.frames.len() > self.depth {
            self.pop_first()
        } else {
            None
        }
    }

    /// Release the earliest frame regardless of depth. Used when flushing.
    pub fn pop_first(&mut self) -> Option<Frame> {
        let key = *self.frames.keys().next()?;
        self.frames.remove(&key)
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediastage_core::{PixelFormat, TimeBase, Timestamp};

    fn frame(pts: i64) -> Frame {
        Frame::video(16, 16, PixelFormat::Gray8)
            .unwrap()
            .with_pts(Timestamp::new(pts, TimeBase::MILLISECONDS))
    }

    #[test]
    fn test_restores_presentation_order() {
        let mut buf = ReorderBuffer::new(2);
        let mut out = Vec::new();
        for pts in [0, 3, 1, 2, 6, 4, 5] {
            buf.push(frame(pts));
            if let Some(f) = buf.pop_ready() {
                out.push(f.pts.value().unwrap());
            }
        }
        while let Some(f) = buf.pop_first() {
            out.push(f.pts.value().unwrap());
        }
        assert_eq!(out, vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_depth_zero_is_passthrough() {
        let mut buf = ReorderBuffer::new(0);
        buf.push(frame(5));
        assert_eq!(buf.pop_ready().unwrap().pts.value(), Some(5));
        assert!(buf.is_empty());
    }
}
