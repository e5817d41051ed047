//! Correlates decoder output with the metadata of the unit that produced it.
//!
//! Every submitted unit gets a sequence number that travels with it through
//! the decoder. Output is matched by sequence, so a dropped or reordered
//! frame never shifts metadata onto the wrong picture.

use std::collections::VecDeque;

use tracing::debug;

/// Timing attached to one video access unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    /// Server capture time (ms since epoch)
    pub capture_timestamp: u64,
    /// Receive time minus capture time (ms)
    pub network_latency_ms: i64,
    /// Client receive time (ms since epoch)
    pub receive_time: i64,
}

#[derive(Debug, Default)]
pub struct MetadataCorrelator {
    entries: VecDeque<(u64, FrameMetadata)>,
    next_sequence: u64,
}

impl MetadataCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues metadata for a unit about to be decoded.
    pub fn submit(&mut self, metadata: FrameMetadata) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.push_back((sequence, metadata));
        sequence
    }

    /// Takes the metadata for a decoded frame.
    ///
    /// Returns `None` for a sequence that was never submitted, already
    /// resolved, or discarded by `clear`.
    pub fn resolve(&mut self, sequence: u64) -> Option<FrameMetadata> {
        if self.entries.front().map(|(s, _)| *s) == Some(sequence) {
            return self.entries.pop_front().map(|(_, metadata)| metadata);
        }

        let index = self.entries.iter().position(|(s, _)| *s == sequence)?;
        debug!(
            "Frame {} decoded out of order ({} older entries pending)",
            sequence, index
        );
        self.entries.remove(index).map(|(_, metadata)| metadata)
    }

    /// Withdraws metadata for a unit the decoder rejected.
    pub fn cancel(&mut self, sequence: u64) {
        self.entries.retain(|(s, _)| *s != sequence);
    }

    /// Discards all pending metadata. Sequence numbers keep increasing, so
    /// output from before the clear can never resolve.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
