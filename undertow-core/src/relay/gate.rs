//! Open/closed gate in front of an outbound frame channel.
//!
//! Media frames are dropped while the channel is closed. Control frames and
//! upload chunks are queued and flushed, in order, when the channel opens.

use std::collections::VecDeque;

use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::frame::Frame;

/// What to do with a frame offered while the channel is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Discard silently
    Droppable,
    /// Hold until the channel opens
    Queued,
}

/// Result of offering a frame to the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Sent,
    Queued,
    Dropped,
}

/// Gate around an unbounded frame sender.
#[derive(Debug, Default)]
pub struct ChannelGate {
    sender: Option<mpsc::UnboundedSender<Frame>>,
    pending: VecDeque<Frame>,
    dropped: u64,
}

impl ChannelGate {
    /// Creates a closed gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a gate that is already open.
    pub fn opened(sender: mpsc::UnboundedSender<Frame>) -> Self {
        let mut gate = Self::new();
        gate.open(sender);
        gate
    }

    /// Attaches a sender and flushes queued frames in arrival order.
    pub fn open(&mut self, sender: mpsc::UnboundedSender<Frame>) {
        if !self.pending.is_empty() {
            debug!("Flushing {} queued frames on channel open", self.pending.len());
        }
        self.sender = Some(sender);
        while let Some(frame) = self.pending.pop_front() {
            if let Err(returned) = self.try_send(frame) {
                // Channel closed again mid-flush; keep the rest for the next open.
                self.pending.push_front(returned);
                break;
            }
        }
    }

    /// Detaches the sender; subsequent frames follow their delivery policy.
    pub fn close(&mut self) {
        self.sender = None;
    }

    /// Returns true while a live sender is attached.
    pub fn is_open(&self) -> bool {
        self.sender.as_ref().is_some_and(|s| !s.is_closed())
    }

    /// Offers a frame to the channel.
    pub fn deliver(&mut self, frame: Frame, delivery: Delivery) -> GateOutcome {
        let frame = match self.try_send(frame) {
            Ok(()) => return GateOutcome::Sent,
            Err(frame) => frame,
        };

        match delivery {
            Delivery::Droppable => {
                self.dropped += 1;
                trace!("Channel closed, dropping media frame");
                GateOutcome::Dropped
            }
            Delivery::Queued => {
                self.pending.push_back(frame);
                GateOutcome::Queued
            }
        }
    }

    /// Number of frames waiting for the channel to open.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of media frames discarded while closed.
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }

    fn try_send(&mut self, frame: Frame) -> Result<(), Frame> {
        let Some(sender) = &self.sender else {
            return Err(frame);
        };
        match sender.send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendError(frame)) => {
                self.sender = None;
                Err(frame)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn test_closed_gate_drops_media_and_queues_control() {
        let mut gate = ChannelGate::new();

        assert_eq!(
            gate.deliver(Frame::Binary(Bytes::from_static(b"media")), Delivery::Droppable),
            GateOutcome::Dropped
        );
        assert_eq!(
            gate.deliver(Frame::Text(r#"{"type":"eof"}"#.to_string()), Delivery::Queued),
            GateOutcome::Queued
        );
        assert_eq!(gate.pending_len(), 1);
        assert_eq!(gate.dropped_count(), 1);

        let (tx, mut rx) = mpsc::unbounded_channel();
        gate.open(tx);

        assert_eq!(rx.try_recv().unwrap(), Frame::Text(r#"{"type":"eof"}"#.to_string()));
        assert!(rx.try_recv().is_err());
        assert_eq!(gate.pending_len(), 0);
    }

    #[test]
    fn test_queued_frames_flush_in_order_exactly_once() {
        let mut gate = ChannelGate::new();
        gate.deliver(Frame::Binary(Bytes::from_static(b"1")), Delivery::Queued);
        gate.deliver(Frame::Binary(Bytes::from_static(b"2")), Delivery::Queued);

        let (tx, mut rx) = mpsc::unbounded_channel();
        gate.open(tx.clone());
        gate.open(tx);

        assert_eq!(rx.try_recv().unwrap(), Frame::Binary(Bytes::from_static(b"1")));
        assert_eq!(rx.try_recv().unwrap(), Frame::Binary(Bytes::from_static(b"2")));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_receiver_drop_closes_gate() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut gate = ChannelGate::opened(tx);
        assert!(gate.is_open());

        drop(rx);
        assert!(!gate.is_open());
        assert_eq!(
            gate.deliver(Frame::Binary(Bytes::from_static(b"late")), Delivery::Droppable),
            GateOutcome::Dropped
        );
    }
}
