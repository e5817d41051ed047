//! Classification of inbound channel frames.

use bytes::Bytes;

use super::correlator::FrameMetadata;
use crate::media::StreamKind;
use crate::relay::{ControlError, Frame, Packet, PacketError, ServerControl};

#[derive(Debug, thiserror::Error)]
pub enum ReceiveError {
    #[error("malformed media packet: {0}")]
    Packet(#[from] PacketError),

    #[error("malformed control message: {0}")]
    Control(#[from] ControlError),
}

/// What an inbound frame means to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Control(ServerControl),
    Media {
        kind: StreamKind,
        payload: Bytes,
        metadata: FrameMetadata,
    },
    Closed {
        code: u16,
        reason: String,
    },
}

/// Decodes a frame received at `receive_time` (ms since epoch).
///
/// # Errors
///
/// - `ReceiveError::Packet` - Binary frame too short or with an unknown tag
/// - `ReceiveError::Control` - Text frame that is not a known message
pub fn parse_inbound(frame: Frame, receive_time: i64) -> Result<Inbound, ReceiveError> {
    match frame {
        Frame::Binary(data) => {
            let packet = Packet::decode(data)?;
            let capture = packet.capture_timestamp;
            Ok(Inbound::Media {
                kind: packet.stream_type,
                payload: packet.payload,
                metadata: FrameMetadata {
                    capture_timestamp: capture,
                    network_latency_ms: receive_time.saturating_sub(capture as i64),
                    receive_time,
                },
            })
        }
        Frame::Text(text) => Ok(Inbound::Control(ServerControl::parse(&text)?)),
        Frame::Close { code, reason } => Ok(Inbound::Closed { code, reason }),
    }
}
