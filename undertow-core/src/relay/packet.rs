//! Binary media packet framing.
//!
//! Every subprocess output chunk travels as one message:
//!
//! ```text
//! +------+--------------------------+-----------------+
//! | type | capture timestamp (u64)  | payload ...     |
//! | 1 B  | 8 B big-endian, ms epoch | raw chunk bytes |
//! +------+--------------------------+-----------------+
//! ```
//!
//! Chunks are never split or merged here; boundaries are whatever the
//! subprocess read returned.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::media::StreamKind;

/// Size of the fixed packet header.
pub const HEADER_LEN: usize = 9;

/// Wire tag for video chunks.
pub const VIDEO_TAG: u8 = 1;

/// Wire tag for audio chunks.
pub const AUDIO_TAG: u8 = 2;

/// Errors decoding a binary packet
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    /// Message shorter than the fixed header
    #[error("Packet too short: {len} bytes, header needs {HEADER_LEN}")]
    Truncated { len: usize },

    /// Unknown stream-type tag
    #[error("Unknown packet stream type: {tag}")]
    UnknownStreamType { tag: u8 },
}

/// One framed media chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub stream_type: StreamKind,
    /// Milliseconds since the Unix epoch, taken at relay time
    pub capture_timestamp: u64,
    pub payload: Bytes,
}

impl Packet {
    /// Wraps a chunk with the current wall-clock time as capture timestamp.
    pub fn stamped(stream_type: StreamKind, payload: Bytes) -> Self {
        Self {
            stream_type,
            capture_timestamp: now_millis() as u64,
            payload,
        }
    }

    /// Serializes header and payload into a single message body.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_u8(stream_tag(self.stream_type));
        buf.put_u64(self.capture_timestamp);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// Parses a message body produced by [`Packet::encode`].
    ///
    /// # Errors
    ///
    /// - `PacketError::Truncated` - Fewer than [`HEADER_LEN`] bytes
    /// - `PacketError::UnknownStreamType` - Tag is neither video nor audio
    pub fn decode(mut message: Bytes) -> Result<Self, PacketError> {
        if message.len() < HEADER_LEN {
            return Err(PacketError::Truncated { len: message.len() });
        }

        let tag = message.get_u8();
        let stream_type = match tag {
            VIDEO_TAG => StreamKind::Video,
            AUDIO_TAG => StreamKind::Audio,
            tag => return Err(PacketError::UnknownStreamType { tag }),
        };
        let capture_timestamp = message.get_u64();

        Ok(Self {
            stream_type,
            capture_timestamp,
            payload: message,
        })
    }
}

/// Wire tag for a stream kind.
pub fn stream_tag(kind: StreamKind) -> u8 {
    match kind {
        StreamKind::Video => VIDEO_TAG,
        StreamKind::Audio => AUDIO_TAG,
    }
}

/// Milliseconds since the Unix epoch; the shared time base for latency.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let packet = Packet {
            stream_type: StreamKind::Audio,
            capture_timestamp: 0x0102_0304_0506_0708,
            payload: Bytes::from_static(b"\xff\xf1"),
        };
        let encoded = packet.encode();

        assert_eq!(encoded.len(), HEADER_LEN + 2);
        assert_eq!(encoded[0], AUDIO_TAG);
        assert_eq!(&encoded[1..9], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&encoded[9..], b"\xff\xf1");
    }

    #[test]
    fn test_decode_video_packet() {
        let mut raw = vec![VIDEO_TAG];
        raw.extend_from_slice(&1_700_000_000_123u64.to_be_bytes());
        raw.extend_from_slice(&[0, 0, 0, 1, 0x65]);

        let packet = Packet::decode(Bytes::from(raw)).unwrap();
        assert_eq!(packet.stream_type, StreamKind::Video);
        assert_eq!(packet.capture_timestamp, 1_700_000_000_123);
        assert_eq!(packet.payload.as_ref(), &[0, 0, 0, 1, 0x65]);
    }

    #[test]
    fn test_header_only_packet_has_empty_payload() {
        let packet = Packet::decode(Bytes::from(vec![VIDEO_TAG, 0, 0, 0, 0, 0, 0, 0, 9])).unwrap();
        assert_eq!(packet.capture_timestamp, 9);
        assert!(packet.payload.is_empty());
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert_eq!(
            Packet::decode(Bytes::from_static(&[1, 0, 0])),
            Err(PacketError::Truncated { len: 3 })
        );
        assert_eq!(
            Packet::decode(Bytes::from(vec![7u8; HEADER_LEN])),
            Err(PacketError::UnknownStreamType { tag: 7 })
        );
    }

    #[test]
    fn test_stamped_uses_wall_clock() {
        let before = now_millis() as u64;
        let packet = Packet::stamped(StreamKind::Video, Bytes::new());
        assert!(packet.capture_timestamp >= before);
    }
}
