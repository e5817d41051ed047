//! Transport-agnostic duplex channel frames.
//!
//! The web layer converts socket messages to and from [`Frame`] so the
//! session runner and the client worker never see a concrete transport.

use bytes::Bytes;

use super::control::{ClientControl, ServerControl};
use super::packet::Packet;

/// Close code for requests rejected by policy (bad parameters, probe failure).
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Close code for server-side failures after streaming started.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Close code for an orderly shutdown.
pub const CLOSE_NORMAL: u16 = 1000;

/// One message on the duplex channel, in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Media packet or upload chunk
    Binary(Bytes),
    /// JSON control message
    Text(String),
    /// Channel close with status
    Close { code: u16, reason: String },
}

impl Frame {
    /// Frames a server control message.
    pub fn server_control(message: &ServerControl) -> Self {
        Frame::Text(message.to_json())
    }

    /// Frames a client control message.
    pub fn client_control(message: &ClientControl) -> Self {
        Frame::Text(message.to_json())
    }

    /// Frames a media packet.
    pub fn packet(packet: &Packet) -> Self {
        Frame::Binary(packet.encode())
    }

    /// Builds a close frame.
    pub fn close(code: u16, reason: impl Into<String>) -> Self {
        Frame::Close {
            code,
            reason: reason.into(),
        }
    }

    /// Returns true for close frames.
    pub fn is_close(&self) -> bool {
        matches!(self, Frame::Close { .. })
    }
}
