//! Duplex channel wire protocol.
//!
//! Server-to-client media travels as binary [`Packet`]s with a fixed 9-byte
//! header; everything else is a JSON control message in a text frame.

pub mod control;
pub mod frame;
pub mod gate;
pub mod packet;

pub use control::{ClientControl, ControlError, ServerControl};
pub use frame::{CLOSE_INTERNAL_ERROR, CLOSE_NORMAL, CLOSE_POLICY_VIOLATION, Frame};
pub use gate::{ChannelGate, Delivery, GateOutcome};
pub use packet::{HEADER_LEN, Packet, PacketError, now_millis};
