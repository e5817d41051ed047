//! HTTP request handlers

pub mod stream;

pub use stream::{frame_to_message, message_to_frame, stream_handler, truncate_reason};
