//! `/stream` WebSocket endpoint.
//!
//! Bridges the socket to a relay session through two channels: a bounded
//! inbound one (socket reader waits when the session falls behind on
//! uploads) and an unbounded outbound one drained by a writer task.

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, trace};
use undertow_core::relay::{CLOSE_NORMAL, Frame};
use undertow_core::session::{ConnectionParams, run_connection};

use crate::server::AppState;

/// Longest close reason a WebSocket close frame can carry.
const MAX_CLOSE_REASON: usize = 123;

pub async fn stream_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectionParams>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| bridge(socket, params, state))
}

async fn bridge(socket: WebSocket, params: ConnectionParams, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (inbound_tx, inbound_rx) = mpsc::channel(state.inbound_buffer);
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let closing = frame.is_close();
            if let Err(e) = sink.send(frame_to_message(frame)).await {
                debug!("WebSocket send failed: {}", e);
                break;
            }
            if closing {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let reader = tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    debug!("WebSocket receive failed: {}", e);
                    break;
                }
            };
            let Some(frame) = message_to_frame(message) else {
                continue;
            };
            let closing = frame.is_close();
            if inbound_tx.send(frame).await.is_err() || closing {
                break;
            }
        }
    });

    // Errors were already reported to the client by the session
    let _ = run_connection(params, state.session.clone(), inbound_rx, outbound_tx).await;

    reader.abort();
    let _ = writer.await;
}

/// Converts an outbound frame to a socket message.
pub fn frame_to_message(frame: Frame) -> Message {
    match frame {
        Frame::Binary(data) => Message::Binary(data),
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Close { code, reason } => Message::Close(Some(CloseFrame {
            code,
            reason: truncate_reason(&reason).into(),
        })),
    }
}

/// Converts a socket message to an inbound frame. Ping and pong are
/// answered by the socket itself and yield nothing.
pub fn message_to_frame(message: Message) -> Option<Frame> {
    match message {
        Message::Binary(data) => Some(Frame::Binary(data)),
        Message::Text(text) => Some(Frame::Text(text.as_str().to_owned())),
        Message::Close(Some(frame)) => Some(Frame::Close {
            code: frame.code,
            reason: frame.reason.as_str().to_owned(),
        }),
        Message::Close(None) => Some(Frame::close(CLOSE_NORMAL, "")),
        Message::Ping(_) | Message::Pong(_) => {
            trace!("Ignoring control message");
            None
        }
    }
}

/// Cuts a close reason to the protocol limit on a character boundary.
pub fn truncate_reason(reason: &str) -> String {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason.to_string();
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_string()
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn test_frames_map_to_messages() {
        let message = frame_to_message(Frame::Binary(Bytes::from_static(&[1, 2, 3])));
        assert_eq!(message, Message::Binary(Bytes::from_static(&[1, 2, 3])));

        let message = frame_to_message(Frame::Text(r#"{"type":"reset"}"#.to_string()));
        assert_eq!(message, Message::Text(r#"{"type":"reset"}"#.into()));

        let Message::Close(Some(close)) = frame_to_message(Frame::close(1011, "boom")) else {
            panic!("expected close message");
        };
        assert_eq!(close.code, 1011);
        assert_eq!(close.reason.as_str(), "boom");
    }

    #[test]
    fn test_messages_map_to_frames() {
        assert_eq!(
            message_to_frame(Message::Text(r#"{"type":"eof"}"#.into())),
            Some(Frame::Text(r#"{"type":"eof"}"#.to_string()))
        );
        assert_eq!(
            message_to_frame(Message::Close(None)),
            Some(Frame::close(CLOSE_NORMAL, ""))
        );
        assert_eq!(message_to_frame(Message::Ping(Bytes::new())), None);
    }

    #[test]
    fn test_long_close_reason_truncated() {
        let reason = "é".repeat(100);
        let truncated = truncate_reason(&reason);
        assert!(truncated.len() <= MAX_CLOSE_REASON);
        assert_eq!(truncated.len(), 122);
        assert_eq!(truncate_reason("short"), "short");
    }
}
