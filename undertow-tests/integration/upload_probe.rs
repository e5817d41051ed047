//! Upload-mode sessions: probing the live upload, then replaying it.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use undertow_core::UndertowConfig;
use undertow_core::probe::ProbeError;
use undertow_core::relay::{CLOSE_POLICY_VIOLATION, ClientControl, Frame, ServerControl};
use undertow_core::session::{SessionError, run_connection};

use crate::support::*;

#[tokio::test]
async fn test_probe_timeout_fails_session() {
    let tools = ScriptedTools {
        probe: "exec sleep 30".to_string(),
        video: "exit 0".to_string(),
        audio: "exit 0".to_string(),
    };
    let mut config = UndertowConfig::for_testing();
    config.probe.timeout = Duration::from_millis(300);

    let (_in_tx, in_rx) = mpsc::channel(8);
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let result = run_connection(upload_params(), context_with(tools, config), in_rx, out_tx).await;
    assert!(matches!(
        result,
        Err(SessionError::Probe(ProbeError::Timeout { .. }))
    ));

    let frames = drain(out_rx).await;
    assert_eq!(frames.len(), 2);
    let Some(ServerControl::Error { message }) = control(&frames[0]) else {
        panic!("expected error message, got {:?}", frames[0]);
    };
    assert!(message.starts_with("Failed to get media info:"));
    assert_eq!(
        frames[1],
        Frame::close(CLOSE_POLICY_VIOLATION, "Failed to get media info")
    );
}

#[tokio::test]
async fn test_disconnect_during_probe_is_silent() {
    let tools = ScriptedTools {
        probe: "exec sleep 30".to_string(),
        video: "exit 0".to_string(),
        audio: "exit 0".to_string(),
    };
    let (in_tx, in_rx) = mpsc::channel(8);
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    drop(in_tx);

    let result = run_connection(upload_params(), context(tools), in_rx, out_tx).await;
    assert!(matches!(
        result,
        Err(SessionError::Probe(ProbeError::Disconnected))
    ));
    assert!(drain(out_rx).await.is_empty());
}

#[tokio::test]
async fn test_probed_prefix_replayed_before_live_chunks() {
    let tools = ScriptedTools {
        probe: format!("cat > /dev/null; {VIDEO_ONLY_PROBE}"),
        video: "cat".to_string(),
        audio: "exit 0".to_string(),
    };
    let mut config = UndertowConfig::for_testing();
    config.probe.max_probe_bytes = 8;

    let (in_tx, in_rx) = mpsc::channel(8);
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let session = tokio::spawn(run_connection(
        upload_params(),
        context_with(tools, config),
        in_rx,
        out_tx,
    ));

    in_tx
        .send(Frame::Binary(Bytes::from_static(b"first-chunk-")))
        .await
        .unwrap();
    in_tx
        .send(Frame::Binary(Bytes::from_static(b"live")))
        .await
        .unwrap();
    in_tx
        .send(Frame::client_control(&ClientControl::Eof))
        .await
        .unwrap();

    let mut relayed = String::new();
    loop {
        let frame = recv(&mut out_rx).await;
        if let Some(packet) = media(&frame) {
            relayed.push_str(&payload_text(&packet.payload));
        } else if control(&frame) == Some(ServerControl::Eof) {
            break;
        }
    }
    assert_eq!(relayed, "first-chunk-live");

    in_tx.send(Frame::close(1000, "")).await.unwrap();
    assert!(session.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_seek_ignored_for_uploads() {
    let tools = ScriptedTools {
        probe: format!("cat > /dev/null; {VIDEO_ONLY_PROBE}"),
        video: "cat".to_string(),
        audio: "exit 0".to_string(),
    };
    let mut config = UndertowConfig::for_testing();
    config.probe.max_probe_bytes = 4;

    let (in_tx, in_rx) = mpsc::channel(8);
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let session = tokio::spawn(run_connection(
        upload_params(),
        context_with(tools, config),
        in_rx,
        out_tx,
    ));

    in_tx
        .send(Frame::Binary(Bytes::from_static(b"header")))
        .await
        .unwrap();
    let first = recv(&mut out_rx).await;
    assert!(media(&first).is_some());

    in_tx
        .send(Frame::client_control(&ClientControl::Seek { time: 5.0 }))
        .await
        .unwrap();
    in_tx
        .send(Frame::client_control(&ClientControl::Eof))
        .await
        .unwrap();

    loop {
        let frame = recv(&mut out_rx).await;
        let message = control(&frame);
        assert_ne!(message, Some(ServerControl::Reset));
        if message == Some(ServerControl::Eof) {
            break;
        }
    }

    drop(in_tx);
    assert!(session.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_stalled_transcoder_pushes_back_on_uploader() {
    let tools = ScriptedTools {
        probe: format!("cat > /dev/null; {VIDEO_ONLY_PROBE}"),
        video: "exec sleep 30".to_string(),
        audio: "exit 0".to_string(),
    };
    let mut config = UndertowConfig::for_testing();
    config.probe.max_probe_bytes = 4;

    let (in_tx, in_rx) = mpsc::channel(8);
    let (out_tx, _out_rx) = mpsc::unbounded_channel();
    let session = tokio::spawn(run_connection(
        upload_params(),
        context_with(tools, config),
        in_rx,
        out_tx,
    ));

    let chunk = Bytes::from(vec![0u8; 64 * 1024]);
    let mut accepted = 0;
    while accepted < 512 {
        let send = in_tx.send(Frame::Binary(chunk.clone()));
        match tokio::time::timeout(Duration::from_millis(500), send).await {
            Ok(sent) => {
                sent.unwrap();
                accepted += 1;
            }
            Err(_) => break,
        }
    }
    assert!(
        accepted < 512,
        "uploader never blocked on a transcoder that reads nothing"
    );

    session.abort();
}
