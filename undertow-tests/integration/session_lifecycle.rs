//! Relay session lifecycle against scripted transcoders.

use tokio::process::Command;
use tokio::sync::mpsc;
use undertow_core::media::StreamKind;
use undertow_core::probe::ProbeRequest;
use undertow_core::relay::{
    CLOSE_INTERNAL_ERROR, CLOSE_POLICY_VIOLATION, ClientControl, Frame, ServerControl,
};
use undertow_core::session::{SessionError, run_connection};
use undertow_core::tools::MediaTools;
use undertow_core::transcode::{TranscodeError, TranscodeJob};

use crate::support::*;

const SOURCE: &str = "https://media.example.com/clip.mp4";

/// Emits `<kind>@<offset>;` every few milliseconds until interrupted.
const CONTINUOUS_EMITTER: &str =
    r#"trap 'exit 0' INT; while true; do printf '%s@%s;' "$2" "$1"; sleep 0.005; done"#;

#[tokio::test]
async fn test_seek_sends_one_reset_and_no_stale_output() {
    let tools = ScriptedTools::video_only(CONTINUOUS_EMITTER);
    let (in_tx, in_rx) = mpsc::channel(8);
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let session = tokio::spawn(run_connection(
        url_params(SOURCE),
        context(tools),
        in_rx,
        out_tx,
    ));

    // Let the first generation produce a backlog
    let mut before_seek = 0;
    while before_seek < 5 {
        let frame = recv(&mut out_rx).await;
        let packet = media(&frame).expect("only media before the seek");
        assert_eq!(packet.stream_type, StreamKind::Video);
        assert!(payload_text(&packet.payload).starts_with("video@0;"));
        before_seek += 1;
    }

    in_tx
        .send(Frame::client_control(&ClientControl::Seek { time: 12.5 }))
        .await
        .unwrap();

    let mut resets = 0;
    let mut fresh = 0;
    while fresh < 10 {
        let frame = recv(&mut out_rx).await;
        if let Some(ServerControl::Reset) = control(&frame) {
            resets += 1;
            continue;
        }
        let Some(packet) = media(&frame) else {
            panic!("unexpected frame {frame:?}");
        };
        let text = payload_text(&packet.payload);
        if resets == 0 {
            // Sent before the seek was handled
            assert!(!text.contains("video@12.5;"), "new output before reset");
            continue;
        }
        assert!(!text.contains("video@0;"), "stale output after reset: {text}");
        assert!(text.contains("video@12.5;"));
        fresh += 1;
    }
    assert_eq!(resets, 1);

    in_tx.send(Frame::close(1000, "")).await.unwrap();
    assert!(session.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_finished_source_sends_eof() {
    let tools = ScriptedTools::video_only("printf 'tail'");
    let (in_tx, in_rx) = mpsc::channel(8);
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let session = tokio::spawn(run_connection(
        url_params(SOURCE),
        context(tools),
        in_rx,
        out_tx,
    ));

    let mut relayed = String::new();
    loop {
        let frame = recv(&mut out_rx).await;
        if let Some(packet) = media(&frame) {
            relayed.push_str(&payload_text(&packet.payload));
        } else if control(&frame) == Some(ServerControl::Eof) {
            break;
        }
    }
    assert_eq!(relayed, "tail");

    drop(in_tx);
    assert!(session.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_transcoder_failure_closes_with_internal_error() {
    let tools = ScriptedTools::video_only("exit 3");
    let (_in_tx, in_rx) = mpsc::channel(8);
    let (out_tx, out_rx) = mpsc::unbounded_channel();

    let result = run_connection(url_params(SOURCE), context(tools), in_rx, out_tx).await;
    assert!(matches!(
        result,
        Err(SessionError::Transcode(TranscodeError::ProcessFailed {
            kind: StreamKind::Video,
            code: Some(3)
        }))
    ));

    let frames = drain(out_rx).await;
    assert_eq!(frames.len(), 2);
    assert_eq!(
        control(&frames[0]),
        Some(ServerControl::Error {
            message: "Video stream error (code: 3)".to_string()
        })
    );
    assert_eq!(
        frames[1],
        Frame::close(CLOSE_INTERNAL_ERROR, "Video stream error (code: 3)")
    );
}

#[derive(Debug)]
struct MissingTranscoder;

impl MediaTools for MissingTranscoder {
    fn transcoder_command(&self, _job: &TranscodeJob) -> Command {
        Command::new("/nonexistent/undertow/ffmpeg")
    }

    fn prober_command(&self, _request: &ProbeRequest) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(VIDEO_ONLY_PROBE);
        cmd
    }
}

#[tokio::test]
async fn test_spawn_failure_reported() {
    let (_in_tx, in_rx) = mpsc::channel(8);
    let (out_tx, out_rx) = mpsc::unbounded_channel();

    let result = run_connection(url_params(SOURCE), context(MissingTranscoder), in_rx, out_tx).await;
    assert!(matches!(
        result,
        Err(SessionError::Transcode(TranscodeError::Spawn { .. }))
    ));

    let frames = drain(out_rx).await;
    assert!(matches!(
        control(&frames[0]),
        Some(ServerControl::Error { .. })
    ));
    let Frame::Close { code, .. } = frames.last().unwrap() else {
        panic!("expected close frame");
    };
    assert_eq!(*code, CLOSE_INTERNAL_ERROR);
}

#[tokio::test]
async fn test_unsupported_scheme_rejected() {
    let (_in_tx, in_rx) = mpsc::channel(8);
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let tools = ScriptedTools::video_only("exit 0");

    let result = run_connection(
        url_params("ftp://media.example.com/clip.mp4"),
        context(tools),
        in_rx,
        out_tx,
    )
    .await;
    assert!(matches!(result, Err(SessionError::InvalidSource(_))));

    let frames = drain(out_rx).await;
    assert_eq!(frames.len(), 1);
    let Frame::Close { code, reason } = &frames[0] else {
        panic!("expected close frame");
    };
    assert_eq!(*code, CLOSE_POLICY_VIOLATION);
    assert!(reason.contains("ftp"));
}
