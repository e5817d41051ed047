//! Shared helpers: scripted media tools and frame inspection.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::process::Command;
use tokio::sync::mpsc;
use undertow_core::UndertowConfig;
use undertow_core::media::StreamKind;
use undertow_core::probe::ProbeRequest;
use undertow_core::relay::{Frame, Packet, ServerControl};
use undertow_core::session::{ConnectionParams, SessionContext};
use undertow_core::tools::MediaTools;
use undertow_core::transcode::TranscodeJob;

pub const VIDEO_ONLY_PROBE: &str =
    r#"printf '%s' '{"streams":[{"codec_type":"video","codec_name":"h264"}]}'"#;

/// Runs shell snippets in place of ffmpeg and ffprobe.
///
/// Transcoder scripts get the seek offset as `$1` and the stream kind as
/// `$2`.
#[derive(Debug, Clone)]
pub struct ScriptedTools {
    pub probe: String,
    pub video: String,
    pub audio: String,
}

impl ScriptedTools {
    pub fn video_only(video: &str) -> Self {
        Self {
            probe: VIDEO_ONLY_PROBE.to_string(),
            video: video.to_string(),
            audio: "exit 0".to_string(),
        }
    }
}

impl MediaTools for ScriptedTools {
    fn transcoder_command(&self, job: &TranscodeJob) -> Command {
        let script = match job.kind {
            StreamKind::Video => &self.video,
            StreamKind::Audio => &self.audio,
        };
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(script)
            .arg("transcoder")
            .arg(job.seek_offset.to_string())
            .arg(job.kind.to_string());
        cmd
    }

    fn prober_command(&self, _request: &ProbeRequest) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&self.probe);
        cmd
    }
}

pub fn context(tools: impl MediaTools + 'static) -> SessionContext {
    context_with(tools, UndertowConfig::for_testing())
}

pub fn context_with(tools: impl MediaTools + 'static, config: UndertowConfig) -> SessionContext {
    SessionContext {
        tools: Arc::new(tools),
        config: Arc::new(config),
    }
}

pub fn url_params(src: &str) -> ConnectionParams {
    ConnectionParams {
        mode: None,
        src: Some(src.to_string()),
    }
}

pub fn upload_params() -> ConnectionParams {
    ConnectionParams {
        mode: Some("upload".to_string()),
        src: None,
    }
}

/// Next outbound frame, failing the test if none arrives in time.
pub async fn recv(rx: &mut mpsc::UnboundedReceiver<Frame>) -> Frame {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("session closed the channel")
}

/// Every frame sent until the session drops its sender.
pub async fn drain(mut rx: mpsc::UnboundedReceiver<Frame>) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Ok(Some(frame)) = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
        frames.push(frame);
    }
    frames
}

pub fn media(frame: &Frame) -> Option<Packet> {
    match frame {
        Frame::Binary(data) => Some(Packet::decode(data.clone()).expect("valid packet")),
        _ => None,
    }
}

pub fn control(frame: &Frame) -> Option<ServerControl> {
    match frame {
        Frame::Text(text) => Some(ServerControl::parse(text).expect("valid control message")),
        _ => None,
    }
}

pub fn payload_text(payload: &Bytes) -> String {
    String::from_utf8_lossy(payload).into_owned()
}
