//! Connection driver.
//!
//! All session state lives on one task: inbound frames and transcoder events
//! are handled sequentially by a single `select!` loop, so nothing here needs
//! a lock. While an upload chunk waits for transcoder input capacity the loop
//! stops reading inbound frames, which pushes back on the client.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::coordinator::SeekCoordinator;
use super::source::{ConnectionParams, StreamSource};
use super::{SessionError, SessionId};
use crate::config::UndertowConfig;
use crate::media::CodecInfo;
use crate::probe::{ProbeError, UploadReplay, probe_source, probe_upload};
use crate::relay::{ChannelGate, ClientControl, Delivery, Frame, Packet, ServerControl};
use crate::tools::MediaTools;
use crate::transcode::{
    InputFeed, ProcessEvent, ProcessEventBody, TranscodeError, TranscodeSupervisor,
    audio_config_for,
};

/// Process events buffered between the transcoder readers and the session.
const EVENT_BUFFER: usize = 64;

/// Shared services a session needs.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub tools: Arc<dyn MediaTools>,
    pub config: Arc<UndertowConfig>,
}

/// Runs one connection to completion.
///
/// `inbound` carries frames from the client; `outbound` carries frames to it.
/// Returns when the client disconnects or the session fails. Every failure
/// is reported to the client (error message and/or close frame) before
/// returning, and all subprocesses are terminated on every exit path.
///
/// # Errors
///
/// - `SessionError::InvalidSource` - Bad connection parameters (close 1008)
/// - `SessionError::Probe` - Codec detection failed (close 1008)
/// - `SessionError::Transcode` - A transcoder failed to start or exited
///   unsuccessfully (close 1011)
pub async fn run_connection(
    params: ConnectionParams,
    ctx: SessionContext,
    mut inbound: mpsc::Receiver<Frame>,
    outbound: mpsc::UnboundedSender<Frame>,
) -> Result<(), SessionError> {
    let id = SessionId::new();
    let mut outbox = ChannelGate::opened(outbound);

    let source = match StreamSource::from_params(&params) {
        Ok(source) => source,
        Err(e) => {
            let error = SessionError::from(e);
            warn!("Session {} rejected: {}", id, error);
            outbox.deliver(
                Frame::close(error.close_code(), error.to_string()),
                Delivery::Queued,
            );
            return Err(error);
        }
    };
    info!("Session {} started ({:?})", id, source);

    let (codecs, replay) = match detect_codecs(&ctx, &source, &mut inbound).await {
        Ok(detected) => detected,
        Err(e) => {
            let error = SessionError::from(e);
            warn!("Session {}: {}", id, error);
            if !matches!(error, SessionError::Probe(ProbeError::Disconnected)) {
                send_control(
                    &mut outbox,
                    ServerControl::Error {
                        message: error.to_string(),
                    },
                );
                outbox.deliver(
                    Frame::close(error.close_code(), "Failed to get media info"),
                    Delivery::Queued,
                );
            }
            return Err(error);
        }
    };

    if let Some(audio) = &codecs.audio {
        send_control(
            &mut outbox,
            ServerControl::AudioConfig {
                config: audio_config_for(audio, &ctx.config.transcode),
            },
        );
    }

    let (events_tx, events) = mpsc::channel(EVENT_BUFFER);
    let mut supervisor = TranscodeSupervisor::new(
        Arc::clone(&ctx.tools),
        ctx.config.transcode.clone(),
        codecs,
        source.transcode_input(),
        events_tx,
    );
    if let Some(replay) = replay {
        supervisor = supervisor.with_replay(replay);
    }

    let mut session = Session {
        id,
        source,
        outbox,
        coordinator: SeekCoordinator::new(),
        supervisor,
        streams_remaining: 0,
    };

    let result = session.run(inbound, events).await;
    session.supervisor.stop();
    match &result {
        Ok(()) => info!("Session {} closed", session.id),
        Err(e) => warn!("Session {} failed: {}", session.id, e),
    }
    result
}

async fn detect_codecs(
    ctx: &SessionContext,
    source: &StreamSource,
    inbound: &mut mpsc::Receiver<Frame>,
) -> Result<(CodecInfo, Option<UploadReplay>), ProbeError> {
    match source {
        StreamSource::Upload => {
            let (codecs, replay) =
                probe_upload(ctx.tools.as_ref(), &ctx.config.probe, inbound).await?;
            Ok((codecs, Some(replay)))
        }
        StreamSource::Url(url) => {
            let probe = probe_source(ctx.tools.as_ref(), &ctx.config.probe, url.as_str());
            tokio::pin!(probe);
            loop {
                tokio::select! {
                    codecs = &mut probe => return Ok((codecs?, None)),
                    // Dropping the probe future kills the prober
                    frame = inbound.recv() => match frame {
                        None | Some(Frame::Close { .. }) => return Err(ProbeError::Disconnected),
                        Some(_) => debug!("Ignoring client frame while probing"),
                    },
                }
            }
        }
    }
}

/// Completes when the pending upload write does; never completes without one.
async fn wait_feed(feed: &mut Option<InputFeed>) {
    match feed {
        Some(feed) => feed.await,
        None => std::future::pending().await,
    }
}

fn send_control(outbox: &mut ChannelGate, message: ServerControl) {
    outbox.deliver(Frame::server_control(&message), Delivery::Queued);
}

struct Session {
    id: SessionId,
    source: StreamSource,
    outbox: ChannelGate,
    coordinator: SeekCoordinator,
    supervisor: TranscodeSupervisor,
    /// Current-generation processes that have not finished yet
    streams_remaining: usize,
}

impl Session {
    async fn run(
        &mut self,
        mut inbound: mpsc::Receiver<Frame>,
        mut events: mpsc::Receiver<ProcessEvent>,
    ) -> Result<(), SessionError> {
        self.start_generation(0.0, self.coordinator.generation())?;
        let mut feeding: Option<InputFeed> = None;

        loop {
            tokio::select! {
                frame = inbound.recv(), if feeding.is_none() => match frame {
                    None | Some(Frame::Close { .. }) => {
                        debug!("Session {}: client disconnected", self.id);
                        return Ok(());
                    }
                    Some(Frame::Binary(chunk)) if self.source.is_upload() => {
                        feeding = Some(self.supervisor.feed(chunk));
                    }
                    Some(frame) => self.handle_client_frame(frame)?,
                },
                () = wait_feed(&mut feeding) => feeding = None,
                Some(event) = events.recv() => self.handle_process_event(event)?,
            }
        }
    }

    fn start_generation(&mut self, offset: f64, generation: u64) -> Result<(), SessionError> {
        match self.supervisor.restart(offset, generation) {
            Ok(()) => {
                self.streams_remaining = self.supervisor.running_kinds().len();
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn handle_client_frame(&mut self, frame: Frame) -> Result<(), SessionError> {
        match frame {
            Frame::Binary(_) => {
                debug!("Session {}: ignoring binary frame in URL mode", self.id);
            }
            Frame::Text(text) => match ClientControl::parse(&text) {
                Ok(ClientControl::Seek { time }) => {
                    if self.source.is_upload() {
                        // Upload input cannot be rewound
                        debug!("Session {}: seek ignored for uploads", self.id);
                        return Ok(());
                    }
                    let generation = self.coordinator.request_seek(time);
                    send_control(&mut self.outbox, ServerControl::Reset);
                    self.start_generation(time, generation)?;
                }
                Ok(ClientControl::Eof) => {
                    if self.source.is_upload() {
                        debug!("Session {}: upload finished", self.id);
                        self.supervisor.close_input();
                    }
                }
                Err(e) => warn!("Session {}: ignoring control message: {}", self.id, e),
            },
            Frame::Close { .. } => {}
        }
        Ok(())
    }

    fn handle_process_event(&mut self, event: ProcessEvent) -> Result<(), SessionError> {
        if !self.coordinator.accept(event.generation) {
            trace!(
                "Session {}: dropping {} event from stale generation {}",
                self.id, event.kind, event.generation
            );
            return Ok(());
        }

        match event.body {
            ProcessEventBody::Chunk(payload) => {
                let packet = Packet::stamped(event.kind, payload);
                self.outbox
                    .deliver(Frame::packet(&packet), Delivery::Droppable);
            }
            ProcessEventBody::Exited { success: true, .. } => {
                self.streams_remaining = self.streams_remaining.saturating_sub(1);
                if self.streams_remaining == 0 {
                    info!("Session {}: source exhausted", self.id);
                    send_control(&mut self.outbox, ServerControl::Eof);
                }
            }
            ProcessEventBody::Exited {
                code,
                success: false,
            } => {
                return Err(self.fail(TranscodeError::ProcessFailed {
                    kind: event.kind,
                    code,
                }));
            }
            ProcessEventBody::ReadFailed(reason) => {
                warn!(
                    "Session {}: {} output unreadable: {}",
                    self.id, event.kind, reason
                );
            }
        }
        Ok(())
    }

    /// Reports a transcoder failure and closes the channel.
    fn fail(&mut self, error: TranscodeError) -> SessionError {
        let error = SessionError::Transcode(error);
        let message = error.to_string();
        send_control(
            &mut self.outbox,
            ServerControl::Error {
                message: message.clone(),
            },
        );
        self.outbox
            .deliver(Frame::close(error.close_code(), message), Delivery::Queued);
        self.supervisor.stop();
        error
    }
}

#[cfg(all(test, unix))]
mod tests {
    use tokio::process::Command;

    use std::time::{Duration, Instant};

    use super::*;
    use crate::probe::ProbeRequest;
    use crate::relay::CLOSE_POLICY_VIOLATION;
    use crate::transcode::TranscodeJob;

    #[derive(Debug)]
    struct FailingProber;

    impl MediaTools for FailingProber {
        fn transcoder_command(&self, _job: &TranscodeJob) -> Command {
            Command::new("false")
        }

        fn prober_command(&self, _request: &ProbeRequest) -> Command {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg("echo 'moov atom not found' >&2; exit 1");
            cmd
        }
    }

    /// Answers only after the session has had time to notice a disconnect.
    #[derive(Debug)]
    struct SlowProber;

    impl MediaTools for SlowProber {
        fn transcoder_command(&self, _job: &TranscodeJob) -> Command {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg("exec sleep 30");
            cmd
        }

        fn prober_command(&self, _request: &ProbeRequest) -> Command {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(
                r#"sleep 5; printf '%s' '{"streams":[{"codec_type":"video","codec_name":"h264"}]}'"#,
            );
            cmd
        }
    }

    fn context() -> SessionContext {
        SessionContext {
            tools: Arc::new(FailingProber),
            config: Arc::new(UndertowConfig::for_testing()),
        }
    }

    fn url_params() -> ConnectionParams {
        ConnectionParams {
            mode: None,
            src: Some("https://example.com/clip.mp4".to_string()),
        }
    }

    async fn collect(mut rx: mpsc::UnboundedReceiver<Frame>) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn test_missing_params_close_with_policy_violation() {
        let (_in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        let result = run_connection(ConnectionParams::default(), context(), in_rx, out_tx).await;
        assert!(matches!(result, Err(SessionError::InvalidSource(_))));

        let frames = collect(out_rx).await;
        assert_eq!(frames.len(), 1);
        let Frame::Close { code, reason } = &frames[0] else {
            panic!("expected close frame, got {:?}", frames[0]);
        };
        assert_eq!(*code, CLOSE_POLICY_VIOLATION);
        assert!(reason.starts_with("Invalid request:"));
    }

    #[tokio::test]
    async fn test_probe_failure_reported_before_close() {
        let (_in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let params = ConnectionParams {
            mode: None,
            src: Some("https://example.com/broken.mp4".to_string()),
        };

        let result = run_connection(params, context(), in_rx, out_tx).await;
        assert!(matches!(
            result,
            Err(SessionError::Probe(ProbeError::ExitFailure { code: Some(1), .. }))
        ));

        let frames = collect(out_rx).await;
        assert_eq!(frames.len(), 2);
        let Frame::Text(text) = &frames[0] else {
            panic!("expected error message");
        };
        let ServerControl::Error { message } = ServerControl::parse(text).unwrap() else {
            panic!("expected error control message");
        };
        assert!(message.starts_with("Failed to get media info:"));
        assert!(message.contains("moov atom not found"));
        assert_eq!(
            frames[1],
            Frame::close(CLOSE_POLICY_VIOLATION, "Failed to get media info")
        );
    }

    #[tokio::test]
    async fn test_disconnect_while_probing_url_aborts() {
        let ctx = SessionContext {
            tools: Arc::new(SlowProber),
            config: Arc::new(UndertowConfig::default()),
        };
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        in_tx.send(Frame::close(1000, "")).await.unwrap();
        drop(in_tx);

        let started = Instant::now();
        let result = run_connection(url_params(), ctx, in_rx, out_tx).await;
        assert!(matches!(
            result,
            Err(SessionError::Probe(ProbeError::Disconnected))
        ));
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(collect(out_rx).await.is_empty());
    }

    #[tokio::test]
    async fn test_frames_during_url_probe_are_skipped() {
        let ctx = SessionContext {
            tools: Arc::new(SlowProber),
            config: Arc::new(UndertowConfig::default()),
        };
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        in_tx
            .send(Frame::client_control(&ClientControl::Seek { time: 3.0 }))
            .await
            .unwrap();
        drop(in_tx);

        let result = run_connection(url_params(), ctx, in_rx, out_tx).await;
        assert!(matches!(
            result,
            Err(SessionError::Probe(ProbeError::Disconnected))
        ));
        assert!(collect(out_rx).await.is_empty());
    }
}
