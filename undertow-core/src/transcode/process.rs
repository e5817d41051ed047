//! One running transcoder subprocess.
//!
//! A handle owns four tasks: an input writer, an output reader, a stderr
//! logger and a waiter. The input queue is bounded, so a transcoder that
//! stops reading stdin eventually stalls whoever feeds it. Output chunks and the exit status are reported as
//! [`ProcessEvent`]s tagged with the handle's generation. Terminating a handle
//! interrupts the process without waiting; a terminated process reports
//! nothing further.

use std::process::Stdio;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::TranscodeError;
use super::args::TranscodeJob;
use crate::config::TranscodeConfig;
use crate::media::StreamKind;

/// Something a transcoder subprocess produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEvent {
    /// Seek generation of the process that produced the event
    pub generation: u64,
    pub kind: StreamKind,
    pub body: ProcessEventBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEventBody {
    /// Raw stdout bytes, exactly as read
    Chunk(Bytes),
    /// Process ended on its own; sent after the last chunk
    Exited { code: Option<i32>, success: bool },
    /// Stdout could not be read
    ReadFailed(String),
}

/// Owned transcoder subprocess.
///
/// Dropping the handle terminates the process.
#[derive(Debug)]
pub struct ProcessHandle {
    kind: StreamKind,
    generation: u64,
    pid: Option<u32>,
    input: Option<mpsc::Sender<Bytes>>,
    kill: Option<oneshot::Sender<()>>,
}

impl ProcessHandle {
    /// Spawns `cmd` for `job` and starts relaying its output to `events`.
    ///
    /// For stdin input, `replay` is written before anything queued later.
    ///
    /// # Errors
    ///
    /// - `TranscodeError::Spawn` - The process could not be started
    pub fn spawn(
        mut cmd: Command,
        job: &TranscodeJob,
        generation: u64,
        events: mpsc::Sender<ProcessEvent>,
        config: &TranscodeConfig,
        replay: &[Bytes],
    ) -> Result<Self, TranscodeError> {
        let kind = job.kind;
        let with_stdin = job.input.needs_stdin();

        cmd.stdin(if with_stdin {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        debug!("Transcoder command ({}): {:?}", kind, cmd);
        let mut child = cmd
            .spawn()
            .map_err(|source| TranscodeError::Spawn { kind, source })?;
        let pid = child.id();

        let stdout = child.stdout.take().ok_or_else(|| TranscodeError::Spawn {
            kind,
            source: std::io::Error::other("Failed to get stdout handle"),
        })?;

        let input = match child.stdin.take() {
            Some(stdin) => {
                let (tx, rx) = mpsc::channel(config.input_queue_chunks.max(1));
                tokio::spawn(write_input(stdin, replay.to_vec(), rx, kind));
                Some(tx)
            }
            None => None,
        };

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_stderr(stderr, kind));
        }

        let reader = tokio::spawn(read_output(
            stdout,
            kind,
            generation,
            events.clone(),
            config.read_chunk_size,
        ));

        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(supervise(
            child,
            kill_rx,
            reader,
            kind,
            generation,
            events,
            config.kill_grace,
        ));

        info!(
            "Started {} transcoder (pid {:?}, generation {}, offset {}s)",
            kind, pid, generation, job.seek_offset
        );

        Ok(Self {
            kind,
            generation,
            pid,
            input,
            kill: Some(kill_tx),
        })
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Sender for the process's stdin queue, until input is closed.
    pub fn input(&self) -> Option<mpsc::Sender<Bytes>> {
        self.input.clone()
    }

    /// Closes stdin after queued bytes are written.
    pub fn close_input(&mut self) {
        if self.input.take().is_some() {
            debug!("Closing {} transcoder input", self.kind);
        }
    }

    /// Interrupts the process. Returns immediately; safe to call repeatedly.
    pub fn terminate(&mut self) {
        self.input = None;
        if let Some(kill) = self.kill.take() {
            debug!(
                "Terminating {} transcoder (pid {:?}, generation {})",
                self.kind, self.pid, self.generation
            );
            let _ = kill.send(());
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.terminate();
    }
}

async fn supervise(
    mut child: Child,
    kill: oneshot::Receiver<()>,
    reader: tokio::task::JoinHandle<()>,
    kind: StreamKind,
    generation: u64,
    events: mpsc::Sender<ProcessEvent>,
    grace: Duration,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        // A dropped sender also means terminate
        _ = kill => {
            interrupt(&mut child, kind);
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => debug!("{} transcoder stopped: {}", kind, status),
                Ok(Err(e)) => warn!("Failed to wait for {} transcoder: {}", kind, e),
                Err(_) => {
                    warn!("{} transcoder ignored interrupt, killing", kind);
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
            }
            reader.abort();
            return;
        }
    };

    // Deliver every chunk before the exit notice.
    let _ = reader.await;

    let (code, success) = match status {
        Ok(status) => (status.code(), status.success()),
        Err(e) => {
            warn!("Failed to wait for {} transcoder: {}", kind, e);
            (None, false)
        }
    };
    if success {
        info!("{} transcoder finished (generation {})", kind, generation);
    } else {
        warn!(
            "{} transcoder exited with code {:?} (generation {})",
            kind, code, generation
        );
    }

    let _ = events
        .send(ProcessEvent {
            generation,
            kind,
            body: ProcessEventBody::Exited { code, success },
        })
        .await;
}

#[cfg(unix)]
fn interrupt(child: &mut Child, kind: StreamKind) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
        debug!("SIGINT to {} transcoder failed: {}", kind, e);
        let _ = child.start_kill();
    }
}

#[cfg(not(unix))]
fn interrupt(child: &mut Child, _kind: StreamKind) {
    let _ = child.start_kill();
}

async fn read_output(
    mut stdout: ChildStdout,
    kind: StreamKind,
    generation: u64,
    events: mpsc::Sender<ProcessEvent>,
    chunk_size: usize,
) {
    let mut buffer = vec![0u8; chunk_size.max(1)];
    let mut total = 0u64;

    loop {
        let body = match stdout.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => {
                total += n as u64;
                ProcessEventBody::Chunk(Bytes::copy_from_slice(&buffer[..n]))
            }
            Err(e) => {
                warn!("Failed to read {} transcoder output: {}", kind, e);
                ProcessEventBody::ReadFailed(e.to_string())
            }
        };
        let failed = matches!(body, ProcessEventBody::ReadFailed(_));

        let event = ProcessEvent {
            generation,
            kind,
            body,
        };
        if events.send(event).await.is_err() || failed {
            break;
        }
    }

    debug!("{} transcoder output closed after {} bytes", kind, total);
}

async fn write_input(
    mut stdin: ChildStdin,
    replay: Vec<Bytes>,
    mut input: mpsc::Receiver<Bytes>,
    kind: StreamKind,
) {
    for chunk in replay {
        if let Err(e) = stdin.write_all(&chunk).await {
            debug!("{} transcoder stdin closed during replay: {}", kind, e);
            return;
        }
    }
    while let Some(chunk) = input.recv().await {
        if let Err(e) = stdin.write_all(&chunk).await {
            debug!("{} transcoder stdin closed: {}", kind, e);
            return;
        }
    }
    let _ = stdin.shutdown().await;
    debug!("{} transcoder stdin finished", kind);
}

async fn log_stderr(stderr: ChildStderr, kind: StreamKind) {
    let mut reader = tokio::io::BufReader::new(stderr);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                if !line.trim().is_empty() {
                    debug!("ffmpeg[{}]: {}", kind, line.trim());
                }
            }
            Err(e) => {
                warn!("Error reading {} transcoder stderr: {}", kind, e);
                break;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::transcode::{CodecPlan, TranscodeInput};

    fn job(input: TranscodeInput) -> TranscodeJob {
        TranscodeJob {
            kind: StreamKind::Video,
            input,
            seek_offset: 0.0,
            plan: CodecPlan::Copy {
                bitstream_filter: None,
                muxer: "h264",
            },
            realtime_input: false,
        }
    }

    fn shell(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    async fn collect_until_exit(rx: &mut mpsc::Receiver<ProcessEvent>) -> (Vec<u8>, Option<i32>) {
        let mut output = Vec::new();
        while let Some(event) = rx.recv().await {
            match event.body {
                ProcessEventBody::Chunk(chunk) => output.extend_from_slice(&chunk),
                ProcessEventBody::Exited { code, .. } => return (output, code),
                ProcessEventBody::ReadFailed(e) => panic!("read failed: {e}"),
            }
        }
        panic!("event channel closed before exit");
    }

    #[tokio::test]
    async fn test_output_precedes_exit() {
        let (tx, mut rx) = mpsc::channel(16);
        let config = TranscodeConfig::default();
        let _handle = ProcessHandle::spawn(
            shell("printf 'abc'; printf 'def'"),
            &job(TranscodeInput::Url("http://x".into())),
            3,
            tx,
            &config,
            &[],
        )
        .unwrap();

        let (output, code) = collect_until_exit(&mut rx).await;
        assert_eq!(output, b"abcdef");
        assert_eq!(code, Some(0));
    }

    #[tokio::test]
    async fn test_replay_then_queued_input_reach_stdin() {
        let (tx, mut rx) = mpsc::channel(16);
        let config = TranscodeConfig::default();
        let mut handle = ProcessHandle::spawn(
            shell("cat"),
            &job(TranscodeInput::Stdin),
            0,
            tx,
            &config,
            &[Bytes::from_static(b"hello ")],
        )
        .unwrap();

        let input = handle.input().unwrap();
        input.send(Bytes::from_static(b"big ")).await.unwrap();
        input.send(Bytes::from_static(b"world")).await.unwrap();
        drop(input);
        handle.close_input();
        assert!(handle.input().is_none());

        let (output, code) = collect_until_exit(&mut rx).await;
        assert_eq!(output, b"hello big world");
        assert_eq!(code, Some(0));
    }

    #[tokio::test]
    async fn test_nonzero_exit_reported() {
        let (tx, mut rx) = mpsc::channel(16);
        let config = TranscodeConfig::default();
        let _handle = ProcessHandle::spawn(
            shell("exit 3"),
            &job(TranscodeInput::Url("http://x".into())),
            1,
            tx,
            &config,
            &[],
        )
        .unwrap();

        let (_, code) = collect_until_exit(&mut rx).await;
        assert_eq!(code, Some(3));
    }

    #[tokio::test]
    async fn test_terminated_process_is_silent() {
        let (tx, mut rx) = mpsc::channel(16);
        let config = crate::config::UndertowConfig::for_testing().transcode;
        let mut handle = ProcessHandle::spawn(
            shell("sleep 30"),
            &job(TranscodeInput::Url("http://x".into())),
            0,
            tx,
            &config,
            &[],
        )
        .unwrap();

        handle.terminate();
        handle.terminate();
        drop(handle);

        // All senders are gone once the waiter finishes
        let next = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_input_queue_is_bounded() {
        let (tx, _rx) = mpsc::channel(16);
        let mut config = crate::config::UndertowConfig::for_testing().transcode;
        config.input_queue_chunks = 2;
        let handle = ProcessHandle::spawn(
            shell("exec sleep 30"),
            &job(TranscodeInput::Stdin),
            0,
            tx,
            &config,
            &[],
        )
        .unwrap();

        // Queue plus pipe buffer fill up; the process never reads
        let input = handle.input().unwrap();
        let chunk = Bytes::from(vec![0u8; 64 * 1024]);
        let mut accepted = 0;
        while accepted < 64 {
            let send = input.send(chunk.clone());
            if tokio::time::timeout(Duration::from_millis(200), send)
                .await
                .is_err()
            {
                break;
            }
            accepted += 1;
        }
        assert!(accepted < 64, "stdin queue never filled");
    }

    #[test]
    fn test_spawn_failure() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let _guard = runtime.enter();
        let (tx, _rx) = mpsc::channel(1);

        let result = ProcessHandle::spawn(
            Command::new("/nonexistent/undertow/transcoder"),
            &job(TranscodeInput::Stdin),
            0,
            tx,
            &TranscodeConfig::default(),
            &[],
        );
        assert!(matches!(
            result,
            Err(TranscodeError::Spawn {
                kind: StreamKind::Video,
                ..
            })
        ));
    }
}
