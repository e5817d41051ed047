//! Upload interception during codec detection.
//!
//! An uploaded stream cannot be rewound, so every chunk received while the
//! prober runs is kept and later replayed, in order, into the transcoders.

use std::process::Stdio;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::ChildStdin;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::ProbeError;
use super::ffprobe::{ProbeRequest, parse_probe_output};
use crate::config::ProbeConfig;
use crate::media::CodecInfo;
use crate::relay::{ClientControl, Frame};
use crate::tools::MediaTools;

/// Where an intercepted chunk goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkRoute {
    /// Write to the prober; budget not yet reached
    ForwardToProber,
    /// Write to the prober, then close its input
    ForwardAndFinalize,
    /// Prober input already closed; keep for replay only
    BufferOnly,
}

/// Ordered record of every upload byte seen before streaming starts.
#[derive(Debug)]
pub struct UploadInterceptor {
    chunks: Vec<Bytes>,
    received: usize,
    budget: usize,
    finalized: bool,
    eof: bool,
}

impl UploadInterceptor {
    /// Creates an interceptor that finalizes after `budget` bytes.
    pub fn new(budget: usize) -> Self {
        Self {
            chunks: Vec::new(),
            received: 0,
            budget,
            finalized: false,
            eof: false,
        }
    }

    /// Buffers a chunk and decides whether the prober should see it.
    pub fn record(&mut self, chunk: Bytes) -> ChunkRoute {
        self.received += chunk.len();
        self.chunks.push(chunk);

        if self.finalized {
            return ChunkRoute::BufferOnly;
        }
        if self.received >= self.budget {
            self.finalized = true;
            debug!("Probe budget of {} bytes reached", self.budget);
            return ChunkRoute::ForwardAndFinalize;
        }
        ChunkRoute::ForwardToProber
    }

    /// Records the uploader's end-of-input marker.
    pub fn mark_eof(&mut self) {
        self.finalized = true;
        self.eof = true;
    }

    /// Returns true once the prober input should be closed.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Total bytes buffered so far.
    pub fn buffered_bytes(&self) -> usize {
        self.received
    }

    /// Hands the buffered prefix over for replay.
    pub fn into_replay(self) -> UploadReplay {
        UploadReplay {
            chunks: self.chunks,
            eof: self.eof,
        }
    }
}

/// Upload prefix to replay into the transcoders before live chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReplay {
    pub chunks: Vec<Bytes>,
    /// Uploader already sent `eof`; transcoder input closes after the replay
    pub eof: bool,
}

impl UploadReplay {
    /// Total replayed bytes.
    pub fn len(&self) -> usize {
        self.chunks.iter().map(Bytes::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Probes a live upload while intercepting its first bytes.
///
/// Consumes frames from `inbound` until the prober exits. Binary frames are
/// mirrored to the prober until the byte budget is reached or the uploader
/// sends `eof`; all of them are retained for replay. Other control messages
/// are ignored while probing.
///
/// # Errors
///
/// - `ProbeError::Spawn` - Prober could not be started
/// - `ProbeError::Disconnected` - Channel closed before the prober finished
/// - `ProbeError::Timeout` - Prober still running at `config.timeout`; it is killed
/// - `ProbeError::ExitFailure` / `MalformedOutput` / `NoStreams` - Probe failed
pub async fn probe_upload(
    tools: &dyn MediaTools,
    config: &ProbeConfig,
    inbound: &mut mpsc::Receiver<Frame>,
) -> Result<(CodecInfo, UploadReplay), ProbeError> {
    let mut cmd = tools.prober_command(&ProbeRequest::Stdin);
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("Upload prober command: {:?}", cmd);
    let mut child = cmd.spawn().map_err(ProbeError::Spawn)?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| ProbeError::Spawn(std::io::Error::other("Failed to get stdin handle")))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ProbeError::Spawn(std::io::Error::other("Failed to get stdout handle")))?;
    let stderr = child.stderr.take();

    let stdout_task = tokio::spawn(collect_output(stdout));
    let stderr_task = stderr.map(|stderr| tokio::spawn(collect_output(stderr)));

    let (input_tx, input_rx) = mpsc::unbounded_channel::<Bytes>();
    tokio::spawn(feed_prober(stdin, input_rx));
    let mut input_tx = Some(input_tx);

    let mut interceptor = UploadInterceptor::new(config.max_probe_bytes);
    let deadline = tokio::time::sleep(config.timeout);
    tokio::pin!(deadline);

    let status = loop {
        tokio::select! {
            status = child.wait() => {
                break status.map_err(ProbeError::Spawn)?;
            }
            frame = inbound.recv() => match frame {
                None | Some(Frame::Close { .. }) => {
                    info!("Uploader disconnected during probing");
                    let _ = child.start_kill();
                    return Err(ProbeError::Disconnected);
                }
                Some(Frame::Binary(chunk)) => {
                    let route = interceptor.record(chunk.clone());
                    if route != ChunkRoute::BufferOnly {
                        if let Some(tx) = &input_tx {
                            let _ = tx.send(chunk);
                        }
                    }
                    if route == ChunkRoute::ForwardAndFinalize {
                        // Dropping the sender closes prober stdin
                        input_tx = None;
                    }
                }
                Some(Frame::Text(text)) => match ClientControl::parse(&text) {
                    Ok(ClientControl::Eof) => {
                        debug!("Upload eof after {} bytes", interceptor.buffered_bytes());
                        interceptor.mark_eof();
                        input_tx = None;
                    }
                    Ok(ClientControl::Seek { time }) => {
                        debug!("Ignoring seek to {} during probing", time);
                    }
                    Err(e) => warn!("Ignoring control message during probing: {}", e),
                },
            },
            _ = &mut deadline => {
                warn!("Probe timed out after {:?}", config.timeout);
                let _ = child.start_kill();
                return Err(ProbeError::Timeout { after: config.timeout });
            }
        }
    };
    drop(input_tx);

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };

    if !status.success() {
        return Err(ProbeError::ExitFailure {
            code: status.code(),
            stderr: stderr.trim().to_string(),
        });
    }

    let info = parse_probe_output(&stdout)?;
    info!(
        "Upload probed after {} bytes: video={:?} audio={:?}",
        interceptor.buffered_bytes(),
        info.video.as_ref().map(|v| v.codec.as_str()),
        info.audio.as_ref().map(|a| a.codec.as_str())
    );
    Ok((info, interceptor.into_replay()))
}

async fn feed_prober(mut stdin: ChildStdin, mut input: mpsc::UnboundedReceiver<Bytes>) {
    while let Some(chunk) = input.recv().await {
        if let Err(e) = stdin.write_all(&chunk).await {
            // Prober may exit as soon as it has seen enough
            debug!("Prober stdin closed early: {}", e);
            return;
        }
    }
    let _ = stdin.shutdown().await;
}

async fn collect_output<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        warn!("Failed to read prober output: {}", e);
    }
    String::from_utf8_lossy(&buf).into_owned()
}
