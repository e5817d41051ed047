//! Per-session transcoder lifecycle.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::TranscodeError;
use super::args::{TranscodeInput, plan_jobs};
use super::process::{ProcessEvent, ProcessHandle};
use crate::config::TranscodeConfig;
use crate::media::{CodecInfo, StreamKind};
use crate::probe::UploadReplay;
use crate::tools::MediaTools;

/// Pending write of one upload chunk to every running transcoder.
pub type InputFeed = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Owns the video and audio transcoders of one session.
///
/// Only streams present in the probed [`CodecInfo`] get a subprocess. Every
/// start supersedes whatever was running, so at most one generation of
/// processes is alive at a time.
#[derive(Debug)]
pub struct TranscodeSupervisor {
    tools: Arc<dyn MediaTools>,
    config: TranscodeConfig,
    codecs: CodecInfo,
    input: TranscodeInput,
    events: mpsc::Sender<ProcessEvent>,
    processes: Vec<ProcessHandle>,
    replay: Option<UploadReplay>,
    input_closed: bool,
}

impl TranscodeSupervisor {
    pub fn new(
        tools: Arc<dyn MediaTools>,
        config: TranscodeConfig,
        codecs: CodecInfo,
        input: TranscodeInput,
        events: mpsc::Sender<ProcessEvent>,
    ) -> Self {
        Self {
            tools,
            config,
            codecs,
            input,
            events,
            processes: Vec::new(),
            replay: None,
            input_closed: false,
        }
    }

    /// Sets upload bytes consumed during probing; written first on the next start.
    pub fn with_replay(mut self, replay: UploadReplay) -> Self {
        self.replay = Some(replay);
        self
    }

    /// Launches a transcoder per present stream at `seek_offset`.
    ///
    /// Returns once the processes are spawned; output arrives as events
    /// tagged with `generation`.
    ///
    /// # Errors
    ///
    /// - `TranscodeError::Spawn` - A subprocess could not be started
    pub fn start(&mut self, seek_offset: f64, generation: u64) -> Result<(), TranscodeError> {
        self.stop();

        let replay = if self.input.needs_stdin() {
            self.replay.take()
        } else {
            None
        };
        if let Some(replay) = &replay {
            debug!("Replaying {} buffered upload bytes", replay.len());
            self.input_closed |= replay.eof;
        }
        let prefix = replay.as_ref().map_or(&[][..], |r| r.chunks.as_slice());

        let jobs = plan_jobs(&self.codecs, &self.input, seek_offset, &self.config);
        for job in &jobs {
            let cmd = self.tools.transcoder_command(job);
            let handle = ProcessHandle::spawn(
                cmd,
                job,
                generation,
                self.events.clone(),
                &self.config,
                prefix,
            )?;
            self.processes.push(handle);
        }

        if self.input_closed {
            for process in &mut self.processes {
                process.close_input();
            }
        }

        info!(
            "Transcoding {:?} from {}s (generation {})",
            self.running_kinds(),
            seek_offset,
            generation
        );
        Ok(())
    }

    /// Terminates running processes and starts a new generation.
    ///
    /// # Errors
    ///
    /// - `TranscodeError::Spawn` - A subprocess could not be started
    pub fn restart(&mut self, seek_offset: f64, generation: u64) -> Result<(), TranscodeError> {
        debug!("Restarting transcoders at {}s", seek_offset);
        self.start(seek_offset, generation)
    }

    /// Terminates all processes. Safe to call repeatedly or before any start.
    pub fn stop(&mut self) {
        for process in &mut self.processes {
            process.terminate();
        }
        self.processes.clear();
    }

    /// Queues live upload bytes for every running process.
    ///
    /// The returned future completes once each process's input queue has
    /// accepted the chunk. It does not borrow the supervisor, so the caller
    /// can keep handling output while a slow transcoder catches up.
    pub fn feed(&self, chunk: Bytes) -> InputFeed {
        let inputs: Vec<_> = self.processes.iter().filter_map(ProcessHandle::input).collect();
        Box::pin(async move {
            for input in inputs {
                if input.send(chunk.clone()).await.is_err() {
                    debug!("Transcoder input already gone");
                }
            }
        })
    }

    /// Closes every process's input once queued bytes are written.
    pub fn close_input(&mut self) {
        self.input_closed = true;
        for process in &mut self.processes {
            process.close_input();
        }
    }

    /// Stream kinds with a live process.
    pub fn running_kinds(&self) -> Vec<StreamKind> {
        self.processes.iter().map(ProcessHandle::kind).collect()
    }
}

impl Drop for TranscodeSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}
