//! Transcoder subprocess orchestration.
//!
//! One subprocess per elementary stream. Each produces a self-delimiting
//! stream on stdout which is relayed chunk by chunk, tagged with the seek
//! generation that started it.

pub mod args;
pub mod process;
pub mod supervisor;

use std::io;

pub use args::{
    CodecPlan, TranscodeInput, TranscodeJob, audio_config_for, plan_audio, plan_jobs, plan_video,
};
pub use process::{ProcessEvent, ProcessEventBody, ProcessHandle};
pub use supervisor::{InputFeed, TranscodeSupervisor};

use crate::media::StreamKind;

/// Errors from transcoder subprocesses. Terminal for the stream.
#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    /// Subprocess could not be started
    #[error("Failed to start {kind} transcoder: {source}")]
    Spawn {
        kind: StreamKind,
        #[source]
        source: io::Error,
    },

    /// Subprocess exited unsuccessfully after starting
    #[error("{} stream error (code: {})", .kind.label(), .code.map_or_else(|| "signal".to_string(), |c| c.to_string()))]
    ProcessFailed { kind: StreamKind, code: Option<i32> },
}
