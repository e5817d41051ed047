//! Codec detection for remote sources and live uploads.

pub mod ffprobe;
pub mod upload;

use std::io;
use std::time::Duration;

pub use ffprobe::{ProbeRequest, ffprobe_args, parse_probe_output, probe_source};
pub use upload::{ChunkRoute, UploadInterceptor, UploadReplay, probe_upload};

/// Errors that end codec detection. All of them are terminal for the session.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// Prober binary could not be started
    #[error("Failed to start prober: {0}")]
    Spawn(#[source] io::Error),

    /// Prober exited with a failure status
    #[error("Prober exited with code {}: {stderr}", .code.map_or_else(|| "signal".to_string(), |c| c.to_string()))]
    ExitFailure { code: Option<i32>, stderr: String },

    /// Prober output was not the expected JSON
    #[error("Malformed prober output: {reason}")]
    MalformedOutput { reason: String },

    /// Source contains neither a video nor an audio stream
    #[error("No video or audio stream found")]
    NoStreams,

    /// Probe did not finish within the wall-clock limit
    #[error("Probe timed out after {}s", .after.as_secs_f64())]
    Timeout { after: Duration },

    /// Uploader went away before probing finished
    #[error("Connection closed during probing")]
    Disconnected,
}
