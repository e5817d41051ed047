//! External tool seam.
//!
//! Sessions never name a binary directly; they ask a [`MediaTools`] for a
//! prepared command. Production uses [`FfmpegTools`], tests substitute
//! scripted commands with the same process behaviour.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use crate::config::{ProbeConfig, ToolConfig};
use crate::probe::{ProbeRequest, ffprobe_args};
use crate::transcode::TranscodeJob;

/// Errors from checking the external tools.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Binary missing or not executable
    #[error("{tool} not found at {}: {source}", .path.display())]
    NotFound {
        tool: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Binary ran but reported failure
    #[error("{tool} -version failed with status {status}")]
    Failed { tool: &'static str, status: String },
}

/// Builds commands for the transcoder and the prober.
///
/// Returned commands carry program and arguments only; callers configure
/// stdio and process lifetime.
pub trait MediaTools: Send + Sync + std::fmt::Debug {
    /// Command producing one elementary stream on stdout.
    fn transcoder_command(&self, job: &TranscodeJob) -> Command;

    /// Command writing stream metadata as JSON on stdout.
    fn prober_command(&self, request: &ProbeRequest) -> Command;
}

/// FFmpeg and FFprobe from the configured locations.
#[derive(Debug, Clone)]
pub struct FfmpegTools {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
    probe: ProbeConfig,
}

impl FfmpegTools {
    /// Creates tools from configuration.
    pub fn new(tools: &ToolConfig, probe: &ProbeConfig) -> Self {
        Self {
            ffmpeg_path: tools.ffmpeg_path.clone(),
            ffprobe_path: tools.ffprobe_path.clone(),
            probe: probe.clone(),
        }
    }

    /// Runs `-version` on both binaries.
    ///
    /// # Errors
    ///
    /// - `ToolError::NotFound` - A binary could not be executed
    /// - `ToolError::Failed` - A binary exited unsuccessfully
    pub async fn verify_installation(&self) -> Result<(), ToolError> {
        check_version("ffmpeg", &self.ffmpeg_path).await?;
        check_version("ffprobe", &self.ffprobe_path).await?;
        Ok(())
    }
}

impl MediaTools for FfmpegTools {
    fn transcoder_command(&self, job: &TranscodeJob) -> Command {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(job.build_args());
        cmd
    }

    fn prober_command(&self, request: &ProbeRequest) -> Command {
        let mut cmd = Command::new(&self.ffprobe_path);
        cmd.args(ffprobe_args(request, &self.probe));
        cmd
    }
}

async fn check_version(tool: &'static str, path: &Path) -> Result<(), ToolError> {
    let output = Command::new(path)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await
        .map_err(|source| ToolError::NotFound {
            tool,
            path: path.to_path_buf(),
            source,
        })?;

    if !output.status.success() {
        return Err(ToolError::Failed {
            tool,
            status: output.status.to_string(),
        });
    }

    let version = String::from_utf8_lossy(&output.stdout);
    match version.lines().next() {
        Some(line) => info!("Found {}", line),
        None => debug!("{} printed no version line", tool),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::StreamKind;
    use crate::transcode::{CodecPlan, TranscodeInput};

    fn tools() -> FfmpegTools {
        let config = ToolConfig {
            ffmpeg_path: PathBuf::from("/usr/local/bin/ffmpeg"),
            ffprobe_path: PathBuf::from("/usr/local/bin/ffprobe"),
        };
        FfmpegTools::new(&config, &ProbeConfig::default())
    }

    #[test]
    fn test_commands_use_configured_paths() {
        let tools = tools();
        let job = TranscodeJob {
            kind: StreamKind::Video,
            input: TranscodeInput::Stdin,
            seek_offset: 0.0,
            plan: CodecPlan::Copy {
                bitstream_filter: None,
                muxer: "h264",
            },
            realtime_input: false,
        };

        let transcoder = tools.transcoder_command(&job);
        assert_eq!(
            transcoder.as_std().get_program(),
            std::ffi::OsStr::new("/usr/local/bin/ffmpeg")
        );
        let last = transcoder.as_std().get_args().last().map(|a| a.to_owned());
        assert_eq!(last.as_deref(), Some(std::ffi::OsStr::new("pipe:1")));

        let prober = tools.prober_command(&ProbeRequest::Stdin);
        assert_eq!(
            prober.as_std().get_program(),
            std::ffi::OsStr::new("/usr/local/bin/ffprobe")
        );
    }

    #[tokio::test]
    async fn test_missing_binary_reported() {
        let config = ToolConfig {
            ffmpeg_path: PathBuf::from("/nonexistent/undertow/ffmpeg"),
            ffprobe_path: PathBuf::from("/nonexistent/undertow/ffprobe"),
        };
        let tools = FfmpegTools::new(&config, &ProbeConfig::default());

        assert!(matches!(
            tools.verify_installation().await,
            Err(ToolError::NotFound { tool: "ffmpeg", .. })
        ));
    }
}
