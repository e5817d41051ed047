//! FFprobe invocation and JSON output mapping.
//!
//! Runs `ffprobe -v error -show_streams -print_format json` and keeps the
//! first video and first audio stream.

use std::process::Stdio;

use serde::Deserialize;
use tracing::{debug, info};

use super::ProbeError;
use crate::config::ProbeConfig;
use crate::media::{AudioStreamInfo, CodecInfo, VideoStreamInfo};
use crate::tools::MediaTools;

/// What the prober reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeRequest {
    /// File path or URL opened by the prober itself
    Source(String),
    /// Byte prefix written to the prober's stdin
    Stdin,
}

/// Builds the prober argument list for a request.
pub fn ffprobe_args(request: &ProbeRequest, config: &ProbeConfig) -> Vec<String> {
    let mut args: Vec<String> = ["-v", "error", "-show_streams", "-print_format", "json"]
        .into_iter()
        .map(String::from)
        .collect();

    match request {
        ProbeRequest::Source(src) => args.extend([
            "-probesize".to_string(),
            config.max_probe_bytes.to_string(),
            src.clone(),
        ]),
        ProbeRequest::Stdin => {
            if let Some(format) = &config.upload_format {
                args.extend(["-f".to_string(), format.clone()]);
            }
            args.extend([
                "-probesize".to_string(),
                config.max_probe_bytes.to_string(),
                "-analyzeduration".to_string(),
                config.analyze_duration_us.to_string(),
                "-i".to_string(),
                "pipe:0".to_string(),
            ]);
        }
    }

    args
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    profile: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u32>,
}

/// Maps prober JSON to [`CodecInfo`].
///
/// # Errors
///
/// - `ProbeError::MalformedOutput` - Output is not valid prober JSON
/// - `ProbeError::NoStreams` - Neither a video nor an audio stream is present
pub fn parse_probe_output(stdout: &str) -> Result<CodecInfo, ProbeError> {
    let output: FfprobeOutput =
        serde_json::from_str(stdout).map_err(|e| ProbeError::MalformedOutput {
            reason: e.to_string(),
        })?;

    let mut info = CodecInfo::default();
    for stream in output.streams {
        let Some(codec) = stream.codec_name else {
            continue;
        };
        match stream.codec_type.as_deref() {
            Some("video") if info.video.is_none() => {
                info.video = Some(VideoStreamInfo {
                    codec,
                    profile: stream.profile,
                });
            }
            Some("audio") if info.audio.is_none() => {
                info.audio = Some(AudioStreamInfo {
                    codec,
                    sample_rate: stream.sample_rate.and_then(|s| s.parse().ok()),
                    channels: stream.channels,
                });
            }
            _ => {}
        }
    }

    if info.is_empty() {
        return Err(ProbeError::NoStreams);
    }
    Ok(info)
}

/// Probes a source the prober can open on its own.
///
/// # Errors
///
/// - `ProbeError::Spawn` - Prober could not be started
/// - `ProbeError::Timeout` - Prober ran past `config.timeout`; it is killed
/// - `ProbeError::ExitFailure` - Prober exited unsuccessfully
/// - `ProbeError::MalformedOutput` / `ProbeError::NoStreams` - Unusable output
pub async fn probe_source(
    tools: &dyn MediaTools,
    config: &ProbeConfig,
    src: &str,
) -> Result<CodecInfo, ProbeError> {
    let mut cmd = tools.prober_command(&ProbeRequest::Source(src.to_string()));
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("Prober command: {:?}", cmd);
    let child = cmd.spawn().map_err(ProbeError::Spawn)?;

    // Dropping the pending future drops the child, which kills it.
    let output = match tokio::time::timeout(config.timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(ProbeError::Spawn)?,
        Err(_) => {
            return Err(ProbeError::Timeout {
                after: config.timeout,
            });
        }
    };

    if !output.status.success() {
        return Err(ProbeError::ExitFailure {
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let info = parse_probe_output(&String::from_utf8_lossy(&output.stdout))?;
    info!(
        "Detected codecs: video={:?} audio={:?}",
        info.video.as_ref().map(|v| v.codec.as_str()),
        info.audio.as_ref().map(|a| a.codec.as_str())
    );
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "streams": [
            {"index": 0, "codec_type": "video", "codec_name": "h264", "profile": "High", "width": 1920},
            {"index": 1, "codec_type": "audio", "codec_name": "aac", "profile": "LC",
             "sample_rate": "44100", "channels": 2},
            {"index": 2, "codec_type": "audio", "codec_name": "ac3", "sample_rate": "48000", "channels": 6}
        ]
    }"#;

    #[test]
    fn test_parse_first_streams() {
        let info = parse_probe_output(SAMPLE).unwrap();

        let video = info.video.unwrap();
        assert_eq!(video.codec, "h264");
        assert_eq!(video.profile.as_deref(), Some("High"));

        let audio = info.audio.unwrap();
        assert_eq!(audio.codec, "aac");
        assert_eq!(audio.sample_rate, Some(44_100));
        assert_eq!(audio.channels, Some(2));
    }

    #[test]
    fn test_parse_audio_only() {
        let info = parse_probe_output(
            r#"{"streams":[{"codec_type":"audio","codec_name":"mp3","sample_rate":"bogus"}]}"#,
        )
        .unwrap();

        assert!(info.video.is_none());
        let audio = info.audio.unwrap();
        assert_eq!(audio.sample_rate, None);
        assert_eq!(audio.channels, None);
    }

    #[test]
    fn test_parse_failures() {
        assert!(matches!(
            parse_probe_output("ffprobe: command not found"),
            Err(ProbeError::MalformedOutput { .. })
        ));
        assert!(matches!(parse_probe_output("{}"), Err(ProbeError::NoStreams)));
        assert!(matches!(
            parse_probe_output(r#"{"streams":[{"codec_type":"subtitle","codec_name":"srt"}]}"#),
            Err(ProbeError::NoStreams)
        ));
    }

    #[test]
    fn test_source_args() {
        let args = ffprobe_args(
            &ProbeRequest::Source("https://example.com/v.mp4".to_string()),
            &ProbeConfig::default(),
        );
        assert_eq!(
            args,
            vec![
                "-v",
                "error",
                "-show_streams",
                "-print_format",
                "json",
                "-probesize",
                "5242880",
                "https://example.com/v.mp4"
            ]
        );
    }

    #[test]
    fn test_url_probe_honors_configured_budget() {
        let config = ProbeConfig {
            max_probe_bytes: 1024,
            ..ProbeConfig::default()
        };
        let args = ffprobe_args(&ProbeRequest::Source("http://h/v.ts".to_string()), &config);

        assert_eq!(&args[args.len() - 3..], ["-probesize", "1024", "http://h/v.ts"]);
        assert!(!args.contains(&"-analyzeduration".to_string()));
    }

    #[test]
    fn test_stdin_args_carry_budget() {
        let config = ProbeConfig {
            upload_format: Some("mp4".to_string()),
            ..ProbeConfig::default()
        };
        let args = ffprobe_args(&ProbeRequest::Stdin, &config).join(" ");

        assert!(args.contains("-f mp4"));
        assert!(args.contains("-probesize 5242880"));
        assert!(args.contains("-analyzeduration 5000000"));
        assert!(args.ends_with("-i pipe:0"));
    }
}
