//! Centralized configuration for Undertow.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

/// Central configuration for all Undertow components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct UndertowConfig {
    pub tools: ToolConfig,
    pub probe: ProbeConfig,
    pub transcode: TranscodeConfig,
    pub server: ServerConfig,
}

/// Locations of the external transcoder and prober binaries.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    /// Transcoder binary, resolved through `PATH` when relative
    pub ffmpeg_path: PathBuf,
    /// Prober binary, resolved through `PATH` when relative
    pub ffprobe_path: PathBuf,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
        }
    }
}

/// Limits applied while detecting the source codecs.
///
/// Probing a live upload is bounded both by bytes and by wall-clock time
/// so a slow or silent uploader cannot hold a session open forever.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Bytes of an upload handed to the prober before its input is closed
    pub max_probe_bytes: usize,
    /// Wall-clock limit for one probe run
    pub timeout: Duration,
    /// Analysis window passed to the prober, in microseconds
    pub analyze_duration_us: u64,
    /// Input format hint for uploads (`None` lets the prober guess)
    pub upload_format: Option<String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            max_probe_bytes: 5 * 1024 * 1024, // 5 MiB
            timeout: Duration::from_secs(15),
            analyze_duration_us: 5_000_000,
            upload_format: None,
        }
    }
}

/// Codec policy and process tuning for the transcoder subprocesses.
#[derive(Debug, Clone)]
pub struct TranscodeConfig {
    /// Video codecs copied without re-encoding; H.264 is emitted as Annex-B,
    /// anything else in IVF framing
    pub video_copy_codecs: Vec<String>,
    /// Audio codecs the browser decodes natively; these are copied
    pub audio_copy_codecs: Vec<String>,
    /// x264 preset used when video must be re-encoded
    pub video_preset: String,
    /// GOP length for re-encoded video
    pub keyframe_interval: u32,
    /// Constant rate factor for re-encoded video
    pub crf: u32,
    /// Bitrate for re-encoded audio
    pub audio_bitrate: String,
    /// Sample rate used when the prober reports none
    pub default_sample_rate: u32,
    /// Channel count used when the prober reports none
    pub default_channels: u32,
    /// Read buffer for subprocess output
    pub read_chunk_size: usize,
    /// Upload chunks queued per subprocess before the session stops reading
    /// from the client
    pub input_queue_chunks: usize,
    /// How long an interrupted subprocess may linger before it is killed
    pub kill_grace: Duration,
    /// Read input at native frame rate (`-re`)
    pub realtime_input: bool,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            video_copy_codecs: ["h264", "avc1"]
                .into_iter()
                .map(String::from)
                .collect(),
            audio_copy_codecs: ["aac", "mp4a", "opus", "vorbis", "mp3"]
                .into_iter()
                .map(String::from)
                .collect(),
            video_preset: "veryfast".to_string(),
            keyframe_interval: 30,
            crf: 28,
            audio_bitrate: "128k".to_string(),
            default_sample_rate: 48_000,
            default_channels: 2,
            read_chunk_size: 64 * 1024, // 64 KiB
            input_queue_chunks: 8,
            kill_grace: Duration::from_secs(5),
            realtime_input: true,
        }
    }
}

/// HTTP and WebSocket listener configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address
    pub bind_addr: SocketAddr,
    /// Directory served for every path other than the stream endpoint
    pub public_dir: PathBuf,
    /// Inbound frames buffered between the socket reader and the session
    pub inbound_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 3000)),
            public_dir: PathBuf::from("public"),
            inbound_buffer: 64,
        }
    }
}

impl UndertowConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Tool locations
        if let Ok(path) = std::env::var("UNDERTOW_FFMPEG") {
            config.tools.ffmpeg_path = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("UNDERTOW_FFPROBE") {
            config.tools.ffprobe_path = PathBuf::from(path);
        }

        // Probe limits
        if let Ok(timeout) = std::env::var("UNDERTOW_PROBE_TIMEOUT_SECS") {
            if let Ok(seconds) = timeout.parse::<u64>() {
                config.probe.timeout = Duration::from_secs(seconds);
            }
        }

        if let Ok(bytes) = std::env::var("UNDERTOW_MAX_PROBE_BYTES") {
            if let Ok(count) = bytes.parse::<usize>() {
                config.probe.max_probe_bytes = count;
            }
        }

        // Listener
        if let Ok(bind) = std::env::var("UNDERTOW_BIND") {
            if let Ok(addr) = bind.parse::<SocketAddr>() {
                config.server.bind_addr = addr;
            }
        }

        if let Ok(dir) = std::env::var("UNDERTOW_PUBLIC_DIR") {
            config.server.public_dir = PathBuf::from(dir);
        }

        config
    }

    /// Creates a configuration with short limits for tests.
    pub fn for_testing() -> Self {
        let mut config = Self::default();
        config.probe.timeout = Duration::from_secs(2);
        config.transcode.realtime_input = false;
        config.transcode.kill_grace = Duration::from_millis(200);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = UndertowConfig::default();

        assert_eq!(config.tools.ffmpeg_path, PathBuf::from("ffmpeg"));
        assert_eq!(config.probe.max_probe_bytes, 5 * 1024 * 1024);
        assert_eq!(config.probe.timeout, Duration::from_secs(15));
        assert_eq!(config.transcode.keyframe_interval, 30);
        assert_eq!(config.transcode.default_sample_rate, 48_000);
        assert_eq!(config.server.bind_addr.port(), 3000);
        assert!(config.transcode.realtime_input);
    }

    #[test]
    fn test_copy_allow_lists() {
        let config = TranscodeConfig::default();
        assert!(config.video_copy_codecs.iter().any(|c| c == "h264"));
        assert!(!config.video_copy_codecs.iter().any(|c| c == "hevc"));
        assert!(config.audio_copy_codecs.iter().any(|c| c == "aac"));
        assert!(!config.audio_copy_codecs.iter().any(|c| c == "ac3"));
    }

    #[test]
    fn test_testing_preset() {
        let config = UndertowConfig::for_testing();
        assert!(!config.transcode.realtime_input);
        assert!(config.probe.timeout < Duration::from_secs(15));
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("UNDERTOW_FFMPEG", "/opt/ffmpeg/bin/ffmpeg");
            std::env::set_var("UNDERTOW_PROBE_TIMEOUT_SECS", "60");
            std::env::set_var("UNDERTOW_MAX_PROBE_BYTES", "1024");
            std::env::set_var("UNDERTOW_BIND", "0.0.0.0:8080");
        }

        let config = UndertowConfig::from_env();

        assert_eq!(
            config.tools.ffmpeg_path,
            PathBuf::from("/opt/ffmpeg/bin/ffmpeg")
        );
        assert_eq!(config.probe.timeout, Duration::from_secs(60));
        assert_eq!(config.probe.max_probe_bytes, 1024);
        assert_eq!(config.server.bind_addr.port(), 8080);

        // Cleanup
        unsafe {
            std::env::remove_var("UNDERTOW_FFMPEG");
            std::env::remove_var("UNDERTOW_PROBE_TIMEOUT_SECS");
            std::env::remove_var("UNDERTOW_MAX_PROBE_BYTES");
            std::env::remove_var("UNDERTOW_BIND");
        }
    }
}
