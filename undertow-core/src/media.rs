//! Codec metadata shared by the prober, the transcode planner and the client.

use serde::{Deserialize, Serialize};

/// Which elementary stream a subprocess or packet carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// H.264 Annex-B video
    Video,
    /// ADTS (or other self-delimiting) audio
    Audio,
}

impl StreamKind {
    /// Capitalized name for user-facing messages.
    pub fn label(&self) -> &'static str {
        match self {
            StreamKind::Video => "Video",
            StreamKind::Audio => "Audio",
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Video => write!(f, "video"),
            StreamKind::Audio => write!(f, "audio"),
        }
    }
}

/// Video stream description as reported by the prober.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoStreamInfo {
    /// Codec name, e.g. `h264` or `hevc`
    pub codec: String,
    /// Codec profile, e.g. `High`
    pub profile: Option<String>,
}

/// Audio stream description as reported by the prober.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioStreamInfo {
    /// Codec name, e.g. `aac` or `ac3`
    pub codec: String,
    /// Sample rate in Hz
    pub sample_rate: Option<u32>,
    /// Channel count
    pub channels: Option<u32>,
}

/// Codec metadata for one source, fixed for a seek generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecInfo {
    /// First video stream, if the source has one
    pub video: Option<VideoStreamInfo>,
    /// First audio stream, if the source has one
    pub audio: Option<AudioStreamInfo>,
}

impl CodecInfo {
    /// Returns true when the prober found neither video nor audio.
    pub fn is_empty(&self) -> bool {
        self.video.is_none() && self.audio.is_none()
    }
}

/// Audio decoder configuration sent to the client as `audio-config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioConfig {
    /// Codec string understood by the platform decoder, e.g. `mp4a.40.2`
    pub codec: String,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count
    pub number_of_channels: u32,
}

/// Codec string for AAC-LC.
pub const AAC_LC_CODEC: &str = "mp4a.40.2";

/// Returns true for codec names that denote AAC.
pub fn is_aac(codec: &str) -> bool {
    matches!(codec.to_ascii_lowercase().as_str(), "aac" | "mp4a")
}

/// Returns true for codec names that denote H.264.
pub fn is_h264(codec: &str) -> bool {
    matches!(codec.to_ascii_lowercase().as_str(), "h264" | "avc1")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_probe_result() {
        let info = CodecInfo {
            video: Some(VideoStreamInfo {
                codec: "h264".to_string(),
                profile: Some("High".to_string()),
            }),
            audio: None,
        };
        assert!(!info.is_empty());
        assert!(CodecInfo::default().is_empty());
    }

    #[test]
    fn test_audio_config_wire_names() {
        let config = AudioConfig {
            codec: AAC_LC_CODEC.to_string(),
            sample_rate: 44100,
            number_of_channels: 2,
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["sampleRate"], 44100);
        assert_eq!(json["numberOfChannels"], 2);
    }

    #[test]
    fn test_codec_family_checks() {
        assert!(is_aac("AAC"));
        assert!(is_aac("mp4a"));
        assert!(!is_aac("opus"));
        assert!(is_h264("avc1"));
        assert!(!is_h264("hevc"));
    }
}
