//! Transcoder job description and command-line construction.

use crate::config::TranscodeConfig;
use crate::media::{
    AAC_LC_CODEC, AudioConfig, AudioStreamInfo, CodecInfo, StreamKind, VideoStreamInfo, is_aac,
    is_h264,
};

/// Where a transcoder reads its input from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeInput {
    /// Remote source fetched by the transcoder itself
    Url(String),
    /// Bytes written to the transcoder's stdin by the session
    Stdin,
}

impl TranscodeInput {
    /// Input argument as the transcoder expects it.
    pub fn as_arg(&self) -> &str {
        match self {
            TranscodeInput::Url(url) => url,
            TranscodeInput::Stdin => "pipe:0",
        }
    }

    /// Returns true when the session must feed stdin.
    pub fn needs_stdin(&self) -> bool {
        matches!(self, TranscodeInput::Stdin)
    }
}

/// How one elementary stream is produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecPlan {
    /// Stream copy, optionally through a bitstream filter
    Copy {
        bitstream_filter: Option<&'static str>,
        muxer: &'static str,
    },
    /// Re-encode with the given codec arguments
    Transcode {
        codec_args: Vec<String>,
        muxer: &'static str,
    },
}

impl CodecPlan {
    /// Output muxer passed with `-f`.
    pub fn muxer(&self) -> &'static str {
        match self {
            CodecPlan::Copy { muxer, .. } | CodecPlan::Transcode { muxer, .. } => muxer,
        }
    }

    /// Returns true when the stream is copied without re-encoding.
    pub fn is_copy(&self) -> bool {
        matches!(self, CodecPlan::Copy { .. })
    }
}

/// One transcoder invocation for one stream kind.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeJob {
    pub kind: StreamKind,
    pub input: TranscodeInput,
    /// Start position in seconds
    pub seek_offset: f64,
    pub plan: CodecPlan,
    /// Read input at native rate (`-re`)
    pub realtime_input: bool,
}

impl TranscodeJob {
    /// Builds the transcoder argument list.
    ///
    /// Output always goes to stdout (`pipe:1`) as a self-delimiting
    /// elementary stream.
    pub fn build_args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec!["-hide_banner".into()];
        if !self.input.needs_stdin() {
            // Keep stray stdin bytes from being read as interactive commands
            args.push("-nostdin".into());
        }

        args.extend(["-ss".into(), format!("{}", self.seek_offset)]);
        if self.realtime_input {
            args.push("-re".into());
        }
        args.extend(["-fflags".into(), "nobuffer".into()]);
        args.extend(["-i".into(), self.input.as_arg().to_string()]);

        match self.kind {
            StreamKind::Video => {
                args.extend(["-map".into(), "0:v:0".into(), "-an".into()]);
            }
            StreamKind::Audio => {
                args.extend(["-vn".into(), "-map".into(), "0:a:0".into()]);
            }
        }

        // Low-latency output
        for arg in [
            "-flags",
            "low_delay",
            "-flush_packets",
            "1",
            "-max_delay",
            "0",
            "-copyts",
            "-vsync",
            "passthrough",
        ] {
            args.push(arg.into());
        }

        let codec_flag = match self.kind {
            StreamKind::Video => "-c:v",
            StreamKind::Audio => "-c:a",
        };
        match &self.plan {
            CodecPlan::Copy {
                bitstream_filter, ..
            } => {
                args.extend([codec_flag.into(), "copy".into()]);
                if let Some(filter) = bitstream_filter {
                    let bsf_flag = match self.kind {
                        StreamKind::Video => "-bsf:v",
                        StreamKind::Audio => "-bsf:a",
                    };
                    args.extend([bsf_flag.into(), (*filter).into()]);
                }
            }
            CodecPlan::Transcode { codec_args, .. } => {
                args.push(codec_flag.into());
                args.extend(codec_args.iter().cloned());
            }
        }

        args.extend(["-f".into(), self.plan.muxer().into(), "pipe:1".into()]);
        args
    }
}

/// Chooses copy or re-encode for the video stream.
pub fn plan_video(info: &VideoStreamInfo, config: &TranscodeConfig) -> CodecPlan {
    if is_copy_allowed(&info.codec, &config.video_copy_codecs) {
        if is_h264(&info.codec) {
            return CodecPlan::Copy {
                bitstream_filter: Some("h264_mp4toannexb,dump_extra"),
                muxer: "h264",
            };
        }
        return CodecPlan::Copy {
            bitstream_filter: None,
            muxer: "ivf",
        };
    }

    CodecPlan::Transcode {
        codec_args: vec![
            "libx264".into(),
            "-preset".into(),
            config.video_preset.clone(),
            "-tune".into(),
            "zerolatency".into(),
            "-g".into(),
            config.keyframe_interval.to_string(),
            "-crf".into(),
            config.crf.to_string(),
        ],
        muxer: "h264",
    }
}

/// Chooses copy or re-encode for the audio stream.
pub fn plan_audio(info: &AudioStreamInfo, config: &TranscodeConfig) -> CodecPlan {
    if is_copy_allowed(&info.codec, &config.audio_copy_codecs) {
        let codec = info.codec.to_ascii_lowercase();
        let (bitstream_filter, muxer) = if is_aac(&codec) {
            (Some("aac_adtstoasc"), "adts")
        } else if codec == "mp3" {
            (None, "mp3")
        } else {
            (None, "ogg")
        };
        return CodecPlan::Copy {
            bitstream_filter,
            muxer,
        };
    }

    let (sample_rate, channels) = audio_shape(info, config);
    CodecPlan::Transcode {
        codec_args: vec![
            "aac".into(),
            "-b:a".into(),
            config.audio_bitrate.clone(),
            "-ar".into(),
            sample_rate.to_string(),
            "-ac".into(),
            channels.to_string(),
        ],
        muxer: "adts",
    }
}

/// Builds the per-stream jobs for every stream the probe found.
pub fn plan_jobs(
    codecs: &CodecInfo,
    input: &TranscodeInput,
    seek_offset: f64,
    config: &TranscodeConfig,
) -> Vec<TranscodeJob> {
    let mut jobs = Vec::with_capacity(2);
    if let Some(video) = &codecs.video {
        jobs.push(TranscodeJob {
            kind: StreamKind::Video,
            input: input.clone(),
            seek_offset,
            plan: plan_video(video, config),
            realtime_input: config.realtime_input,
        });
    }
    if let Some(audio) = &codecs.audio {
        jobs.push(TranscodeJob {
            kind: StreamKind::Audio,
            input: input.clone(),
            seek_offset,
            plan: plan_audio(audio, config),
            realtime_input: config.realtime_input,
        });
    }
    jobs
}

/// Audio decoder configuration matching what the audio transcoder emits.
pub fn audio_config_for(info: &AudioStreamInfo, config: &TranscodeConfig) -> AudioConfig {
    let (sample_rate, number_of_channels) = audio_shape(info, config);
    let codec = if is_aac(&info.codec) || !plan_audio(info, config).is_copy() {
        AAC_LC_CODEC.to_string()
    } else {
        info.codec.clone()
    };

    AudioConfig {
        codec,
        sample_rate,
        number_of_channels,
    }
}

fn audio_shape(info: &AudioStreamInfo, config: &TranscodeConfig) -> (u32, u32) {
    (
        info.sample_rate
            .filter(|rate| *rate > 0)
            .unwrap_or(config.default_sample_rate),
        info.channels
            .filter(|channels| *channels > 0)
            .unwrap_or(config.default_channels),
    )
}

fn is_copy_allowed(codec: &str, allow_list: &[String]) -> bool {
    allow_list.iter().any(|allowed| allowed.eq_ignore_ascii_case(codec))
}
