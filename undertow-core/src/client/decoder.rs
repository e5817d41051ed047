//! Decoder abstraction.
//!
//! The worker drives platform decoders through these traits. Decoding is
//! asynchronous: output and errors come back through
//! [`ClientWorker`](super::ClientWorker) hooks, tagged with the sequence
//! number of the unit that produced them.

use bytes::Bytes;

use super::assembler::ChunkKind;
use super::avcc::VideoDecoderConfig;
use crate::media::AudioConfig;

/// Errors raised by a decoder backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecoderError {
    #[error("unsupported configuration {codec}: {reason}")]
    Configure { codec: String, reason: String },

    #[error("{0}")]
    Decode(String),

    #[error("decoder closed")]
    Closed,
}

/// One access unit handed to a video decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedVideoUnit {
    pub kind: ChunkKind,
    /// Capture timestamp in microseconds
    pub timestamp_us: u64,
    /// Correlation id echoed with the decoded frame
    pub sequence: u64,
    /// Annex-B payload
    pub data: Bytes,
}

/// One audio packet; every audio unit decodes independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAudioUnit {
    /// Capture timestamp in microseconds
    pub timestamp_us: u64,
    pub data: Bytes,
}

pub trait VideoDecoder: Send {
    fn configure(&mut self, config: &VideoDecoderConfig) -> Result<(), DecoderError>;
    fn decode(&mut self, unit: EncodedVideoUnit) -> Result<(), DecoderError>;
    fn close(&mut self);
}

pub trait AudioDecoder: Send {
    fn configure(&mut self, config: &AudioConfig) -> Result<(), DecoderError>;
    fn decode(&mut self, unit: EncodedAudioUnit) -> Result<(), DecoderError>;
    fn close(&mut self);
}

/// Creates decoders and names the output types they produce.
pub trait DecoderBackend: Send {
    type Video: VideoDecoder;
    type Audio: AudioDecoder;
    /// Decoded picture
    type Frame: Send;
    /// Decoded audio block
    type AudioData: Send;

    fn create_video_decoder(&mut self) -> Self::Video;
    fn create_audio_decoder(&mut self) -> Self::Audio;
}

/// Lifecycle of one decoder in the worker.
#[derive(Debug)]
pub(crate) enum DecoderSlot<D> {
    /// Not configured yet
    Idle,
    Active(D),
    /// Configuration or decoding failed; stays failed until reset
    Failed,
}

impl<D> DecoderSlot<D> {
    pub(crate) fn is_active(&self) -> bool {
        matches!(self, DecoderSlot::Active(_))
    }

    pub(crate) fn is_idle(&self) -> bool {
        matches!(self, DecoderSlot::Idle)
    }

    /// Takes the decoder out, leaving `next` in its place.
    pub(crate) fn replace(&mut self, next: DecoderSlot<D>) -> Option<D> {
        match std::mem::replace(self, next) {
            DecoderSlot::Active(decoder) => Some(decoder),
            _ => None,
        }
    }
}
