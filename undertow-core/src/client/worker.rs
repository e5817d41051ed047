//! Client-side media pipeline.
//!
//! The worker owns everything between the channel and the decoders: NAL
//! reassembly, decoder configuration, access-unit grouping, metadata
//! correlation and the upload queue. It is driven by the host through
//! `handle_frame` and the decoder output hooks, and reports back through an
//! event channel.

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::assembler::{AccessUnitAssembler, ParameterSetCache};
use super::correlator::{FrameMetadata, MetadataCorrelator};
use super::decoder::{
    AudioDecoder, DecoderBackend, DecoderError, DecoderSlot, EncodedAudioUnit, EncodedVideoUnit,
    VideoDecoder,
};
use super::nal::{NalAccumulator, NalUnit};
use super::receiver::{Inbound, parse_inbound};
use crate::media::{AudioConfig, StreamKind};
use crate::relay::{ChannelGate, ClientControl, Delivery, Frame, ServerControl, now_millis};

/// Timing reported with every decoded picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    pub capture_timestamp: u64,
    pub network_latency_ms: i64,
    pub receive_time: i64,
    pub sequence: u64,
}

/// Notifications from the worker to its host.
#[derive(Debug)]
pub enum WorkerEvent<F, A> {
    Status(String),
    Error(String),
    VideoFrame {
        frame: F,
        stats: FrameStats,
    },
    AudioData {
        data: A,
        /// Seconds since the first decoded audio block of the session
        offset_secs: f64,
    },
}

pub type EventSender<B> =
    mpsc::UnboundedSender<WorkerEvent<<B as DecoderBackend>::Frame, <B as DecoderBackend>::AudioData>>;

pub struct ClientWorker<B: DecoderBackend> {
    backend: B,
    events: EventSender<B>,
    uplink: ChannelGate,
    accumulator: NalAccumulator,
    parameter_sets: ParameterSetCache,
    assembler: AccessUnitAssembler,
    correlator: MetadataCorrelator,
    video: DecoderSlot<B::Video>,
    audio: DecoderSlot<B::Audio>,
    audio_config: Option<AudioConfig>,
    /// First decoded audio timestamp (us)
    audio_baseline: Option<u64>,
    orphaned_frames: u64,
}

impl<B: DecoderBackend> ClientWorker<B> {
    pub fn new(backend: B, events: EventSender<B>) -> Self {
        Self {
            backend,
            events,
            uplink: ChannelGate::new(),
            accumulator: NalAccumulator::new(),
            parameter_sets: ParameterSetCache::new(),
            assembler: AccessUnitAssembler::new(),
            correlator: MetadataCorrelator::new(),
            video: DecoderSlot::Idle,
            audio: DecoderSlot::Idle,
            audio_config: None,
            audio_baseline: None,
            orphaned_frames: 0,
        }
    }

    /// Attaches the outgoing side of a newly opened channel and flushes
    /// queued uploads.
    pub fn on_channel_open(&mut self, sender: mpsc::UnboundedSender<Frame>) {
        self.uplink.open(sender);
        self.status("Channel connected");
    }

    pub fn on_channel_closed(&mut self) {
        self.uplink.close();
        self.status("Channel closed");
    }

    /// Sends one chunk of an uploaded file, queueing it until the channel
    /// opens.
    pub fn send_upload_chunk(&mut self, chunk: Bytes) {
        self.uplink.deliver(Frame::Binary(chunk), Delivery::Queued);
    }

    /// Signals the end of an uploaded file.
    pub fn finish_upload(&mut self) {
        self.uplink.deliver(
            Frame::client_control(&ClientControl::Eof),
            Delivery::Queued,
        );
    }

    /// Requests a seek. Pending metadata and the audio baseline belong to the
    /// old position and are dropped right away; the decoders are reset when
    /// the server acknowledges with `reset`.
    pub fn request_seek(&mut self, time: f64) {
        self.audio_baseline = None;
        self.correlator.clear();
        self.uplink.deliver(
            Frame::client_control(&ClientControl::Seek { time }),
            Delivery::Queued,
        );
    }

    pub fn handle_frame(&mut self, frame: Frame) {
        let inbound = match parse_inbound(frame, now_millis()) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!("Dropping inbound frame: {}", e);
                return;
            }
        };

        match inbound {
            Inbound::Control(ServerControl::Reset) => {
                self.reset();
                self.status("Stream reset");
            }
            Inbound::Control(ServerControl::AudioConfig { config }) => {
                debug!("Audio config received: {}", config.codec);
                self.audio_config = Some(config);
            }
            Inbound::Control(ServerControl::Error { message }) => {
                self.error(format!("Server error: {message}"));
            }
            Inbound::Control(ServerControl::Eof) => self.status("Stream finished"),
            Inbound::Media {
                kind: StreamKind::Video,
                payload,
                metadata,
            } => self.handle_video(&payload, metadata),
            Inbound::Media {
                kind: StreamKind::Audio,
                payload,
                metadata,
            } => self.handle_audio(payload, metadata.capture_timestamp),
            Inbound::Closed { code, reason } => {
                self.uplink.close();
                self.status(format!("Channel closed ({code}): {reason}"));
            }
        }
    }

    fn handle_video(&mut self, payload: &[u8], metadata: FrameMetadata) {
        let units = self.accumulator.push(payload);
        if units.is_empty() {
            return;
        }

        if self.video.is_idle() {
            self.try_configure_video(&units);
        }

        let DecoderSlot::Active(decoder) = &mut self.video else {
            trace!("Video decoder not ready, discarding {} NAL units", units.len());
            return;
        };

        let mut failure = None;
        for unit in self.assembler.group(units, metadata.capture_timestamp) {
            let sequence = self.correlator.submit(metadata);
            let encoded = EncodedVideoUnit {
                kind: unit.kind,
                timestamp_us: unit.capture_timestamp.saturating_mul(1000),
                sequence,
                data: unit.to_annex_b(),
            };
            if let Err(e) = decoder.decode(encoded) {
                self.correlator.cancel(sequence);
                failure = Some(e);
                break;
            }
        }

        if let Some(e) = failure {
            self.on_video_error(e);
        }
    }

    fn try_configure_video(&mut self, units: &[NalUnit]) {
        let config = match self.parameter_sets.observe(units) {
            None => return,
            Some(Ok(config)) => config,
            Some(Err(e)) => {
                self.video = DecoderSlot::Failed;
                self.error(format!("Video decoder configuration failed: {e}"));
                return;
            }
        };

        let mut decoder = self.backend.create_video_decoder();
        match decoder.configure(&config) {
            Ok(()) => {
                info!("Video decoder configured: {}", config.codec);
                self.video = DecoderSlot::Active(decoder);
                self.status(format!("Video decoder configured: {}", config.codec));
            }
            Err(e) => {
                decoder.close();
                self.video = DecoderSlot::Failed;
                self.error(format!("Video decoder configuration failed: {e}"));
            }
        }
    }

    fn handle_audio(&mut self, payload: Bytes, capture_timestamp: u64) {
        if self.audio.is_idle() {
            let Some(config) = &self.audio_config else {
                trace!("No audio config yet, discarding audio packet");
                return;
            };
            let mut decoder = self.backend.create_audio_decoder();
            match decoder.configure(config) {
                Ok(()) => {
                    info!("Audio decoder configured: {}", config.codec);
                    self.audio = DecoderSlot::Active(decoder);
                }
                Err(e) => {
                    decoder.close();
                    self.audio = DecoderSlot::Failed;
                    self.error(format!("Audio decoder configuration failed: {e}"));
                    return;
                }
            }
        }

        let DecoderSlot::Active(decoder) = &mut self.audio else {
            return;
        };
        let unit = EncodedAudioUnit {
            timestamp_us: capture_timestamp.saturating_mul(1000),
            data: payload,
        };
        if let Err(e) = decoder.decode(unit) {
            self.on_audio_error(e);
        }
    }

    /// Decoded picture for the unit submitted with `sequence`.
    ///
    /// Frames without pending metadata (from before a reset or seek) are
    /// dropped.
    pub fn on_video_output(&mut self, sequence: u64, frame: B::Frame) {
        let Some(metadata) = self.correlator.resolve(sequence) else {
            self.orphaned_frames += 1;
            debug!("Dropping decoded frame {} without metadata", sequence);
            return;
        };
        let stats = FrameStats {
            capture_timestamp: metadata.capture_timestamp,
            network_latency_ms: metadata.network_latency_ms,
            receive_time: metadata.receive_time,
            sequence,
        };
        self.emit(WorkerEvent::VideoFrame { frame, stats });
    }

    /// Decoded audio block with timestamp `timestamp_us`.
    pub fn on_audio_output(&mut self, timestamp_us: u64, data: B::AudioData) {
        let baseline = *self.audio_baseline.get_or_insert(timestamp_us);
        let offset_secs = (timestamp_us as f64 - baseline as f64) / 1_000_000.0;
        self.emit(WorkerEvent::AudioData { data, offset_secs });
    }

    /// Asynchronous video decoder failure. The decoder stays down until the
    /// next reset.
    pub fn on_video_error(&mut self, error: DecoderError) {
        if let Some(mut decoder) = self.video.replace(DecoderSlot::Failed) {
            decoder.close();
        }
        self.correlator.clear();
        self.error(format!("Video decoding error: {error}"));
    }

    /// Asynchronous audio decoder failure.
    pub fn on_audio_error(&mut self, error: DecoderError) {
        if let Some(mut decoder) = self.audio.replace(DecoderSlot::Failed) {
            decoder.close();
        }
        self.error(format!("Audio decoding error: {error}"));
    }

    /// Closes both decoders and forgets all stream state. The audio config
    /// and the channel survive.
    pub fn reset(&mut self) {
        if let Some(mut decoder) = self.video.replace(DecoderSlot::Idle) {
            decoder.close();
        }
        if let Some(mut decoder) = self.audio.replace(DecoderSlot::Idle) {
            decoder.close();
        }
        self.accumulator.clear();
        self.parameter_sets.clear();
        self.assembler.clear();
        self.correlator.clear();
        self.audio_baseline = None;
        debug!("Client pipeline reset");
    }

    pub fn is_video_configured(&self) -> bool {
        self.video.is_active()
    }

    pub fn is_audio_configured(&self) -> bool {
        self.audio.is_active()
    }

    pub fn pending_metadata(&self) -> usize {
        self.correlator.len()
    }

    pub fn buffered_video_bytes(&self) -> usize {
        self.accumulator.remainder().len()
    }

    pub fn orphaned_frames(&self) -> u64 {
        self.orphaned_frames
    }

    pub fn queued_uploads(&self) -> usize {
        self.uplink.pending_len()
    }

    fn status(&self, message: impl Into<String>) {
        self.emit(WorkerEvent::Status(message.into()));
    }

    fn error(&self, message: String) {
        warn!("{}", message);
        self.emit(WorkerEvent::Error(message));
    }

    fn emit(&self, event: WorkerEvent<B::Frame, B::AudioData>) {
        // Host gone; nothing left to notify
        let _ = self.events.send(event);
    }
}

impl<B: DecoderBackend> Drop for ClientWorker<B> {
    fn drop(&mut self) {
        if let Some(mut decoder) = self.video.replace(DecoderSlot::Idle) {
            decoder.close();
        }
        if let Some(mut decoder) = self.audio.replace(DecoderSlot::Idle) {
            decoder.close();
        }
    }
}
