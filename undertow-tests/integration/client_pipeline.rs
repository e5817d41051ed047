//! Client pipeline fed with relay packets as the server would frame them.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use proptest::prelude::*;
use tokio::sync::mpsc;
use undertow_core::client::{
    AudioDecoder, ChunkKind, ClientWorker, DecoderBackend, DecoderError, EncodedAudioUnit,
    EncodedVideoUnit, VideoDecoder, VideoDecoderConfig, WorkerEvent,
};
use undertow_core::media::{AudioConfig, StreamKind};
use undertow_core::relay::{Frame, Packet, ServerControl};

#[derive(Debug, Default)]
struct Decoded {
    codecs: Vec<String>,
    descriptions: Vec<Bytes>,
    units: Vec<EncodedVideoUnit>,
}

struct Video(Arc<Mutex<Decoded>>);
struct Audio;

impl VideoDecoder for Video {
    fn configure(&mut self, config: &VideoDecoderConfig) -> Result<(), DecoderError> {
        let mut decoded = self.0.lock().unwrap();
        decoded.codecs.push(config.codec.clone());
        decoded.descriptions.push(config.description.clone());
        Ok(())
    }

    fn decode(&mut self, unit: EncodedVideoUnit) -> Result<(), DecoderError> {
        self.0.lock().unwrap().units.push(unit);
        Ok(())
    }

    fn close(&mut self) {}
}

impl AudioDecoder for Audio {
    fn configure(&mut self, _config: &AudioConfig) -> Result<(), DecoderError> {
        Ok(())
    }

    fn decode(&mut self, _unit: EncodedAudioUnit) -> Result<(), DecoderError> {
        Ok(())
    }

    fn close(&mut self) {}
}

struct Backend(Arc<Mutex<Decoded>>);

impl DecoderBackend for Backend {
    type Video = Video;
    type Audio = Audio;
    type Frame = u64;
    type AudioData = ();

    fn create_video_decoder(&mut self) -> Video {
        Video(Arc::clone(&self.0))
    }

    fn create_audio_decoder(&mut self) -> Audio {
        Audio
    }
}

type Events = mpsc::UnboundedReceiver<WorkerEvent<u64, ()>>;

fn worker() -> (ClientWorker<Backend>, Arc<Mutex<Decoded>>, Events) {
    let decoded = Arc::new(Mutex::new(Decoded::default()));
    let (tx, rx) = mpsc::unbounded_channel();
    (ClientWorker::new(Backend(Arc::clone(&decoded)), tx), decoded, rx)
}

fn relay(chunk: &[u8]) -> Frame {
    Frame::packet(&Packet::stamped(
        StreamKind::Video,
        Bytes::copy_from_slice(chunk),
    ))
}

/// SPS, PPS, then alternating delimiters and slices: one IDR and two P
/// slices, closed by a final delimiter.
fn elementary_stream() -> Vec<u8> {
    let mut stream = Vec::new();
    for unit in [
        &[0x67, 0x64, 0x00, 0x1f, 0xac, 0xd9][..],
        &[0x68, 0xeb, 0xe3, 0xcb],
        &[0x09, 0x10],
        &[0x65, 0x88, 0x84, 0x00, 0x33],
        &[0x09, 0x30],
        &[0x41, 0x9a, 0x02],
        &[0x09, 0x30],
        &[0x41, 0x9a, 0x04],
        &[0x09, 0x30],
    ] {
        stream.extend_from_slice(&[0, 0, 0, 1]);
        stream.extend_from_slice(unit);
    }
    stream
}

#[test]
fn test_keyframe_scenario() {
    let (mut worker, decoded, _events) = worker();
    let stream: Vec<u8> = [
        &[0, 0, 0, 1, 0x67, 0x64, 0x00, 0x1f][..],
        &[0, 0, 0, 1, 0x68, 0xee],
        &[0, 0, 0, 1, 0x09, 0xf0],
        &[0, 0, 0, 1, 0x65, 0x88, 0x84],
        &[0, 0, 0, 1, 0x09, 0xf0],
    ]
    .concat();

    worker.handle_frame(relay(&stream));

    let decoded = decoded.lock().unwrap();
    assert_eq!(decoded.codecs, vec!["avc1.64001f".to_string()]);
    assert_eq!(
        decoded.descriptions[0].as_ref(),
        &[
            0x01, 0x64, 0x00, 0x1f, 0xff, 0xe1, 0x00, 0x04, 0x67, 0x64, 0x00, 0x1f, 0x01, 0x00,
            0x02, 0x68, 0xee,
        ]
    );
    assert_eq!(decoded.units.len(), 1);
    assert_eq!(decoded.units[0].kind, ChunkKind::Key);
    assert!(decoded.units[0].data.ends_with(&[0, 0, 0, 1, 0x65, 0x88, 0x84]));
}

#[test]
fn test_byte_at_a_time_delivery() {
    let (mut worker, decoded, _events) = worker();
    for byte in elementary_stream() {
        worker.handle_frame(relay(&[byte]));
    }

    let decoded = decoded.lock().unwrap();
    assert_eq!(decoded.codecs.len(), 1);
    let kinds: Vec<_> = decoded.units.iter().map(|u| u.kind).collect();
    assert_eq!(kinds, vec![ChunkKind::Key, ChunkKind::Delta, ChunkKind::Delta]);
}

#[test]
fn test_reset_then_fresh_stream() {
    let (mut worker, decoded, mut events) = worker();
    worker.handle_frame(relay(&elementary_stream()));
    let stale = decoded.lock().unwrap().units[0].sequence;

    worker.handle_frame(Frame::server_control(&ServerControl::Reset));
    assert!(!worker.is_video_configured());
    assert_eq!(worker.pending_metadata(), 0);

    // Output of a unit decoded before the reset has nothing to attach to
    worker.on_video_output(stale, 1);
    assert_eq!(worker.orphaned_frames(), 1);

    worker.handle_frame(relay(&elementary_stream()));
    let decoded = decoded.lock().unwrap();
    assert_eq!(decoded.codecs.len(), 2);
    let fresh = decoded.units.last().unwrap().sequence;
    drop(decoded);

    worker.on_video_output(fresh, 2);
    let delivered: Vec<u64> = std::iter::from_fn(|| events.try_recv().ok())
        .filter_map(|event| match event {
            WorkerEvent::VideoFrame { frame, .. } => Some(frame),
            _ => None,
        })
        .collect();
    assert_eq!(delivered, vec![2]);
}

proptest! {
    #[test]
    fn test_chunking_does_not_change_decoded_units(
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..10),
    ) {
        let stream = elementary_stream();
        let mut points: Vec<usize> = cuts.iter().map(|c| c.index(stream.len())).collect();
        points.push(0);
        points.push(stream.len());
        points.sort_unstable();
        points.dedup();

        let (mut worker, decoded, _events) = worker();
        for window in points.windows(2) {
            worker.handle_frame(relay(&stream[window[0]..window[1]]));
        }

        let decoded = decoded.lock().unwrap();
        prop_assert_eq!(decoded.codecs.len(), 1);
        let is_slice_start = |w: &[u8]| w[..4] == [0, 0, 0, 1] && matches!(w[4] & 0x1f, 1 | 5);
        let slices: usize = decoded
            .units
            .iter()
            .map(|u| u.data.windows(5).filter(|w| is_slice_start(w)).count())
            .sum();
        prop_assert_eq!(slices, 3);
        prop_assert_eq!(decoded.units[0].kind, ChunkKind::Key);
    }
}
