//! Client playback engine.
//!
//! Turns relayed packets back into decodable units: Annex-B reassembly,
//! parameter-set capture, access-unit grouping and metadata correlation.
//! Actual decoding is delegated to a [`DecoderBackend`].

pub mod assembler;
pub mod avcc;
pub mod correlator;
pub mod decoder;
pub mod nal;
pub mod receiver;
pub mod worker;

pub use assembler::{AccessUnit, AccessUnitAssembler, ChunkKind, ParameterSetCache};
pub use avcc::{ConfigError, VideoDecoderConfig, derive_decoder_config};
pub use correlator::{FrameMetadata, MetadataCorrelator};
pub use decoder::{
    AudioDecoder, DecoderBackend, DecoderError, EncodedAudioUnit, EncodedVideoUnit, VideoDecoder,
};
pub use nal::{NalAccumulator, NalUnit, nal_type};
pub use receiver::{Inbound, ReceiveError, parse_inbound};
pub use worker::{ClientWorker, EventSender, FrameStats, WorkerEvent};
