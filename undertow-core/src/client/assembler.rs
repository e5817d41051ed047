//! Parameter set capture and access-unit grouping.

use bytes::Bytes;
use tracing::{debug, trace};

use super::avcc::{ConfigError, VideoDecoderConfig, derive_decoder_config};
use super::nal::{NalUnit, nal_type, to_annex_b};

/// Whether an access unit can be decoded on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Key,
    Delta,
}

/// NAL units that decode into one picture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUnit {
    pub nal_units: Vec<NalUnit>,
    pub kind: ChunkKind,
    /// Server capture timestamp of the packet that completed the unit (ms)
    pub capture_timestamp: u64,
}

impl AccessUnit {
    fn new(nal_units: Vec<NalUnit>, capture_timestamp: u64) -> Self {
        let kind = if nal_units.iter().any(NalUnit::is_idr) {
            ChunkKind::Key
        } else {
            ChunkKind::Delta
        };
        Self {
            nal_units,
            kind,
            capture_timestamp,
        }
    }

    /// Annex-B bytes handed to the decoder.
    pub fn to_annex_b(&self) -> Bytes {
        to_annex_b(&self.nal_units)
    }
}

#[derive(Debug, Default)]
enum ConfigState {
    #[default]
    Pending,
    Derived,
    Failed,
}

/// Captures SPS/PPS until a decoder configuration can be derived.
///
/// The configuration is derived once; later parameter sets only travel
/// inside access units until `clear`.
#[derive(Debug, Default)]
pub struct ParameterSetCache {
    sps: Option<NalUnit>,
    pps: Option<NalUnit>,
    state: ConfigState,
}

impl ParameterSetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captures parameter sets from `units` and returns the configuration
    /// the first time both are known.
    pub fn observe(
        &mut self,
        units: &[NalUnit],
    ) -> Option<Result<VideoDecoderConfig, ConfigError>> {
        if !matches!(self.state, ConfigState::Pending) {
            return None;
        }

        for unit in units {
            match unit.nal_type() {
                nal_type::SPS => {
                    debug!("SPS captured ({} bytes)", unit.len());
                    self.sps = Some(unit.clone());
                }
                nal_type::PPS => {
                    debug!("PPS captured ({} bytes)", unit.len());
                    self.pps = Some(unit.clone());
                }
                _ => {}
            }
        }

        let (Some(sps), Some(pps)) = (&self.sps, &self.pps) else {
            return None;
        };
        let result = derive_decoder_config(sps.as_bytes(), pps.as_bytes());
        self.state = match result {
            Ok(_) => ConfigState::Derived,
            Err(_) => ConfigState::Failed,
        };
        Some(result)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Groups NAL units into access units.
///
/// An access unit delimiter closes the pending unit once it holds a slice,
/// and so does the end of each batch. Parameter sets without a slice yet
/// are carried into the next batch.
#[derive(Debug, Default)]
pub struct AccessUnitAssembler {
    pending: Vec<NalUnit>,
}

impl AccessUnitAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group(&mut self, units: Vec<NalUnit>, capture_timestamp: u64) -> Vec<AccessUnit> {
        let mut out = Vec::new();
        for unit in units {
            match unit.nal_type() {
                nal_type::NON_IDR_SLICE
                | nal_type::IDR_SLICE
                | nal_type::SPS
                | nal_type::PPS => self.pending.push(unit),
                nal_type::AUD => self.flush(capture_timestamp, &mut out),
                other => trace!("Skipping NAL unit type {}", other),
            }
        }
        self.flush(capture_timestamp, &mut out);
        out
    }

    fn flush(&mut self, capture_timestamp: u64, out: &mut Vec<AccessUnit>) {
        if self.pending.iter().any(NalUnit::is_slice) {
            let units = std::mem::take(&mut self.pending);
            out.push(AccessUnit::new(units, capture_timestamp));
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
