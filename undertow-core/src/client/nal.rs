//! Annex-B NAL unit extraction.
//!
//! Video arrives as arbitrary chunks of an Annex-B byte stream. The
//! accumulator splits on 3-byte (`00 00 01`) and 4-byte (`00 00 00 01`)
//! start codes and keeps the trailing, possibly incomplete unit until the
//! next chunk arrives.

use bytes::{Bytes, BytesMut};

/// H.264 NAL unit type constants.
pub mod nal_type {
    /// Non-IDR slice (P/B frame)
    pub const NON_IDR_SLICE: u8 = 1;
    /// IDR slice (keyframe)
    pub const IDR_SLICE: u8 = 5;
    /// Supplemental enhancement information
    pub const SEI: u8 = 6;
    /// Sequence parameter set
    pub const SPS: u8 = 7;
    /// Picture parameter set
    pub const PPS: u8 = 8;
    /// Access unit delimiter
    pub const AUD: u8 = 9;
}

/// Start code re-inserted in front of every unit handed to the decoder.
pub const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// One NAL unit without its start code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NalUnit(Bytes);

impl NalUnit {
    pub fn new(data: Bytes) -> Self {
        Self(data)
    }

    /// Type from the low five bits of the header byte.
    pub fn nal_type(&self) -> u8 {
        self.0.first().map_or(0, |header| header & 0x1f)
    }

    pub fn is_idr(&self) -> bool {
        self.nal_type() == nal_type::IDR_SLICE
    }

    pub fn is_slice(&self) -> bool {
        matches!(
            self.nal_type(),
            nal_type::NON_IDR_SLICE | nal_type::IDR_SLICE
        )
    }

    pub fn is_parameter_set(&self) -> bool {
        matches!(self.nal_type(), nal_type::SPS | nal_type::PPS)
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Byte accumulator carrying the incomplete trailing unit across chunks.
#[derive(Debug, Default)]
pub struct NalAccumulator {
    buffer: BytesMut,
    /// Where scanning resumes in `buffer`
    scan_pos: usize,
}

impl NalAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns every unit completed by it.
    ///
    /// A unit is complete once the next start code has been seen. Bytes
    /// before the first start code of the stream come out as a unit too.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<NalUnit> {
        self.buffer.extend_from_slice(chunk);

        let buf = &self.buffer[..];
        let mut ranges = Vec::new();
        let mut start = 0;
        let mut i = self.scan_pos;

        while i + 3 < buf.len() {
            if buf[i] == 0 && buf[i + 1] == 0 && buf[i + 2] == 1 {
                if i > start {
                    ranges.push(start..i);
                }
                start = i + 3;
                i += 3;
            } else if buf[i] == 0 && buf[i + 1] == 0 && buf[i + 2] == 0 && buf[i + 3] == 1 {
                if i > start {
                    ranges.push(start..i);
                }
                start = i + 4;
                i += 4;
            } else {
                i += 1;
            }
        }

        self.scan_pos = i - start;
        if start == 0 {
            return Vec::new();
        }

        let complete = self.buffer.split_to(start).freeze();
        ranges
            .into_iter()
            .map(|range| NalUnit::new(complete.slice(range)))
            .collect()
    }

    /// Bytes of the incomplete trailing unit.
    pub fn remainder(&self) -> &[u8] {
        &self.buffer
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drops all buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scan_pos = 0;
    }
}

/// Serializes units with a 4-byte start code before each.
pub fn to_annex_b(units: &[NalUnit]) -> Bytes {
    let total = units.iter().map(|u| START_CODE.len() + u.len()).sum();
    let mut out = BytesMut::with_capacity(total);
    for unit in units {
        out.extend_from_slice(&START_CODE);
        out.extend_from_slice(unit.as_bytes());
    }
    out.freeze()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn types(units: &[NalUnit]) -> Vec<u8> {
        units.iter().map(NalUnit::nal_type).collect()
    }

    #[test]
    fn test_mixed_start_codes() {
        let mut acc = NalAccumulator::new();
        let units = acc.push(&[
            0, 0, 0, 1, 0x67, 0x64, 0x00, 0x1f, // SPS
            0, 0, 0, 1, 0x68, 0xee, // PPS
            0, 0, 1, 0x09, 0xf0, // AUD
            0, 0, 1, 0x65, 0x88, 0x84, // IDR, incomplete
        ]);

        assert_eq!(types(&units), vec![7, 8, 9]);
        assert_eq!(units[0].as_bytes().as_ref(), &[0x67, 0x64, 0x00, 0x1f]);
        assert_eq!(acc.remainder(), &[0x65, 0x88, 0x84]);
    }

    #[test]
    fn test_unit_completed_by_next_chunk() {
        let mut acc = NalAccumulator::new();
        assert!(acc.push(&[0, 0, 0, 1, 0x41, 0x9a]).is_empty());
        assert!(acc.push(&[0x01, 0x02]).is_empty());

        let units = acc.push(&[0, 0, 0, 1, 0x41]);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].as_bytes().as_ref(), &[0x41, 0x9a, 0x01, 0x02]);
        assert!(units[0].is_slice());
        assert_eq!(acc.remainder(), &[0x41]);
    }

    #[test]
    fn test_start_code_split_across_chunks() {
        let mut acc = NalAccumulator::new();
        assert!(acc.push(&[0, 0, 1, 0x65, 0xaa, 0, 0]).is_empty());
        let units = acc.push(&[0, 1, 0x41, 0xbb]);

        assert_eq!(units.len(), 1);
        assert_eq!(units[0].as_bytes().as_ref(), &[0x65, 0xaa]);
        assert_eq!(acc.remainder(), &[0x41, 0xbb]);
    }

    #[test]
    fn test_chunk_ending_on_start_code_keeps_completed_unit() {
        let mut acc = NalAccumulator::new();
        let units = acc.push(&[0, 0, 0, 1, 0x65, 0xaa, 0xbb, 0, 0, 0, 1]);

        assert_eq!(units.len(), 1);
        assert_eq!(units[0].as_bytes().as_ref(), &[0x65, 0xaa, 0xbb]);
        assert!(acc.is_empty());

        let units = acc.push(&[0x41, 0xcc, 0, 0, 1, 0x41]);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].as_bytes().as_ref(), &[0x41, 0xcc]);
    }

    #[test]
    fn test_clear() {
        let mut acc = NalAccumulator::new();
        acc.push(&[0, 0, 1, 0x65, 0x01, 0x02, 0x03]);
        assert!(!acc.is_empty());

        acc.clear();
        assert!(acc.is_empty());
        let units = acc.push(&[0x41, 0x01, 0, 0, 1, 0x41]);
        assert_eq!(types(&units), vec![1]);
    }

    #[test]
    fn test_annex_b_serialization() {
        let units = vec![
            NalUnit::new(Bytes::from_static(&[0x67, 0x42])),
            NalUnit::new(Bytes::from_static(&[0x65, 0x88])),
        ];
        assert_eq!(
            to_annex_b(&units).as_ref(),
            &[0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x65, 0x88]
        );
    }

    /// Zero runs stay, but any `00 00 01` inside the body becomes `00 00 03`.
    fn without_start_codes(mut body: Vec<u8>) -> Vec<u8> {
        for i in 2..body.len() {
            if body[i] == 1 && body[i - 1] == 0 && body[i - 2] == 0 {
                body[i] = 3;
            }
        }
        body
    }

    fn unit_body() -> impl Strategy<Value = Vec<u8>> {
        let byte = prop_oneof![2 => Just(0u8), 1 => Just(1u8), 5 => any::<u8>()];
        prop::collection::vec(byte, 1..64).prop_map(without_start_codes)
    }

    #[test]
    fn test_zero_runs_inside_unit_are_kept() {
        let mut acc = NalAccumulator::new();
        let units = acc.push(&[
            0, 0, 0, 1, 0x65, 0, 0, 0, 0, 2, 0, 0, 3, 0x80, // emulation prevention
            0, 0, 1, 0x06, 0x05, 0, 0, // trailing zeros
            0, 0, 0, 1, 0x41,
        ]);

        assert_eq!(units.len(), 2);
        assert_eq!(
            units[0].as_bytes().as_ref(),
            &[0x65, 0, 0, 0, 0, 2, 0, 0, 3, 0x80]
        );
        assert_eq!(units[1].as_bytes().as_ref(), &[0x06, 0x05, 0, 0]);
        assert_eq!(acc.remainder(), &[0x41]);
    }

    proptest! {
        /// Splitting a stream anywhere never changes what is extracted.
        #[test]
        fn test_arbitrary_splits_reassemble(
            bodies in prop::collection::vec(unit_body(), 1..16),
            cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..8),
        ) {
            let stream: Vec<u8> = bodies
                .iter()
                .flat_map(|body| START_CODE.iter().chain(body.iter()).copied())
                .collect();

            let mut points: Vec<usize> = cuts.iter().map(|c| c.index(stream.len())).collect();
            points.push(0);
            points.push(stream.len());
            points.sort_unstable();
            points.dedup();

            let mut acc = NalAccumulator::new();
            let mut units = Vec::new();
            for window in points.windows(2) {
                units.extend(acc.push(&stream[window[0]..window[1]]));
            }

            prop_assert_eq!(units.len(), bodies.len() - 1);

            let mut rebuilt = to_annex_b(&units).to_vec();
            rebuilt.extend_from_slice(&START_CODE);
            rebuilt.extend_from_slice(acc.remainder());
            prop_assert_eq!(rebuilt, stream);
        }
    }
}
