//! Decoder configuration from H.264 parameter sets.

use bytes::{BufMut, Bytes, BytesMut};

/// Errors deriving a decoder configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// SPS lacks the profile/compatibility/level bytes
    #[error("SPS too short ({len} bytes)")]
    SpsTooShort { len: usize },

    /// Parameter set length does not fit the 16-bit length field
    #[error("parameter set too large ({len} bytes)")]
    ParameterSetTooLarge { len: usize },
}

/// Codec string and avcC description for a video decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoDecoderConfig {
    /// `avc1.PPCCLL`
    pub codec: String,
    /// AVCDecoderConfigurationRecord
    pub description: Bytes,
}

/// Builds the decoder configuration from one SPS and one PPS (both without
/// start codes).
///
/// # Errors
///
/// - `ConfigError::SpsTooShort` - SPS shorter than 4 bytes
/// - `ConfigError::ParameterSetTooLarge` - SPS or PPS longer than 65535 bytes
pub fn derive_decoder_config(sps: &[u8], pps: &[u8]) -> Result<VideoDecoderConfig, ConfigError> {
    if sps.len() < 4 {
        return Err(ConfigError::SpsTooShort { len: sps.len() });
    }
    let sps_len = u16::try_from(sps.len())
        .map_err(|_| ConfigError::ParameterSetTooLarge { len: sps.len() })?;
    let pps_len = u16::try_from(pps.len())
        .map_err(|_| ConfigError::ParameterSetTooLarge { len: pps.len() })?;

    // profile_idc, constraint flags, level_idc
    let profile = &sps[1..4];

    let mut record = BytesMut::with_capacity(11 + sps.len() + pps.len());
    record.put_u8(1); // configurationVersion
    record.put_slice(profile);
    record.put_u8(0xFF); // 4-byte NAL length size
    record.put_u8(0xE1); // one SPS
    record.put_u16(sps_len);
    record.put_slice(sps);
    record.put_u8(1); // one PPS
    record.put_u16(pps_len);
    record.put_slice(pps);

    Ok(VideoDecoderConfig {
        codec: format!("avc1.{}", hex::encode(profile)),
        description: record.freeze(),
    })
}
