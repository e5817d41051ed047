//! Connection parameters and source selection.

use serde::Deserialize;
use url::Url;

use crate::transcode::TranscodeInput;

/// Errors rejecting connection parameters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// Neither `mode=upload` nor `src` given
    #[error("src or mode not specified")]
    Missing,

    /// `src` does not parse as an absolute URL
    #[error("invalid src url {src:?}: {reason}")]
    InvalidUrl { src: String, reason: String },

    /// `src` uses a scheme other than http or https
    #[error("unsupported src scheme {scheme:?}")]
    UnsupportedScheme { scheme: String },
}

/// Query parameters supplied when the channel is opened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConnectionParams {
    pub mode: Option<String>,
    pub src: Option<String>,
}

/// Where a session's media comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSource {
    /// Client uploads the media over the channel itself
    Upload,
    /// Transcoder fetches the media
    Url(Url),
}

impl StreamSource {
    /// Resolves the connection parameters.
    ///
    /// `mode=upload` wins over `src`.
    ///
    /// # Errors
    ///
    /// - `SourceError::Missing` - No usable parameter
    /// - `SourceError::InvalidUrl` - `src` is not a URL
    /// - `SourceError::UnsupportedScheme` - `src` is not http(s)
    pub fn from_params(params: &ConnectionParams) -> Result<Self, SourceError> {
        if params.mode.as_deref() == Some("upload") {
            return Ok(StreamSource::Upload);
        }

        let src = params
            .src
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or(SourceError::Missing)?;

        let url = Url::parse(src.trim()).map_err(|e| SourceError::InvalidUrl {
            src: src.to_string(),
            reason: e.to_string(),
        })?;

        match url.scheme() {
            "http" | "https" => Ok(StreamSource::Url(url)),
            scheme => Err(SourceError::UnsupportedScheme {
                scheme: scheme.to_string(),
            }),
        }
    }

    pub fn is_upload(&self) -> bool {
        matches!(self, StreamSource::Upload)
    }

    /// Transcoder input for this source.
    pub fn transcode_input(&self) -> TranscodeInput {
        match self {
            StreamSource::Upload => TranscodeInput::Stdin,
            StreamSource::Url(url) => TranscodeInput::Url(url.to_string()),
        }
    }
}
