//! Server-side streaming sessions.
//!
//! A session is one client connection: probe the source, start the
//! transcoders, relay their output, and restart them on seek.

pub mod coordinator;
pub mod runner;
pub mod source;

use uuid::Uuid;

pub use coordinator::{SeekCoordinator, SeekState};
pub use runner::{SessionContext, run_connection};
pub use source::{ConnectionParams, SourceError, StreamSource};

use crate::probe::ProbeError;
use crate::transcode::TranscodeError;

/// Unique identifier for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reasons a session ended abnormally. The client has already been told.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid request: {0}")]
    InvalidSource(#[from] SourceError),

    #[error("Failed to get media info: {0}")]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Transcode(#[from] TranscodeError),
}

impl SessionError {
    /// Close code sent to the client for this failure.
    pub fn close_code(&self) -> u16 {
        match self {
            SessionError::InvalidSource(_) | SessionError::Probe(_) => {
                crate::relay::CLOSE_POLICY_VIOLATION
            }
            SessionError::Transcode(_) => crate::relay::CLOSE_INTERNAL_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::StreamKind;
    use crate::relay::{CLOSE_INTERNAL_ERROR, CLOSE_POLICY_VIOLATION};

    #[test]
    fn test_close_codes_by_failure() {
        assert_eq!(
            SessionError::from(SourceError::Missing).close_code(),
            CLOSE_POLICY_VIOLATION
        );
        assert_eq!(
            SessionError::from(ProbeError::NoStreams).close_code(),
            CLOSE_POLICY_VIOLATION
        );
        let failed = SessionError::from(TranscodeError::ProcessFailed {
            kind: StreamKind::Audio,
            code: Some(1),
        });
        assert_eq!(failed.close_code(), CLOSE_INTERNAL_ERROR);
    }
}
