//! Undertow Core - Low-latency media relay
//!
//! Server side: codec detection, transcoder supervision and the relay
//! protocol that frames transcoder output for the client. Client side: the
//! playback engine that reassembles the relayed byte streams into units a
//! platform decoder accepts.

pub mod client;
pub mod config;
pub mod media;
pub mod probe;
pub mod relay;
pub mod session;
pub mod tools;
pub mod tracing_setup;
pub mod transcode;

// Re-export main types for convenient access
pub use config::UndertowConfig;
pub use media::{AudioConfig, CodecInfo, StreamKind};
pub use probe::ProbeError;
pub use session::{SessionContext, SessionError, run_connection};
pub use tools::{FfmpegTools, MediaTools, ToolError};
pub use transcode::TranscodeError;

/// Errors that can bubble up from any Undertow subsystem.
#[derive(Debug, thiserror::Error)]
pub enum UndertowError {
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),

    #[error("Transcode error: {0}")]
    Transcode(#[from] TranscodeError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UndertowError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            UndertowError::Tool(ToolError::NotFound { tool, path, .. }) => {
                format!("{tool} not found at {}", path.display())
            }
            UndertowError::Tool(_) => "Media tools are not working".to_string(),
            UndertowError::Probe(ProbeError::NoStreams) => {
                "Source has no audio or video stream".to_string()
            }
            UndertowError::Probe(ProbeError::Timeout { .. }) => {
                "Timed out detecting the source format".to_string()
            }
            UndertowError::Probe(_) => "Could not read the source".to_string(),
            UndertowError::Transcode(e) => e.to_string(),
            UndertowError::Session(e) => e.to_string(),
            UndertowError::Configuration { reason } => format!("Invalid configuration: {reason}"),
            UndertowError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            UndertowError::Configuration { .. }
                | UndertowError::Session(SessionError::InvalidSource(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, UndertowError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SourceError;

    #[test]
    fn test_user_errors() {
        let invalid = UndertowError::from(SessionError::from(SourceError::Missing));
        assert!(invalid.is_user_error());
        assert_eq!(
            invalid.user_message(),
            "Invalid request: src or mode not specified"
        );

        let timeout = UndertowError::from(ProbeError::Timeout {
            after: std::time::Duration::from_secs(15),
        });
        assert!(!timeout.is_user_error());
        assert_eq!(
            timeout.user_message(),
            "Timed out detecting the source format"
        );
    }
}
