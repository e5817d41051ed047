//! JSON control messages carried as text frames.

use serde::{Deserialize, Serialize};

use crate::media::AudioConfig;

/// Errors parsing a control message. Never fatal to a session.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// Text frame is not a known control message
    #[error("Malformed control message: {reason}")]
    Malformed { reason: String },

    /// Seek target is negative or not finite
    #[error("Invalid seek time: {time}")]
    InvalidSeek { time: f64 },
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerControl {
    /// Discard all decoder and reassembly state; a new pipeline follows
    Reset,
    /// Audio decoder parameters for the upcoming audio packets
    AudioConfig { config: AudioConfig },
    /// Terminal error description, followed by a channel close
    Error { message: String },
    /// Source exhausted
    Eof,
}

impl ServerControl {
    /// Serializes to the JSON text carried on the wire.
    pub fn to_json(&self) -> String {
        // Infallible: every field is a string or a number.
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"error"}"#.to_string())
    }

    /// Parses a text frame received by the client.
    ///
    /// # Errors
    ///
    /// - `ControlError::Malformed` - Not JSON, or an unknown `type`
    pub fn parse(text: &str) -> Result<Self, ControlError> {
        serde_json::from_str(text).map_err(|e| ControlError::Malformed {
            reason: e.to_string(),
        })
    }
}

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientControl {
    /// Restart the pipeline at `time` seconds
    Seek { time: f64 },
    /// Upload finished; close transcoder input
    Eof,
}

impl ClientControl {
    /// Serializes to the JSON text carried on the wire.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"eof"}"#.to_string())
    }

    /// Parses a text frame received by the server.
    ///
    /// # Errors
    ///
    /// - `ControlError::Malformed` - Not JSON, or an unknown `type`
    /// - `ControlError::InvalidSeek` - Negative or non-finite seek target
    pub fn parse(text: &str) -> Result<Self, ControlError> {
        let message: Self = serde_json::from_str(text).map_err(|e| ControlError::Malformed {
            reason: e.to_string(),
        })?;

        if let ClientControl::Seek { time } = message {
            if !time.is_finite() || time < 0.0 {
                return Err(ControlError::InvalidSeek { time });
            }
        }

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_messages_match_wire_format() {
        assert_eq!(ServerControl::Reset.to_json(), r#"{"type":"reset"}"#);

        let config = ServerControl::AudioConfig {
            config: AudioConfig {
                codec: "mp4a.40.2".to_string(),
                sample_rate: 48_000,
                number_of_channels: 2,
            },
        };
        let value: serde_json::Value = serde_json::from_str(&config.to_json()).unwrap();
        assert_eq!(value["type"], "audio-config");
        assert_eq!(value["config"]["codec"], "mp4a.40.2");
        assert_eq!(value["config"]["sampleRate"], 48_000);
        assert_eq!(value["config"]["numberOfChannels"], 2);

        let error = ServerControl::Error {
            message: "Video stream error (code: 1)".to_string(),
        };
        assert_eq!(ServerControl::parse(&error.to_json()).unwrap(), error);
    }

    #[test]
    fn test_client_seek_parsing() {
        assert_eq!(
            ClientControl::parse(r#"{"type":"seek","time":12.5}"#).unwrap(),
            ClientControl::Seek { time: 12.5 }
        );
        assert_eq!(
            ClientControl::parse(r#"{"type":"seek","time":30}"#).unwrap(),
            ClientControl::Seek { time: 30.0 }
        );
        assert_eq!(
            ClientControl::parse(r#"{"type":"eof"}"#).unwrap(),
            ClientControl::Eof
        );
    }

    #[test]
    fn test_malformed_client_messages() {
        assert!(matches!(
            ClientControl::parse("not json"),
            Err(ControlError::Malformed { .. })
        ));
        assert!(matches!(
            ClientControl::parse(r#"{"type":"seek","time":"soon"}"#),
            Err(ControlError::Malformed { .. })
        ));
        assert!(matches!(
            ClientControl::parse(r#"{"type":"pause"}"#),
            Err(ControlError::Malformed { .. })
        ));
        assert!(matches!(
            ClientControl::parse(r#"{"type":"seek","time":-1}"#),
            Err(ControlError::InvalidSeek { .. })
        ));
    }
}
