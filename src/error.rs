//! Error types for charla.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CharlaError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("API key not configured")]
    MissingApiKey,

    // Audio capture errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Microphone access failed: {message}")]
    CapturePermission { message: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    // Playback errors
    #[error("Audio playback failed: {message}")]
    Playback { message: String },

    #[error("Invalid audio payload: {message}")]
    AudioPayload { message: String },

    // Session errors
    #[error("Timed out waiting for the live session to open")]
    ConnectTimeout,

    #[error("Live session error: {message}")]
    Session { message: String },

    #[error("Transport error: {message}")]
    Transport { message: String },

    // Transcript errors
    #[error("Transcript store error: {message}")]
    TranscriptStore { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, CharlaError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_missing_api_key_display() {
        assert_eq!(
            CharlaError::MissingApiKey.to_string(),
            "API key not configured"
        );
    }

    #[test]
    fn test_capture_permission_display() {
        let error = CharlaError::CapturePermission {
            message: "access denied".to_string(),
        };
        assert_eq!(error.to_string(), "Microphone access failed: access denied");
    }

    #[test]
    fn test_connect_timeout_display() {
        assert_eq!(
            CharlaError::ConnectTimeout.to_string(),
            "Timed out waiting for the live session to open"
        );
    }

    #[test]
    fn test_audio_payload_display() {
        let error = CharlaError::AudioPayload {
            message: "truncated base64".to_string(),
        };
        assert_eq!(error.to_string(), "Invalid audio payload: truncated base64");
    }

    #[test]
    fn test_transport_display() {
        let error = CharlaError::Transport {
            message: "stream reset".to_string(),
        };
        assert_eq!(error.to_string(), "Transport error: stream reset");
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: CharlaError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("a = b = c").unwrap_err();
        let error: CharlaError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<CharlaError>();
        assert_sync::<CharlaError>();
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_result() -> Result<i32> {
            Ok(7)
        }
        assert_eq!(returns_result().unwrap(), 7);
    }
}
