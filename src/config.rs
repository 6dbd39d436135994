use crate::defaults;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// API key for the remote service. Usually supplied via the
    /// `CHARLA_API_KEY` environment variable rather than the file.
    pub api_key: Option<String>,
    pub session: SessionConfig,
    pub audio: AudioConfig,
    pub engine: EngineConfig,
}

/// Remote session configuration, snapshotted at connect time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub model: String,
    pub system_instruction: String,
    pub voice_name: String,
    pub use_search: bool,
}

/// Audio capture and playback configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub device: Option<String>,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub block_size: usize,
    pub vad_onset_threshold: f32,
}

/// Engine pacing, queueing and lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub queue_capacity: usize,
    pub send_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub history: HistoryPolicy,
}

/// What happens to the transcript log when a new session opens.
///
/// `connect()` honors this policy; `reconnect()` always preserves the log
/// so the conversation continues across the reconnection boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum HistoryPolicy {
    /// Start every fresh connection with an empty transcript.
    #[default]
    ClearOnConnect,
    /// Keep existing transcript items across fresh connections too.
    Preserve,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: "live-audio-dialog".to_string(),
            system_instruction: String::new(),
            voice_name: "Puck".to_string(),
            use_search: false,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            input_sample_rate: defaults::INPUT_SAMPLE_RATE,
            output_sample_rate: defaults::OUTPUT_SAMPLE_RATE,
            block_size: defaults::CAPTURE_BLOCK_SIZE,
            vad_onset_threshold: defaults::VAD_ONSET_THRESHOLD,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: defaults::MAX_PENDING_CHUNKS,
            send_interval_ms: defaults::CHUNK_SEND_INTERVAL_MS,
            connect_timeout_ms: defaults::CONNECT_TIMEOUT_MS,
            history: HistoryPolicy::ClearOnConnect,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file, or return defaults if the file is
    /// missing. Invalid TOML falls back to defaults with a warning rather
    /// than taking the engine down.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                if e.downcast_ref::<std::io::Error>()
                    .map(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
                    .unwrap_or(false)
                {
                    Self::default()
                } else {
                    tracing::warn!("Ignoring invalid config at {}: {}", path.display(), e);
                    Self::default()
                }
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - CHARLA_API_KEY → api_key
    /// - CHARLA_MODEL → session.model
    /// - CHARLA_VOICE → session.voice_name
    /// - CHARLA_AUDIO_DEVICE → audio.device
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var(defaults::API_KEY_ENV) {
            if !key.is_empty() {
                self.api_key = Some(key);
            }
        }

        if let Ok(model) = std::env::var("CHARLA_MODEL") {
            if !model.is_empty() {
                self.session.model = model;
            }
        }

        if let Ok(voice) = std::env::var("CHARLA_VOICE") {
            if !voice.is_empty() {
                self.session.voice_name = voice;
            }
        }

        if let Ok(device) = std::env::var("CHARLA_AUDIO_DEVICE") {
            if !device.is_empty() {
                self.audio.device = Some(device);
            }
        }

        self
    }

    /// True when a usable API key is present.
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.audio.input_sample_rate, 16000);
        assert_eq!(config.audio.output_sample_rate, 24000);
        assert_eq!(config.engine.queue_capacity, 6);
        assert_eq!(config.engine.send_interval_ms, 40);
        assert_eq!(config.engine.connect_timeout_ms, 12000);
        assert_eq!(config.engine.history, HistoryPolicy::ClearOnConnect);
        assert!(config.api_key.is_none());
        assert!(!config.session.use_search);
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[session]\nmodel = \"dialog-preview\"\nvoice_name = \"Kore\""
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.session.model, "dialog-preview");
        assert_eq!(config.session.voice_name, "Kore");
        // Untouched tables keep their defaults
        assert_eq!(config.audio.block_size, 2048);
        assert_eq!(config.engine.queue_capacity, 6);
    }

    #[test]
    fn test_load_history_policy() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[engine]\nhistory = \"preserve\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.engine.history, HistoryPolicy::Preserve);
    }

    #[test]
    fn test_load_missing_file_errors() {
        let result = Config::load(Path::new("/nonexistent/charla.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = Config::load_or_default(Path::new("/nonexistent/charla.toml"));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_or_default_invalid_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not = valid = toml").unwrap();

        let config = Config::load_or_default(file.path());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_round_trip() {
        let mut config = Config::default();
        config.session.system_instruction = "Answer briefly.".to_string();
        config.engine.history = HistoryPolicy::Preserve;

        let serialized = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_has_api_key() {
        let mut config = Config::default();
        assert!(!config.has_api_key());

        config.api_key = Some(String::new());
        assert!(!config.has_api_key());

        config.api_key = Some("k-123".to_string());
        assert!(config.has_api_key());
    }
}
