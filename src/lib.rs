//! charla - Realtime bidirectional voice-session engine
//!
//! Streams microphone audio to a conversational speech model, plays back
//! synthesized audio gaplessly, and reconciles streaming transcription
//! fragments into a stable message log. Rendering, persistence and the
//! vendor wire protocol are collaborators behind traits.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod config;
pub mod defaults;
pub mod engine;
pub mod error;
pub mod live;
pub mod metrics;
#[cfg(feature = "search")]
pub mod search;

// Core seams (capture → engine → playback/transcript)
pub use audio::source::{CaptureProvider, CaptureSource};
pub use engine::sink::{AudioSink, SinkProvider};
pub use engine::transcript::TranscriptStore;
pub use live::session::{LiveConnector, LiveSession};

// Engine surface
pub use engine::runner::EngineHandle;
pub use engine::session::SessionEngine;
pub use engine::types::{Command, ConnectionState, EngineSnapshot, Phase};

// Error handling
pub use error::{CharlaError, Result};

// Config
pub use config::{Config, HistoryPolicy};

// Data model
pub use engine::transcript::{Conversation, ConversationLog, ItemStatus, Role, TranscriptItem};
pub use live::message::{ServerEvent, ServerMessage, SourceRef};
pub use metrics::LiveMetrics;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
