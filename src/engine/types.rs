//! Engine state types shared with embedders.

use crate::engine::transcript::TranscriptItem;
use crate::metrics::LiveMetrics;
use serde::{Deserialize, Serialize};

/// Coarse connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Fine-grained sub-state, advisory only.
///
/// Phases exist for observability; no transition logic depends on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Idle,
    InitializingAudio,
    RequestingMic,
    WaitingLiveSession,
    ConnectedIdle,
    CapturingAudio,
    WaitingModel,
    PlayingAudio,
    Interrupted,
    Disconnected,
    Closed,
    Timeout,
    Error,
    SetupError,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::InitializingAudio => "initializing-audio",
            Phase::RequestingMic => "requesting-mic",
            Phase::WaitingLiveSession => "waiting-live-session",
            Phase::ConnectedIdle => "connected-idle",
            Phase::CapturingAudio => "capturing-audio",
            Phase::WaitingModel => "waiting-model",
            Phase::PlayingAudio => "playing-audio",
            Phase::Interrupted => "interrupted",
            Phase::Disconnected => "disconnected",
            Phase::Closed => "closed",
            Phase::Timeout => "timeout",
            Phase::Error => "error",
            Phase::SetupError => "setup-error",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read surface the UI consumes; published after every engine step.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSnapshot {
    pub connection_state: ConnectionState,
    pub phase: Phase,
    pub volume: f32,
    pub error: Option<String>,
    pub messages: Vec<TranscriptItem>,
    pub metrics: LiveMetrics,
}

impl Default for EngineSnapshot {
    fn default() -> Self {
        Self {
            connection_state: ConnectionState::Disconnected,
            phase: Phase::Idle,
            volume: 0.0,
            error: None,
            messages: Vec::new(),
            metrics: LiveMetrics::default(),
        }
    }
}

/// Control operations accepted by the engine task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect,
    Disconnect,
    Reconnect,
    SendText(String),
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_strings() {
        assert_eq!(Phase::ConnectedIdle.as_str(), "connected-idle");
        assert_eq!(Phase::WaitingLiveSession.to_string(), "waiting-live-session");
        assert_eq!(Phase::SetupError.as_str(), "setup-error");
    }

    #[test]
    fn test_connection_state_serde() {
        let json = serde_json::to_string(&ConnectionState::Disconnected).unwrap();
        assert_eq!(json, "\"disconnected\"");
    }

    #[test]
    fn test_default_snapshot_is_idle() {
        let snapshot = EngineSnapshot::default();
        assert_eq!(snapshot.connection_state, ConnectionState::Disconnected);
        assert_eq!(snapshot.phase, Phase::Idle);
        assert_eq!(snapshot.volume, 0.0);
        assert!(snapshot.error.is_none());
        assert!(snapshot.messages.is_empty());
    }
}
