//! Default configuration constants for charla.
//!
//! This module provides shared constants used across different configuration
//! types to ensure consistency and eliminate duplication.

/// Default input (microphone) sample rate in Hz.
///
/// 16kHz is the standard rate for speech models and keeps outbound
/// bandwidth low while preserving voice intelligibility.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Default output (playback) sample rate in Hz.
///
/// Conversational speech models commonly synthesize at 24kHz.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Default capture block size in samples.
///
/// 2048 samples at 16kHz is 128ms per block, large enough to amortize
/// per-block overhead and small enough for responsive volume feedback.
pub const CAPTURE_BLOCK_SIZE: usize = 2048;

/// Default outbound queue capacity in chunks.
///
/// When capture outpaces the paced sender, the oldest unsent chunk is
/// dropped. Six blocks (~768ms) of backlog is the point past which stale
/// audio is worse than a gap.
pub const MAX_PENDING_CHUNKS: usize = 6;

/// Default interval between paced chunk sends, in milliseconds.
pub const CHUNK_SEND_INTERVAL_MS: u64 = 40;

/// Default deadline for the remote session to open, in milliseconds.
pub const CONNECT_TIMEOUT_MS: u64 = 12_000;

/// RMS threshold for detecting the start of a user turn.
///
/// Tuned for typical microphone input levels; the first capture block
/// above this level timestamps the turn onset for latency metrics.
pub const VAD_ONSET_THRESHOLD: f32 = 0.02;

/// Multiplier mapping RMS loudness to the bounded visual volume signal.
///
/// `volume = min(1, rms * VOLUME_SCALE)`.
pub const VOLUME_SCALE: f32 = 5.0;

/// Maximum characters of the first user message used as a conversation title.
pub const TITLE_MAX_CHARS: usize = 48;

/// Title used for a conversation with no user message yet.
pub const UNTITLED_CONVERSATION: &str = "New chat";

/// Environment variable holding the API key for the remote service.
pub const API_KEY_ENV: &str = "CHARLA_API_KEY";
