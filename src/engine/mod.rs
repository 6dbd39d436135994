//! The realtime session engine.
//!
//! `SessionEngine` owns the session state machine and every mutable piece
//! of session state; `EngineHandle` drives it on a single tokio task and
//! exposes the command/snapshot surface consumed by UIs.

pub mod playback;
pub mod queue;
pub mod runner;
pub mod session;
pub mod sink;
pub mod transcript;
pub mod types;
