//! Remote streaming session collaborator.
//!
//! The vendor protocol is opaque to the engine: it sees a connector that
//! opens sessions, a session handle that accepts outbound chunks and
//! text, and an ordered stream of server events.

pub mod message;
pub mod session;
