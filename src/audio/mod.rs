//! Audio capture, chunking and PCM wire encoding.

pub mod chunk;
#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod pcm;
pub mod pipeline;
pub mod source;
