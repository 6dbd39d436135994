//! Gapless playback scheduling.
//!
//! Decoded payloads arrive in stream order but with arbitrary decode
//! latency. A virtual clock re-imposes strict output ordering: each
//! buffer starts at `max(virtual_clock, sink.current_time())` and the
//! clock advances by the buffer's duration, so consecutive buffers
//! neither overlap nor leave avoidable gaps.

use crate::audio::pcm;
use crate::engine::sink::{AudioSink, SourceId};
use crate::error::Result;
use std::collections::HashSet;

/// Schedules decoded audio on a sink with a monotonic virtual clock.
pub struct PlaybackScheduler {
    sink: Box<dyn AudioSink>,
    sample_rate: u32,
    virtual_clock: f64,
    active: HashSet<SourceId>,
}

impl PlaybackScheduler {
    pub fn new(sink: Box<dyn AudioSink>, sample_rate: u32) -> Self {
        Self {
            sink,
            sample_rate,
            virtual_clock: 0.0,
            active: HashSet::new(),
        }
    }

    /// Schedules one decoded payload for sequential playback.
    ///
    /// Returns the start time assigned to the buffer.
    pub fn schedule(&mut self, samples: Vec<f32>) -> Result<f64> {
        self.virtual_clock = self.virtual_clock.max(self.sink.current_time());
        let start = self.virtual_clock;
        let duration = pcm::duration_secs(&samples, self.sample_rate);

        let id = self.sink.schedule(samples, start)?;
        self.active.insert(id);
        self.virtual_clock += duration;
        Ok(start)
    }

    /// Removes a naturally-completed source from the live set.
    ///
    /// Returns true when this was the last active source (the model's
    /// turn has fully played out).
    pub fn handle_ended(&mut self, id: SourceId) -> bool {
        self.active.remove(&id);
        self.active.is_empty()
    }

    /// Hard interruption: force-stop everything and rewind the clock.
    ///
    /// Stopping an already-finished source is swallowed by the sink.
    pub fn interrupt(&mut self) {
        for id in self.active.drain() {
            self.sink.stop(id);
        }
        self.virtual_clock = 0.0;
    }

    /// Teardown path: stop all sources, rewind the clock, close the sink.
    pub fn shutdown(&mut self) {
        self.interrupt();
        self.sink.close();
    }

    /// True while any scheduled source has not completed.
    pub fn is_playing(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn virtual_clock(&self) -> f64 {
        self.virtual_clock
    }

    /// The underlying sink, for inspection in tests.
    pub fn sink(&self) -> &dyn AudioSink {
        self.sink.as_ref()
    }
}
