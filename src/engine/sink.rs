//! Pluggable playback output.
//!
//! Pairs with `CaptureSource` for input — this is where scheduled audio
//! leaves the engine. The sink models an output audio context: a clock in
//! seconds and buffer sources that can be scheduled and force-stopped.

use crate::error::Result;

/// Identifier for one scheduled playback source.
pub type SourceId = u64;

/// Pluggable playback target for the scheduler.
pub trait AudioSink: Send {
    /// Current playback clock in seconds. Monotonic while the sink is open.
    fn current_time(&self) -> f64;

    /// Schedule a decoded buffer to start at `start` seconds on the clock.
    ///
    /// Returns an id used for stop/completion tracking.
    fn schedule(&mut self, samples: Vec<f32>, start: f64) -> Result<SourceId>;

    /// Force-stop a scheduled source. Stopping a source that already
    /// finished is a no-op, never an error.
    fn stop(&mut self, id: SourceId);

    /// Release the output device. Closing twice is a no-op.
    fn close(&mut self);

    /// Name for logging/debugging.
    fn name(&self) -> &'static str {
        "sink"
    }
}

/// Provider abstraction for acquiring an output sink at connect time.
pub trait SinkProvider: Send + Sync {
    fn open(&self, sample_rate: u32) -> Result<Box<dyn AudioSink>>;
}

/// A source recorded by the collector sink.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledSource {
    pub id: SourceId,
    pub start: f64,
    pub duration: f64,
    pub stopped: bool,
}

/// In-memory sink that records every scheduled source.
///
/// Used by tests and as the reference implementation for embedders: a
/// real device sink maps `schedule` onto its output stream the same way.
pub struct CollectorSink {
    sample_rate: u32,
    now: f64,
    next_id: SourceId,
    sources: Vec<ScheduledSource>,
    closed: bool,
}

impl CollectorSink {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            now: 0.0,
            next_id: 1,
            sources: Vec::new(),
            closed: false,
        }
    }

    /// Advance the playback clock (tests drive time manually).
    pub fn advance(&mut self, seconds: f64) {
        self.now += seconds;
    }

    /// All sources ever scheduled, in schedule order.
    pub fn sources(&self) -> &[ScheduledSource] {
        &self.sources
    }

    /// Ids of sources not yet stopped.
    pub fn active_ids(&self) -> Vec<SourceId> {
        self.sources
            .iter()
            .filter(|s| !s.stopped)
            .map(|s| s.id)
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl AudioSink for CollectorSink {
    fn current_time(&self) -> f64 {
        self.now
    }

    fn schedule(&mut self, samples: Vec<f32>, start: f64) -> Result<SourceId> {
        let id = self.next_id;
        self.next_id += 1;
        self.sources.push(ScheduledSource {
            id,
            start,
            duration: samples.len() as f64 / self.sample_rate as f64,
            stopped: false,
        });
        Ok(id)
    }

    fn stop(&mut self, id: SourceId) {
        if let Some(source) = self.sources.iter_mut().find(|s| s.id == id) {
            source.stopped = true;
        }
        // Unknown ids are sources that already finished: ignore.
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn name(&self) -> &'static str {
        "collector"
    }
}

/// Provider handing out fresh collector sinks.
#[derive(Default)]
pub struct CollectorSinkProvider;

impl SinkProvider for CollectorSinkProvider {
    fn open(&self, sample_rate: u32) -> Result<Box<dyn AudioSink>> {
        Ok(Box::new(CollectorSink::new(sample_rate)))
    }
}
