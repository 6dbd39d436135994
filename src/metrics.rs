//! Live session metrics.
//!
//! Counters accumulate for the lifetime of the engine instance; latency
//! samples are re-initialized on every connect so each session measures
//! its own first-response times.

/// Monotonic counters and latency samples for one engine instance.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LiveMetrics {
    /// Number of connection attempts that got past configuration checks.
    pub session_starts: u64,
    /// Number of sessions that ended in an error (timeout, transport,
    /// pipeline setup).
    pub session_errors: u64,
    /// Number of explicit `reconnect()` calls.
    pub reconnects: u64,
    /// Chunks handed to the transport by the pacer.
    pub chunks_sent: u64,
    /// Chunks evicted from the outbound queue under overflow.
    pub chunks_dropped: u64,
    /// Running average RMS of captured input blocks.
    pub avg_input_rms: f32,
    /// Elapsed ms from turn onset to the first scheduled audio payload.
    pub first_audio_latency_ms: Option<u64>,
    /// Elapsed ms from turn onset to the first output transcription text.
    pub first_text_latency_ms: Option<u64>,
    /// Most recent turn's onset-to-first-text round trip.
    pub last_round_trip_ms: Option<u64>,

    rms_samples: u64,
}

impl LiveMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one capture block's RMS into the running average using the
    /// stable incremental form `avg += (x - avg) / n`.
    pub fn record_input_rms(&mut self, rms: f32) {
        self.rms_samples += 1;
        self.avg_input_rms += (rms - self.avg_input_rms) / self.rms_samples as f32;
    }

    /// Re-initializes only the per-session latency samples. Counters and
    /// the input RMS average are untouched.
    pub fn reset_latency_for_connect(&mut self) {
        self.first_audio_latency_ms = None;
        self.first_text_latency_ms = None;
        self.last_round_trip_ms = None;
    }

    /// Number of RMS samples folded into the average so far.
    pub fn rms_sample_count(&self) -> u64 {
        self.rms_samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incremental_mean_matches_arithmetic_mean() {
        let mut metrics = LiveMetrics::new();
        let values = [0.1f32, 0.2, 0.4, 0.3];
        for v in values {
            metrics.record_input_rms(v);
        }

        let expected: f32 = values.iter().sum::<f32>() / values.len() as f32;
        assert!((metrics.avg_input_rms - expected).abs() < 1e-6);
        assert_eq!(metrics.rms_sample_count(), 4);
    }

    #[test]
    fn test_first_sample_is_the_average() {
        let mut metrics = LiveMetrics::new();
        metrics.record_input_rms(0.25);
        assert!((metrics.avg_input_rms - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_reset_latency_keeps_counters() {
        let mut metrics = LiveMetrics::new();
        metrics.session_starts = 3;
        metrics.chunks_sent = 42;
        metrics.record_input_rms(0.1);
        metrics.first_audio_latency_ms = Some(230);
        metrics.first_text_latency_ms = Some(310);
        metrics.last_round_trip_ms = Some(310);

        metrics.reset_latency_for_connect();

        assert_eq!(metrics.session_starts, 3);
        assert_eq!(metrics.chunks_sent, 42);
        assert_eq!(metrics.rms_sample_count(), 1);
        assert!(metrics.first_audio_latency_ms.is_none());
        assert!(metrics.first_text_latency_ms.is_none());
        assert!(metrics.last_round_trip_ms.is_none());
    }
}
