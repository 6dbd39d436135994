//! Input capture pipeline.
//!
//! Wraps a capture source and provides:
//! - Continuous capture on a dedicated thread
//! - Accumulation into fixed-size blocks with per-block RMS
//! - Decoupling from the paced network send cadence

use crate::audio::chunk::calculate_rms;
use crate::audio::source::CaptureSource;
use crate::error::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;

/// One block of captured audio delivered to the engine task.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureFrame {
    /// Normalized samples, exactly `block_size` long.
    pub samples: Vec<f32>,
    /// RMS loudness of the block.
    pub rms: f32,
}

/// Configuration for the capture pipeline.
#[derive(Debug, Clone)]
pub struct CapturePipelineConfig {
    /// Samples per emitted frame.
    pub block_size: usize,
    /// Channel buffer size (number of frames to buffer).
    pub channel_buffer_size: usize,
    /// Polling interval when no samples are available (ms).
    pub poll_interval_ms: u64,
}

impl Default for CapturePipelineConfig {
    fn default() -> Self {
        Self {
            block_size: crate::defaults::CAPTURE_BLOCK_SIZE,
            channel_buffer_size: 64,
            poll_interval_ms: 10,
        }
    }
}

/// Capture pipeline that continuously reads a source and emits frames.
pub struct CapturePipeline {
    source: Box<dyn CaptureSource>,
    config: CapturePipelineConfig,
    running: Arc<AtomicBool>,
}

impl CapturePipeline {
    /// Creates a pipeline around the given source with default configuration.
    pub fn new(source: Box<dyn CaptureSource>) -> Self {
        Self::with_config(source, CapturePipelineConfig::default())
    }

    /// Creates a pipeline with custom configuration.
    pub fn with_config(source: Box<dyn CaptureSource>, config: CapturePipelineConfig) -> Self {
        Self {
            source,
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Starts capture on a background thread.
    ///
    /// Returns a receiver for capture frames and a stop handle. The thread
    /// runs until the handle is stopped, the receiver is dropped, or the
    /// source reports an error.
    pub fn start(mut self) -> Result<(mpsc::Receiver<CaptureFrame>, CapturePipelineHandle)> {
        let (tx, rx) = mpsc::channel(self.config.channel_buffer_size);
        let running = self.running.clone();

        self.source.start()?;
        running.store(true, Ordering::SeqCst);

        let block_size = self.config.block_size;
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        thread::spawn(move || {
            let mut pending: Vec<f32> = Vec::with_capacity(block_size * 2);

            while running.load(Ordering::SeqCst) {
                match self.source.read_samples() {
                    Ok(samples) if !samples.is_empty() => {
                        pending.extend_from_slice(&samples);

                        while pending.len() >= block_size {
                            let block: Vec<f32> = pending.drain(..block_size).collect();
                            let rms = calculate_rms(&block);
                            let frame = CaptureFrame {
                                samples: block,
                                rms,
                            };

                            // Receiver dropped means the engine tore down
                            if tx.blocking_send(frame).is_err() {
                                running.store(false, Ordering::SeqCst);
                                break;
                            }
                        }
                    }
                    Ok(_) => {
                        thread::sleep(poll_interval);
                    }
                    Err(e) => {
                        tracing::warn!("capture read failed, stopping pipeline: {}", e);
                        break;
                    }
                }
            }

            if let Err(e) = self.source.stop() {
                tracing::debug!("capture source stop after shutdown: {}", e);
            }
        });

        let handle = CapturePipelineHandle {
            running: self.running.clone(),
        };

        Ok((rx, handle))
    }
}

/// Handle to control a running capture pipeline.
#[derive(Clone)]
pub struct CapturePipelineHandle {
    running: Arc<AtomicBool>,
}

impl CapturePipelineHandle {
    /// Stops the capture thread. Safe to call more than once.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Returns true if the pipeline is still running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
