use crate::error::{CharlaError, Result};

/// Trait for microphone-style capture devices.
///
/// This trait allows swapping implementations (real audio device vs mock).
pub trait CaptureSource: Send {
    /// Start capturing audio from the source.
    fn start(&mut self) -> Result<()>;

    /// Stop capturing audio from the source.
    fn stop(&mut self) -> Result<()>;

    /// Read whatever samples have accumulated since the last read.
    ///
    /// Returns normalized f32 samples at the configured sample rate.
    /// An empty vector means no new samples yet.
    fn read_samples(&mut self) -> Result<Vec<f32>>;
}

/// Trait for acquiring a capture device at connect time.
///
/// Acquisition is the permission step: a denied microphone or a missing
/// device surfaces here and is a terminal connect error.
pub trait CaptureProvider: Send + Sync {
    /// Open a capture source at the given sample rate.
    fn open(&self, sample_rate: u32) -> Result<Box<dyn CaptureSource>>;
}

/// Mock capture source for testing
pub struct MockCaptureSource {
    is_started: bool,
    samples: Vec<f32>,
    should_fail_start: bool,
    should_fail_read: bool,
    error_message: String,
}

impl MockCaptureSource {
    /// Create a new mock capture source with default settings
    pub fn new() -> Self {
        Self {
            is_started: false,
            samples: vec![0.0; 2048],
            should_fail_start: false,
            should_fail_read: false,
            error_message: "mock capture error".to_string(),
        }
    }

    /// Configure the mock to return specific samples on every read
    pub fn with_samples(mut self, samples: Vec<f32>) -> Self {
        self.samples = samples;
        self
    }

    /// Configure the mock to fail on start
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Configure the mock to fail on read
    pub fn with_read_failure(mut self) -> Self {
        self.should_fail_read = true;
        self
    }

    /// Configure the error message for failures
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    /// Check if the capture source is started
    pub fn is_started(&self) -> bool {
        self.is_started
    }
}

impl Default for MockCaptureSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSource for MockCaptureSource {
    fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            Err(CharlaError::AudioCapture {
                message: self.error_message.clone(),
            })
        } else {
            self.is_started = true;
            Ok(())
        }
    }

    fn stop(&mut self) -> Result<()> {
        self.is_started = false;
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<f32>> {
        if self.should_fail_read {
            Err(CharlaError::AudioCapture {
                message: self.error_message.clone(),
            })
        } else {
            Ok(self.samples.clone())
        }
    }
}

/// Mock capture provider for testing connect-time acquisition.
pub struct MockCaptureProvider {
    samples: Vec<f32>,
    deny_permission: bool,
    source_start_fails: bool,
}

impl MockCaptureProvider {
    pub fn new() -> Self {
        Self {
            samples: vec![0.0; 2048],
            deny_permission: false,
            source_start_fails: false,
        }
    }

    /// Samples every opened source will report.
    pub fn with_samples(mut self, samples: Vec<f32>) -> Self {
        self.samples = samples;
        self
    }

    /// Simulate a denied microphone permission at open time.
    pub fn with_denied_permission(mut self) -> Self {
        self.deny_permission = true;
        self
    }

    /// Opened sources fail when started (pipeline-setup failure).
    pub fn with_source_start_failure(mut self) -> Self {
        self.source_start_fails = true;
        self
    }
}

impl Default for MockCaptureProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureProvider for MockCaptureProvider {
    fn open(&self, _sample_rate: u32) -> Result<Box<dyn CaptureSource>> {
        if self.deny_permission {
            return Err(CharlaError::CapturePermission {
                message: "microphone permission denied".to_string(),
            });
        }
        let mut source = MockCaptureSource::new().with_samples(self.samples.clone());
        if self.source_start_fails {
            source = source.with_start_failure();
        }
        Ok(Box::new(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_source_returns_configured_samples() {
        let samples = vec![0.1f32, 0.2, 0.3];
        let mut source = MockCaptureSource::new().with_samples(samples.clone());

        assert_eq!(source.read_samples().unwrap(), samples);
    }

    #[test]
    fn test_mock_source_start_stop_state() {
        let mut source = MockCaptureSource::new();
        assert!(!source.is_started());

        source.start().unwrap();
        assert!(source.is_started());

        source.stop().unwrap();
        assert!(!source.is_started());
    }

    #[test]
    fn test_mock_source_start_failure() {
        let mut source = MockCaptureSource::new()
            .with_start_failure()
            .with_error_message("device busy");

        match source.start() {
            Err(CharlaError::AudioCapture { message }) => assert_eq!(message, "device busy"),
            other => panic!("expected AudioCapture error, got {:?}", other.err()),
        }
        assert!(!source.is_started());
    }

    #[test]
    fn test_mock_source_read_failure() {
        let mut source = MockCaptureSource::new().with_read_failure();
        assert!(source.read_samples().is_err());
    }

    #[test]
    fn test_mock_provider_opens_source() {
        let provider = MockCaptureProvider::new().with_samples(vec![0.5; 16]);
        let mut source = provider.open(16000).unwrap();
        assert_eq!(source.read_samples().unwrap().len(), 16);
    }

    #[test]
    fn test_mock_provider_denied_permission() {
        let provider = MockCaptureProvider::new().with_denied_permission();
        match provider.open(16000) {
            Err(CharlaError::CapturePermission { .. }) => {}
            other => panic!("expected CapturePermission, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_capture_source_trait_is_object_safe() {
        let mut source: Box<dyn CaptureSource> =
            Box::new(MockCaptureSource::new().with_samples(vec![0.25; 8]));
        source.start().unwrap();
        assert_eq!(source.read_samples().unwrap().len(), 8);
        source.stop().unwrap();
    }
}
