//! Real microphone capture using CPAL (Cross-Platform Audio Library).

use crate::audio::source::{CaptureProvider, CaptureSource};
use crate::error::{CharlaError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// Suppresses noisy ALSA/JACK/PipeWire messages that CPAL triggers while
/// probing audio backends.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2.
/// Safe as long as no other thread is concurrently manipulating fd 2.
fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Device names preferred when no explicit device is configured.
///
/// PipeWire/PulseAudio front-ends resample transparently and follow the
/// desktop's chosen input device.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

fn find_device(device_name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();

        if let Some(name) = device_name {
            let devices = host
                .input_devices()
                .map_err(|e| CharlaError::AudioCapture {
                    message: format!("Failed to enumerate devices: {}", e),
                })?;

            for device in devices {
                if let Ok(device_name) = device.name() {
                    if device_name == name {
                        return Ok(device);
                    }
                }
            }

            return Err(CharlaError::AudioDeviceNotFound {
                device: name.to_string(),
            });
        }

        if let Ok(devices) = host.input_devices() {
            for device in devices {
                if let Ok(name) = device.name() {
                    if is_preferred_device(&name) {
                        return Ok(device);
                    }
                }
            }
        }

        host.default_input_device()
            .ok_or_else(|| CharlaError::AudioDeviceNotFound {
                device: "default".to_string(),
            })
    })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only touched while holding the Mutex in
/// `CpalCaptureSource`, so it never crosses threads unsynchronized.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Microphone capture via CPAL, producing normalized f32 mono samples at
/// the configured sample rate.
///
/// Tries f32/mono at the target rate first (PipeWire and PulseAudio
/// convert transparently); falls back to the device's native config with
/// software channel mixing and decimation.
pub struct CpalCaptureSource {
    device: cpal::Device,
    sample_rate: u32,
    stream: Mutex<Option<SendableStream>>,
    buffer: Arc<Mutex<Vec<f32>>>,
    callbacks: Arc<AtomicU64>,
}

impl CpalCaptureSource {
    /// Open the named device, or the best default when `device_name` is None.
    pub fn new(device_name: Option<&str>, sample_rate: u32) -> Result<Self> {
        let device = find_device(device_name)?;
        Ok(Self {
            device,
            sample_rate,
            stream: Mutex::new(None),
            buffer: Arc::new(Mutex::new(Vec::new())),
            callbacks: Arc::new(AtomicU64::new(0)),
        })
    }

    fn build_preferred_stream(&self) -> Result<cpal::Stream> {
        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let buffer = Arc::clone(&self.buffer);
        let callbacks = Arc::clone(&self.callbacks);
        self.device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    callbacks.fetch_add(1, Ordering::Relaxed);
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(data);
                    }
                },
                |err| tracing::warn!("audio stream error: {}", err),
                None,
            )
            .map_err(|e| CharlaError::AudioCapture {
                message: format!("Failed to build input stream: {}", e),
            })
    }

    /// Build a stream on the device's native config, mixing and decimating
    /// in software. Some PipeWire-ALSA setups accept non-native configs but
    /// never fire the data callback, so this is the reliable path.
    fn build_native_stream(&self) -> Result<cpal::Stream> {
        use cpal::SampleFormat;

        let default_config =
            self.device
                .default_input_config()
                .map_err(|e| CharlaError::AudioCapture {
                    message: format!("Failed to query default input config: {}", e),
                })?;

        let native_rate = default_config.sample_rate().0;
        let native_channels = default_config.channels() as usize;
        let target_rate = self.sample_rate;
        let stream_config: cpal::StreamConfig = default_config.clone().into();

        tracing::info!(
            "capturing at native format {}ch/{}Hz/{:?}, converting in software",
            native_channels,
            native_rate,
            default_config.sample_format(),
        );

        let buffer = Arc::clone(&self.buffer);
        let callbacks = Arc::clone(&self.callbacks);

        match default_config.sample_format() {
            SampleFormat::F32 => self
                .device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        callbacks.fetch_add(1, Ordering::Relaxed);
                        let converted =
                            downmix_and_resample(data, native_channels, native_rate, target_rate);
                        if let Ok(mut buf) = buffer.lock() {
                            buf.extend_from_slice(&converted);
                        }
                    },
                    |err| tracing::warn!("audio stream error: {}", err),
                    None,
                )
                .map_err(|e| CharlaError::AudioCapture {
                    message: format!("Failed to build native f32 stream: {}", e),
                }),
            SampleFormat::I16 => self
                .device
                .build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        callbacks.fetch_add(1, Ordering::Relaxed);
                        let as_f32: Vec<f32> =
                            data.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
                        let converted =
                            downmix_and_resample(&as_f32, native_channels, native_rate, target_rate);
                        if let Ok(mut buf) = buffer.lock() {
                            buf.extend_from_slice(&converted);
                        }
                    },
                    |err| tracing::warn!("audio stream error: {}", err),
                    None,
                )
                .map_err(|e| CharlaError::AudioCapture {
                    message: format!("Failed to build native i16 stream: {}", e),
                }),
            fmt => Err(CharlaError::AudioCapture {
                message: format!("Unsupported native sample format: {:?}", fmt),
            }),
        }
    }
}

/// Mix multi-channel audio to mono and resample to the target rate by
/// nearest-sample selection. Good enough for 16kHz speech input.
fn downmix_and_resample(
    samples: &[f32],
    channels: usize,
    source_rate: u32,
    target_rate: u32,
) -> Vec<f32> {
    let mono: Vec<f32> = if channels <= 1 {
        samples.to_vec()
    } else {
        samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    if source_rate == target_rate || mono.is_empty() {
        return mono;
    }

    let ratio = source_rate as f64 / target_rate as f64;
    let out_len = (mono.len() as f64 / ratio) as usize;
    (0..out_len)
        .map(|i| {
            let src = ((i as f64 * ratio) as usize).min(mono.len() - 1);
            mono[src]
        })
        .collect()
}

impl CaptureSource for CpalCaptureSource {
    fn start(&mut self) -> Result<()> {
        {
            let guard = self.stream.lock().map_err(|e| CharlaError::AudioCapture {
                message: format!("Failed to lock stream: {}", e),
            })?;
            if guard.is_some() {
                return Ok(()); // Already started
            }
        }

        let stream = self.build_preferred_stream().or_else(|_| self.build_native_stream())?;
        stream.play().map_err(|e| CharlaError::AudioCapture {
            message: format!("Failed to start audio stream: {}", e),
        })?;

        // Verify the callback actually fires; swap to the native path if not.
        std::thread::sleep(std::time::Duration::from_millis(200));
        let stream = if self.callbacks.load(Ordering::Relaxed) == 0 {
            drop(stream);
            if let Ok(mut buf) = self.buffer.lock() {
                buf.clear();
            }
            let native = self.build_native_stream()?;
            native.play().map_err(|e| CharlaError::AudioCapture {
                message: format!("Failed to start native audio stream: {}", e),
            })?;
            native
        } else {
            stream
        };

        let mut guard = self.stream.lock().map_err(|e| CharlaError::AudioCapture {
            message: format!("Failed to lock stream: {}", e),
        })?;
        *guard = Some(SendableStream(stream));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut guard = self.stream.lock().map_err(|e| CharlaError::AudioCapture {
            message: format!("Failed to lock stream: {}", e),
        })?;

        if let Some(stream) = guard.take() {
            stream.0.pause().map_err(|e| CharlaError::AudioCapture {
                message: format!("Failed to stop audio stream: {}", e),
            })?;
        }
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<f32>> {
        let mut buffer = self.buffer.lock().map_err(|e| CharlaError::AudioCapture {
            message: format!("Failed to lock audio buffer: {}", e),
        })?;
        Ok(std::mem::take(&mut *buffer))
    }
}

/// Capture provider backed by CPAL device acquisition.
pub struct CpalCaptureProvider {
    device_name: Option<String>,
}

impl CpalCaptureProvider {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

impl CaptureProvider for CpalCaptureProvider {
    fn open(&self, sample_rate: u32) -> Result<Box<dyn CaptureSource>> {
        let source = CpalCaptureSource::new(self.device_name.as_deref(), sample_rate)
            .map_err(|e| match e {
                CharlaError::AudioDeviceNotFound { device } => {
                    CharlaError::AudioDeviceNotFound { device }
                }
                other => CharlaError::CapturePermission {
                    message: other.to_string(),
                },
            })?;
        Ok(Box::new(source))
    }
}
