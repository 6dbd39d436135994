//! PCM wire encoding.
//!
//! Pure conversions between normalized f32 sample blocks and the
//! base64-encoded 16-bit little-endian PCM blobs the transport carries.

use crate::error::{CharlaError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// A wire-ready encoded audio chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmBlob {
    /// Mime type carrying the sample rate, e.g. `audio/pcm;rate=16000`.
    pub mime_type: String,
    /// Base64-encoded 16-bit little-endian PCM payload.
    pub data: String,
}

/// Encodes normalized samples as a base64 PCM blob.
///
/// Samples are clamped to [-1.0, 1.0] before conversion. An empty input
/// produces an empty payload, not an error.
pub fn encode_blob(samples: &[f32], sample_rate: u32) -> PcmBlob {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let value = (clamped * i16::MAX as f32) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }

    PcmBlob {
        mime_type: format!("audio/pcm;rate={}", sample_rate),
        data: STANDARD.encode(bytes),
    }
}

/// Decodes a base64 16-bit LE PCM payload back to normalized samples.
pub fn decode(data: &str) -> Result<Vec<f32>> {
    let bytes = STANDARD
        .decode(data)
        .map_err(|e| CharlaError::AudioPayload {
            message: format!("bad base64: {}", e),
        })?;

    if bytes.len() % 2 != 0 {
        return Err(CharlaError::AudioPayload {
            message: format!("odd byte length {}", bytes.len()),
        });
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / i16::MAX as f32)
        .collect();
    Ok(samples)
}

/// Duration in seconds of a decoded sample block at the given rate.
pub fn duration_secs(samples: &[f32], sample_rate: u32) -> f64 {
    samples.len() as f64 / sample_rate as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_empty_is_empty_payload() {
        let blob = encode_blob(&[], 16000);
        assert_eq!(blob.mime_type, "audio/pcm;rate=16000");
        assert!(blob.data.is_empty());
    }

    #[test]
    fn test_mime_carries_rate() {
        let blob = encode_blob(&[0.0], 24000);
        assert_eq!(blob.mime_type, "audio/pcm;rate=24000");
    }

    #[test]
    fn test_round_trip_preserves_samples() {
        let samples = vec![0.0, 0.5, -0.5, 0.25, -1.0, 1.0];
        let blob = encode_blob(&samples, 16000);
        let decoded = decode(&blob.data).unwrap();

        assert_eq!(decoded.len(), samples.len());
        for (a, b) in samples.iter().zip(decoded.iter()) {
            assert!((a - b).abs() < 1e-3, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_out_of_range_samples_clamp() {
        let blob = encode_blob(&[2.0, -3.0], 16000);
        let decoded = decode(&blob.data).unwrap();
        assert!((decoded[0] - 1.0).abs() < 1e-3);
        assert!((decoded[1] + 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        assert!(decode("not base64!!").is_err());
    }

    #[test]
    fn test_decode_rejects_odd_length() {
        let data = STANDARD.encode([1u8, 2, 3]);
        let err = decode(&data).unwrap_err();
        assert!(err.to_string().contains("odd byte length"));
    }

    #[test]
    fn test_duration() {
        let samples = vec![0.0; 24000];
        assert!((duration_secs(&samples, 24000) - 1.0).abs() < 1e-9);
        assert!((duration_secs(&samples[..12000], 24000) - 0.5).abs() < 1e-9);
    }
}
