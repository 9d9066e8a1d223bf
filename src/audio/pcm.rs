//! PCM codec: float samples to and from 16-bit little-endian wire format.
//!
//! Pure functions with no device state. The wire representation is the
//! base64-transportable `audio/pcm;rate=16000` blob the remote channel
//! expects; the local representation is mono f32 in [-1, 1].

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::defaults;
use crate::error::{Result, SessionError};

/// An encoded outbound audio frame, ready for the channel.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedAudio {
    /// 16-bit little-endian PCM bytes.
    pub data: Vec<u8>,
    /// Codec tag for the transport, e.g. `audio/pcm;rate=16000`.
    pub mime_type: &'static str,
}

impl EncodedAudio {
    /// Base64 form of the PCM bytes for JSON transport.
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.data)
    }
}

/// A decoded block of agent speech, owned by the playback scheduler from
/// decode until playback finishes or is cancelled.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Mono samples in [-1, 1] at `sample_rate`.
    pub samples: Vec<f32>,
    /// Rate the samples are ready to play at.
    pub sample_rate: u32,
}

impl AudioChunk {
    /// Playback duration in seconds.
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Encode float samples as 16-bit little-endian PCM.
///
/// Samples are clamped to [-1, 1] before scaling, so out-of-range input
/// saturates instead of wrapping.
pub fn encode(samples: &[f32]) -> EncodedAudio {
    let mut data = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let scaled = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        data.extend_from_slice(&scaled.to_le_bytes());
    }
    EncodedAudio {
        data,
        mime_type: defaults::PCM_MIME_TYPE,
    }
}

/// Decode 16-bit little-endian PCM bytes into an [`AudioChunk`].
///
/// Multi-channel input is mixed to mono by averaging. If `source_rate`
/// differs from `target_rate` the samples are resampled with linear
/// interpolation.
///
/// # Errors
/// `SessionError::Codec` for odd-length byte buffers or byte counts that
/// do not divide evenly into `channels`.
pub fn decode(
    bytes: &[u8],
    source_rate: u32,
    target_rate: u32,
    channels: u16,
) -> Result<AudioChunk> {
    if bytes.len() % 2 != 0 {
        return Err(SessionError::Codec {
            message: format!("odd-length PCM buffer ({} bytes)", bytes.len()),
        });
    }
    if channels == 0 {
        return Err(SessionError::Codec {
            message: "zero channels".to_string(),
        });
    }

    let mut samples: Vec<f32> = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / i16::MAX as f32)
        .collect();

    if channels > 1 {
        let channels = channels as usize;
        if samples.len() % channels != 0 {
            return Err(SessionError::Codec {
                message: format!(
                    "{} samples do not divide into {} channels",
                    samples.len(),
                    channels
                ),
            });
        }
        samples = samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();
    }

    if source_rate != target_rate {
        samples = resample_linear(&samples, source_rate, target_rate);
    }

    Ok(AudioChunk {
        samples,
        sample_rate: target_rate,
    })
}

/// Decode a base64 PCM payload from the channel.
pub fn decode_base64(
    data: &str,
    source_rate: u32,
    target_rate: u32,
    channels: u16,
) -> Result<AudioChunk> {
    let bytes = BASE64.decode(data).map_err(|e| SessionError::Codec {
        message: format!("invalid base64 audio payload: {}", e),
    })?;
    decode(&bytes, source_rate, target_rate, channels)
}

/// Resample with linear interpolation.
///
/// Adequate for speech playback; a higher-quality resampler is not worth
/// the latency at these block sizes.
fn resample_linear(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if samples.is_empty() || source_rate == target_rate {
        return samples.to_vec();
    }

    let ratio = source_rate as f64 / target_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).round() as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let pos = i as f64 * ratio;
        let idx = pos as usize;
        let frac = (pos - idx as f64) as f32;
        let a = samples[idx.min(samples.len() - 1)];
        let b = samples[(idx + 1).min(samples.len() - 1)];
        out.push(a + (b - a) * frac);
    }

    out
}
