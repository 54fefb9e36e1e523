//! # PCM Conversions
//!
//! Everything that crosses the wire in the live session is mono, 16-bit,
//! little-endian PCM:
//! - **Capture**: 16 kHz, produced from the client's float samples
//! - **Playback**: 24 kHz, produced by the model
//!
//! The client talks to us in `f32` (that is what a browser capture node
//! hands out), so this module converts in both directions.

use base64::{engine::general_purpose::STANDARD, Engine};
use byteorder::{ByteOrder, LittleEndian};
use std::fmt;

/// Scale between `[-1.0, 1.0]` floats and signed 16-bit samples.
pub const PCM16_SCALE: f32 = 32768.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PcmError {
    /// Byte length is not a whole number of samples
    Misaligned { len: usize, sample_width: usize },
    /// Payload was not valid base64
    Base64(String),
}

impl fmt::Display for PcmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PcmError::Misaligned { len, sample_width } => write!(
                f,
                "payload of {} bytes is not a multiple of the {}-byte sample width",
                len, sample_width
            ),
            PcmError::Base64(msg) => write!(f, "invalid base64 audio: {}", msg),
        }
    }
}

impl std::error::Error for PcmError {}

/// Convert float samples to 16-bit PCM.
///
/// Each sample is multiplied by 32768 and truncated toward zero. Rust's
/// float-to-int cast saturates, so a full-scale `1.0` lands on `i16::MAX`
/// rather than wrapping to the negative end.
pub fn float_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples.iter().map(|&sample| (sample * PCM16_SCALE) as i16).collect()
}

pub fn pcm16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = vec![0u8; samples.len() * 2];
    LittleEndian::write_i16_into(samples, &mut bytes);
    bytes
}

pub fn le_bytes_to_pcm16(bytes: &[u8]) -> Result<Vec<i16>, PcmError> {
    if bytes.len() % 2 != 0 {
        return Err(PcmError::Misaligned { len: bytes.len(), sample_width: 2 });
    }
    let mut samples = vec![0i16; bytes.len() / 2];
    LittleEndian::read_i16_into(bytes, &mut samples);
    Ok(samples)
}

/// Decode one binary capture message from the client (little-endian `f32`s).
pub fn le_bytes_to_f32(bytes: &[u8]) -> Result<Vec<f32>, PcmError> {
    if bytes.len() % 4 != 0 {
        return Err(PcmError::Misaligned { len: bytes.len(), sample_width: 4 });
    }
    let mut samples = vec![0f32; bytes.len() / 4];
    LittleEndian::read_f32_into(bytes, &mut samples);
    Ok(samples)
}

/// MIME type the generative API uses for raw PCM at a given rate.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// One decoded unit of output audio.
///
/// Owned by the playback scheduler from decode until its scheduled end.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackChunk {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl PlaybackChunk {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    /// Decode a base64 payload of little-endian 16-bit PCM.
    pub fn from_base64(data: &str, sample_rate: u32) -> Result<Self, PcmError> {
        let bytes = STANDARD
            .decode(data)
            .map_err(|e| PcmError::Base64(e.to_string()))?;
        Ok(Self::new(le_bytes_to_pcm16(&bytes)?, sample_rate))
    }

    /// Playback length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    #[cfg(test)]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(pcm16_to_le_bytes(&self.samples))
    }
}
