//! Voice codecs for push-to-talk clips.
//!
//! Input is always mono signed 16-bit PCM. Every codec resamples to its own
//! fixed rate before encoding and reports the clip duration it encoded.

mod mulaw;
#[cfg(feature = "opus")]
mod opus_ogg;

pub use mulaw::MuLawCodec;
#[cfg(feature = "opus")]
pub use opus_ogg::OpusOggCodec;

use bytes::Bytes;
use std::fmt::Debug;
use thiserror::Error;

/// PTT audio settings shared by the codecs: 16 kHz mono.
pub const VOICE_SAMPLE_RATE: u32 = 16_000;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("no audio data to encode")]
    EmptyAudio,
    #[error("unsupported sample rate {0}")]
    UnsupportedSampleRate(u32),
    #[error("malformed container: {0}")]
    Container(String),
    #[error("codec failure: {0}")]
    Codec(String),
}

/// Mono PCM samples at a given rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmAudio {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl PcmAudio {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }

    /// Linear-interpolation resample. Good enough for speech.
    pub fn resample(&self, target_rate: u32) -> Result<PcmAudio, CodecError> {
        if self.sample_rate == 0 || target_rate == 0 {
            return Err(CodecError::UnsupportedSampleRate(self.sample_rate));
        }
        if self.sample_rate == target_rate || self.samples.is_empty() {
            return Ok(PcmAudio::new(self.samples.clone(), target_rate));
        }
        let ratio = self.sample_rate as f64 / target_rate as f64;
        let out_len = ((self.samples.len() as f64) / ratio).round().max(1.0) as usize;
        let last = self.samples.len() - 1;
        let samples = (0..out_len)
            .map(|i| {
                let pos = i as f64 * ratio;
                let idx = (pos.floor() as usize).min(last);
                let next = (idx + 1).min(last);
                let frac = pos - idx as f64;
                let a = self.samples[idx] as f64;
                let b = self.samples[next] as f64;
                (a + (b - a) * frac).round() as i16
            })
            .collect();
        Ok(PcmAudio::new(samples, target_rate))
    }
}

/// Encoded clip ready for upload. Cheap to clone, so a failed send can be
/// retried with the same bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAudio {
    pub data: Bytes,
    pub mime_type: &'static str,
    pub file_name: String,
    pub duration_ms: u64,
}

impl EncodedAudio {
    pub fn size_bytes(&self) -> u64 {
        self.data.len() as u64
    }
}

/// A voice codec. Selected once when the client is built.
pub trait VoiceCodec: Send + Sync + Debug {
    fn mime_type(&self) -> &'static str;

    fn file_extension(&self) -> &'static str;

    fn encode(&self, audio: &PcmAudio) -> Result<EncodedAudio, CodecError>;

    fn decode(&self, data: &[u8]) -> Result<PcmAudio, CodecError>;
}

pub(crate) fn file_name(extension: &str) -> String {
    format!("voice-{}.{extension}", chrono::Utc::now().timestamp_millis())
}
