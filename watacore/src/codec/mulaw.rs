//! G.711 mu-law in a WAV container. Halves the size of 16-bit PCM and plays
//! back in every browser and media player without extra codecs.

use super::{CodecError, EncodedAudio, PcmAudio, VOICE_SAMPLE_RATE, VoiceCodec, file_name};
use bytes::Bytes;

const BIAS: i32 = 0x84;
const CLIP: i32 = 32_635;
const WAVE_FORMAT_MULAW: u16 = 7;
const FMT_CHUNK_LEN: u32 = 18;

#[derive(Debug, Clone, Copy)]
pub struct MuLawCodec {
    sample_rate: u32,
}

impl MuLawCodec {
    pub fn new() -> Self {
        Self {
            sample_rate: VOICE_SAMPLE_RATE,
        }
    }

    pub fn with_sample_rate(sample_rate: u32) -> Self {
        Self { sample_rate }
    }
}

impl Default for MuLawCodec {
    fn default() -> Self {
        Self::new()
    }
}

pub fn linear_to_mulaw(sample: i16) -> u8 {
    let mut magnitude = sample as i32;
    let sign = if magnitude < 0 {
        magnitude = -magnitude;
        0x80
    } else {
        0
    };
    magnitude = magnitude.min(CLIP) + BIAS;
    let highest_bit = 31 - (magnitude as u32).leading_zeros() as i32;
    let exponent = (highest_bit - 7).clamp(0, 7);
    let mantissa = (magnitude >> (exponent + 3)) & 0x0F;
    !((sign | (exponent << 4) | mantissa) as u8)
}

pub fn mulaw_to_linear(byte: u8) -> i16 {
    let byte = !byte;
    let exponent = ((byte >> 4) & 0x07) as i32;
    let mantissa = (byte & 0x0F) as i32;
    let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;
    if byte & 0x80 != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

fn write_wav(encoded: &[u8], sample_rate: u32) -> Vec<u8> {
    let pad = encoded.len() % 2;
    let riff_len = 4 + (8 + FMT_CHUNK_LEN) + (8 + 4) + 8 + encoded.len() as u32 + pad as u32;
    let mut out = Vec::with_capacity(riff_len as usize + 8);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&riff_len.to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&FMT_CHUNK_LEN.to_le_bytes());
    out.extend_from_slice(&WAVE_FORMAT_MULAW.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // mono
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes()); // byte rate: 1 byte per sample
    out.extend_from_slice(&1u16.to_le_bytes()); // block align
    out.extend_from_slice(&8u16.to_le_bytes()); // bits per sample
    out.extend_from_slice(&0u16.to_le_bytes()); // no extension

    out.extend_from_slice(b"fact");
    out.extend_from_slice(&4u32.to_le_bytes());
    out.extend_from_slice(&(encoded.len() as u32).to_le_bytes());

    out.extend_from_slice(b"data");
    out.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
    out.extend_from_slice(encoded);
    if pad == 1 {
        out.push(0);
    }
    out
}

fn read_u16(data: &[u8], at: usize) -> Option<u16> {
    data.get(at..at + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn read_wav(data: &[u8]) -> Result<(u32, &[u8]), CodecError> {
    let malformed = |what: &str| CodecError::Container(what.to_string());
    if data.get(0..4) != Some(&b"RIFF"[..]) || data.get(8..12) != Some(&b"WAVE"[..]) {
        return Err(malformed("not a RIFF/WAVE file"));
    }
    let mut pos = 12;
    let mut sample_rate = None;
    while pos + 8 <= data.len() {
        let id = &data[pos..pos + 4];
        let len = read_u32(data, pos + 4).ok_or_else(|| malformed("truncated chunk header"))? as usize;
        let body_start = pos + 8;
        let body_end = body_start
            .checked_add(len)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| malformed("chunk overruns file"))?;
        match id {
            b"fmt " => {
                let format = read_u16(data, body_start).ok_or_else(|| malformed("short fmt"))?;
                let channels = read_u16(data, body_start + 2).ok_or_else(|| malformed("short fmt"))?;
                if format != WAVE_FORMAT_MULAW || channels != 1 {
                    return Err(malformed("expected mono mu-law"));
                }
                sample_rate = read_u32(data, body_start + 4);
            }
            b"data" => {
                let rate = sample_rate.ok_or_else(|| malformed("data before fmt"))?;
                return Ok((rate, &data[body_start..body_end]));
            }
            _ => {}
        }
        pos = body_end + (len % 2);
    }
    Err(malformed("missing data chunk"))
}

impl VoiceCodec for MuLawCodec {
    fn mime_type(&self) -> &'static str {
        "audio/wav"
    }

    fn file_extension(&self) -> &'static str {
        "wav"
    }

    fn encode(&self, audio: &PcmAudio) -> Result<EncodedAudio, CodecError> {
        if audio.is_empty() {
            return Err(CodecError::EmptyAudio);
        }
        let pcm = audio.resample(self.sample_rate)?;
        let encoded: Vec<u8> = pcm.samples.iter().copied().map(linear_to_mulaw).collect();
        Ok(EncodedAudio {
            data: Bytes::from(write_wav(&encoded, self.sample_rate)),
            mime_type: self.mime_type(),
            file_name: file_name(self.file_extension()),
            duration_ms: pcm.duration_ms(),
        })
    }

    fn decode(&self, data: &[u8]) -> Result<PcmAudio, CodecError> {
        let (rate, body) = read_wav(data)?;
        let samples = body.iter().copied().map(mulaw_to_linear).collect();
        Ok(PcmAudio::new(samples, rate))
    }
}
