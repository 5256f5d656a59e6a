//! Opus in an Ogg container. 16 kHz mono, 16 kbps, 20 ms frames.

use super::{CodecError, EncodedAudio, PcmAudio, VOICE_SAMPLE_RATE, VoiceCodec, file_name};
use bytes::Bytes;
use log::debug;
use ogg::writing::PacketWriteEndInfo;
use opus::{Application, Bitrate, Channels, Decoder, Encoder};
use std::io::Cursor;

const BITRATE: i32 = 16_000;
const FRAME_SIZE_MS: usize = 20;
const FRAME_SIZE_SAMPLES: usize = (VOICE_SAMPLE_RATE as usize * FRAME_SIZE_MS) / 1000;
/// Granule positions in Ogg Opus are always counted at 48 kHz (RFC 7845).
const GRANULE_PER_FRAME: u64 = (48_000 * FRAME_SIZE_MS as u64) / 1000;
const PRE_SKIP: u16 = 312;
const MAX_PACKET: usize = 4000;

#[derive(Debug, Clone, Copy, Default)]
pub struct OpusOggCodec;

impl OpusOggCodec {
    pub fn new() -> Self {
        Self
    }
}

fn opus_err(e: opus::Error) -> CodecError {
    CodecError::Codec(e.to_string())
}

fn ogg_err(e: impl std::fmt::Display) -> CodecError {
    CodecError::Container(e.to_string())
}

fn id_header() -> Vec<u8> {
    let mut header = Vec::with_capacity(19);
    header.extend_from_slice(b"OpusHead");
    header.push(1); // version
    header.push(1); // mono
    header.extend_from_slice(&PRE_SKIP.to_le_bytes());
    header.extend_from_slice(&VOICE_SAMPLE_RATE.to_le_bytes());
    header.extend_from_slice(&0u16.to_le_bytes()); // output gain
    header.push(0); // mapping family
    header
}

fn comment_header() -> Vec<u8> {
    let vendor = "wata-rust";
    let mut header = Vec::new();
    header.extend_from_slice(b"OpusTags");
    header.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
    header.extend_from_slice(vendor.as_bytes());
    header.extend_from_slice(&0u32.to_le_bytes());
    header
}

impl VoiceCodec for OpusOggCodec {
    fn mime_type(&self) -> &'static str {
        "audio/ogg"
    }

    fn file_extension(&self) -> &'static str {
        "ogg"
    }

    fn encode(&self, audio: &PcmAudio) -> Result<EncodedAudio, CodecError> {
        if audio.is_empty() {
            return Err(CodecError::EmptyAudio);
        }
        let pcm = audio.resample(VOICE_SAMPLE_RATE)?;

        let mut encoder =
            Encoder::new(VOICE_SAMPLE_RATE, Channels::Mono, Application::Voip).map_err(opus_err)?;
        encoder
            .set_bitrate(Bitrate::Bits(BITRATE))
            .map_err(opus_err)?;

        let mut packets = Vec::with_capacity(pcm.samples.len() / FRAME_SIZE_SAMPLES + 1);
        for chunk in pcm.samples.chunks(FRAME_SIZE_SAMPLES) {
            let mut frame = chunk.to_vec();
            frame.resize(FRAME_SIZE_SAMPLES, 0);
            let mut output = vec![0u8; MAX_PACKET];
            let len = encoder.encode(&frame, &mut output).map_err(opus_err)?;
            output.truncate(len);
            packets.push(output);
        }

        let serial: u32 = rand::random();
        let mut buffer = Vec::new();
        {
            let mut writer = ogg::PacketWriter::new(Cursor::new(&mut buffer));
            writer
                .write_packet(id_header(), serial, PacketWriteEndInfo::EndPage, 0)
                .map_err(ogg_err)?;
            writer
                .write_packet(comment_header(), serial, PacketWriteEndInfo::EndPage, 0)
                .map_err(ogg_err)?;
            let total = packets.len();
            let mut granule = 0u64;
            for (i, packet) in packets.into_iter().enumerate() {
                granule += GRANULE_PER_FRAME;
                let end = if i + 1 == total {
                    PacketWriteEndInfo::EndStream
                } else {
                    PacketWriteEndInfo::NormalPacket
                };
                writer
                    .write_packet(packet, serial, end, granule)
                    .map_err(ogg_err)?;
            }
        }

        debug!(
            target: "Core/Codec",
            "Encoded {} samples to {} bytes of Ogg Opus",
            pcm.samples.len(),
            buffer.len()
        );
        Ok(EncodedAudio {
            data: Bytes::from(buffer),
            mime_type: self.mime_type(),
            file_name: file_name(self.file_extension()),
            duration_ms: pcm.duration_ms(),
        })
    }

    fn decode(&self, data: &[u8]) -> Result<PcmAudio, CodecError> {
        let mut reader = ogg::PacketReader::new(Cursor::new(data));
        let mut decoder = Decoder::new(VOICE_SAMPLE_RATE, Channels::Mono).map_err(opus_err)?;
        let mut samples = Vec::new();
        let mut index = 0usize;
        while let Some(packet) = reader.read_packet().map_err(ogg_err)? {
            index += 1;
            // First two packets are the id and comment headers.
            if index <= 2 {
                continue;
            }
            let mut frame = vec![0i16; FRAME_SIZE_SAMPLES * 6];
            let len = decoder
                .decode(&packet.data, &mut frame, false)
                .map_err(opus_err)?;
            samples.extend_from_slice(&frame[..len]);
        }
        if index < 2 {
            return Err(CodecError::Container("missing Opus headers".into()));
        }
        let skip = (PRE_SKIP as usize * VOICE_SAMPLE_RATE as usize / 48_000).min(samples.len());
        samples.drain(..skip);
        Ok(PcmAudio::new(samples, VOICE_SAMPLE_RATE))
    }
}
