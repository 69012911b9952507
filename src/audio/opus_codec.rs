//! Opus encoder/decoder bound to the bridge's fixed audio profile.
//!
//! - Encoder: one PCM frame → one Opus packet
//! - Decoder: one Opus packet → interleaved PCM (any whole number of frames)

use super::frame::AudioFormat;
use super::stream_decoder::StreamDecoder;
use crate::error::{Error, Result};

/// Largest Opus packet duration (120ms), used to size the decode buffer.
const MAX_PACKET_DURATION_MS: u32 = 120;

/// Recommended upper bound for one encoded packet.
const MAX_PACKET_BYTES: usize = 4000;

fn opus_channels(channels: u32) -> opus::Channels {
    if channels == 1 {
        opus::Channels::Mono
    } else {
        opus::Channels::Stereo
    }
}

// ======================== Opus Encoder ========================

pub struct OpusEncoder {
    encoder: opus::Encoder,
    format: AudioFormat,
}

impl OpusEncoder {
    /// Create a new Opus encoder.
    ///
    /// * `format`  - Fixed PCM profile (sample rate, channels, frame duration)
    /// * `bitrate` - Bitrate in bits/s (e.g. 32000)
    pub fn new(format: AudioFormat, bitrate: i32) -> Result<Self> {
        let mut encoder = opus::Encoder::new(
            format.sample_rate,
            opus_channels(format.channels),
            opus::Application::Audio,
        )?;
        encoder.set_bitrate(opus::Bitrate::Bits(bitrate))?;

        Ok(Self { encoder, format })
    }

    /// Encode one frame of interleaved PCM data to an Opus packet.
    ///
    /// Input length must equal the profile's samples per frame.
    pub fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>> {
        let expected = self.format.samples_per_frame();
        if pcm.len() != expected {
            return Err(Error::FrameSize {
                expected,
                actual: pcm.len(),
            });
        }

        let mut opus_buf = vec![0u8; MAX_PACKET_BYTES];
        let encoded_len = self.encoder.encode(pcm, &mut opus_buf)?;
        opus_buf.truncate(encoded_len);
        Ok(opus_buf)
    }
}

// ======================== Opus Decoder ========================

pub struct OpusDecoder {
    decoder: opus::Decoder,
    format: AudioFormat,
    pcm_buf: Vec<i16>,
}

impl OpusDecoder {
    pub fn new(format: AudioFormat) -> Result<Self> {
        let decoder = opus::Decoder::new(format.sample_rate, opus_channels(format.channels))?;
        let max_frame_size = (format.sample_rate * MAX_PACKET_DURATION_MS / 1000) as usize;

        Ok(Self {
            decoder,
            format,
            pcm_buf: vec![0i16; max_frame_size * format.channels as usize],
        })
    }

    /// Decode an Opus packet to interleaved PCM in the decoder's profile.
    pub fn decode(&mut self, opus_data: &[u8]) -> Result<Vec<i16>> {
        if opus_data.is_empty() {
            return Err(Error::Codec("empty opus packet".into()));
        }
        let decoded_per_ch = self.decoder.decode(opus_data, &mut self.pcm_buf, false)?;
        Ok(self.pcm_buf[..decoded_per_ch * self.format.channels as usize].to_vec())
    }
}

impl StreamDecoder for OpusDecoder {
    fn decode(&mut self, data: &[u8]) -> Result<Vec<i16>> {
        OpusDecoder::decode(self, data)
    }
}
