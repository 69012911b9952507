//! Outbound codec adapter: PCM frame → Opus packet → RTP → packet sink.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use super::frame::AudioFormat;
use super::opus_codec::OpusEncoder;
use super::writer::FrameWriter;
use crate::config::AudioConfig;
use crate::error::Result;
use crate::rtp::Packetizer;
use crate::transport::PacketSink;

struct EncodeState {
    encoder: OpusEncoder,
    packetizer: Packetizer,
}

/// Encodes each written frame into one RTP/Opus packet.
///
/// Errors (wrong frame length, codec failure, sink rejection) are returned
/// to the caller and nothing is retried.
pub struct MediaStreamOut {
    state: Mutex<EncodeState>,
    sink: Arc<dyn PacketSink>,
    format: AudioFormat,
    rtp_ticks_per_frame: u32,
}

impl MediaStreamOut {
    pub fn new(audio: &AudioConfig, sink: Arc<dyn PacketSink>) -> Result<Self> {
        Self::with_packetizer(audio, sink, Packetizer::new(audio.payload_type))
    }

    pub fn with_packetizer(
        audio: &AudioConfig,
        sink: Arc<dyn PacketSink>,
        packetizer: Packetizer,
    ) -> Result<Self> {
        let format = audio.format();
        let encoder = OpusEncoder::new(format, audio.opus_bitrate)?;
        let rtp_ticks_per_frame = (audio.rtp_clock_rate as u64 * format.frame_duration_ms as u64
            / 1000) as u32;

        log::debug!(
            "MediaStreamOut: ssrc={:#010x}, pt={}, {} rtp ticks/frame",
            packetizer.ssrc(),
            audio.payload_type,
            rtp_ticks_per_frame
        );

        Ok(Self {
            state: Mutex::new(EncodeState {
                encoder,
                packetizer,
            }),
            sink,
            format,
            rtp_ticks_per_frame,
        })
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }
}

impl FrameWriter for MediaStreamOut {
    fn write_frame(&self, frame: &[i16]) -> Result<()> {
        let packet = {
            let mut state = self.state.lock();
            let payload = state.encoder.encode(frame)?;
            state
                .packetizer
                .packetize(Bytes::from(payload), self.rtp_ticks_per_frame)
        };
        self.sink.write_packet(packet.serialize())
    }
}
