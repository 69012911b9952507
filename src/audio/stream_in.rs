//! Inbound codec adapter: RTP datagrams → decoded PCM frames → mixer input.

use bytes::Bytes;

use super::frame::{AudioFormat, Framer};
use super::opus_codec::OpusDecoder;
use super::stream_decoder::StreamDecoder;
use super::writer::FrameWriter;
use crate::error::{Error, Result};
use crate::rtp::RtpPacket;
use crate::transport::PacketSource;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub packets: u64,
    pub frames: u64,
    /// Packets dropped as malformed or undecodable
    pub dropped: u64,
    /// Packets skipped because of a foreign payload type
    pub foreign: u64,
    /// Sequence number discontinuities seen
    pub gaps: u64,
}

pub struct MediaStreamIn {
    decoder: Box<dyn StreamDecoder>,
    framer: Framer,
    sink: Box<dyn FrameWriter>,
    payload_type: Option<u8>,
    last_seq: Option<u16>,
    stats: StreamStats,
}

impl MediaStreamIn {
    /// * `payload_type` - accept only this RTP payload type (`None` accepts all)
    pub fn new(
        decoder: Box<dyn StreamDecoder>,
        format: AudioFormat,
        payload_type: Option<u8>,
        sink: impl FrameWriter + 'static,
    ) -> Self {
        Self {
            decoder,
            framer: Framer::new(format),
            sink: Box::new(sink),
            payload_type,
            last_seq: None,
            stats: StreamStats::default(),
        }
    }

    pub fn opus(
        format: AudioFormat,
        payload_type: u8,
        sink: impl FrameWriter + 'static,
    ) -> Result<Self> {
        let decoder = OpusDecoder::new(format)?;
        Ok(Self::new(Box::new(decoder), format, Some(payload_type), sink))
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    /// Handle one raw RTP datagram. Returns the number of frames pushed.
    ///
    /// Errors are per packet: the packet is lost, the decoder keeps its state.
    pub fn handle_packet(&mut self, data: Bytes) -> Result<usize> {
        self.stats.packets += 1;

        let packet = match RtpPacket::parse(data) {
            Ok(p) => p,
            Err(e) => {
                self.stats.dropped += 1;
                return Err(e.into());
            }
        };

        if let Some(pt) = self.payload_type {
            if packet.header.payload_type != pt {
                self.stats.foreign += 1;
                log::debug!(
                    "Skipping RTP payload type {} (expected {})",
                    packet.header.payload_type,
                    pt
                );
                return Ok(0);
            }
        }

        let seq = packet.header.sequence_number;
        if let Some(last) = self.last_seq {
            if seq != last.wrapping_add(1) {
                self.stats.gaps += 1;
                log::debug!("RTP sequence discontinuity: {} -> {}", last, seq);
            }
        }
        self.last_seq = Some(seq);

        let pcm = match self.decoder.decode(&packet.payload) {
            Ok(pcm) => pcm,
            Err(e) => {
                self.stats.dropped += 1;
                return Err(e);
            }
        };

        let frames = self.framer.push(&pcm);
        for frame in &frames {
            self.sink.write_frame(frame)?;
        }
        self.stats.frames += frames.len() as u64;
        Ok(frames.len())
    }

    /// Pump packets from `source` until it fails permanently.
    ///
    /// Returns the error that ended the stream.
    pub async fn run<S: PacketSource + ?Sized>(&mut self, source: &mut S) -> Error {
        loop {
            let data = match source.read_packet().await {
                Ok(data) => data,
                Err(e) => {
                    log::info!(
                        "Inbound stream ended: {} (packets={}, frames={}, dropped={}, gaps={})",
                        e,
                        self.stats.packets,
                        self.stats.frames,
                        self.stats.dropped,
                        self.stats.gaps,
                    );
                    return e;
                }
            };
            if let Err(e) = self.handle_packet(data) {
                log::warn!("Dropping inbound packet: {}", e);
            }
        }
    }
}
