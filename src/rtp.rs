//! RTP framing (RFC 3550) for the Opus audio stream.
//!
//! Only what the bridge needs: parsing inbound datagrams into header +
//! payload, and a packetizer that stamps outbound payloads with sequence
//! numbers and timestamps.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

pub const RTP_VERSION: u8 = 2;
pub const RTP_HEADER_LEN: usize = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RtpError {
    #[error("buffer too small: required {required}, available {available}")]
    BufferTooSmall { required: usize, available: usize },

    #[error("unsupported RTP version {0}")]
    BadVersion(u8),

    #[error("invalid padding length {0}")]
    BadPadding(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc: Vec<u32>,
    /// Header extension (profile, data), data length is a multiple of 4
    pub extension: Option<(u16, Bytes)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub header: RtpHeader,
    pub payload: Bytes,
}

fn need(buf: &impl Buf, required: usize) -> Result<(), RtpError> {
    if buf.remaining() < required {
        return Err(RtpError::BufferTooSmall {
            required,
            available: buf.remaining(),
        });
    }
    Ok(())
}

impl RtpPacket {
    pub fn parse(data: Bytes) -> Result<Self, RtpError> {
        let mut buf = data.clone();
        need(&buf, RTP_HEADER_LEN)?;

        let b0 = buf.get_u8();
        let version = b0 >> 6;
        if version != RTP_VERSION {
            return Err(RtpError::BadVersion(version));
        }
        let has_padding = b0 & 0x20 != 0;
        let has_extension = b0 & 0x10 != 0;
        let csrc_count = (b0 & 0x0f) as usize;

        let b1 = buf.get_u8();
        let marker = b1 & 0x80 != 0;
        let payload_type = b1 & 0x7f;
        let sequence_number = buf.get_u16();
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();

        need(&buf, csrc_count * 4)?;
        let csrc = (0..csrc_count).map(|_| buf.get_u32()).collect();

        let extension = if has_extension {
            need(&buf, 4)?;
            let profile = buf.get_u16();
            let len = buf.get_u16() as usize * 4;
            need(&buf, len)?;
            Some((profile, buf.copy_to_bytes(len)))
        } else {
            None
        };

        let mut payload = buf;
        if has_padding {
            let pad = match payload.last() {
                Some(&p) => p as usize,
                None => return Err(RtpError::BadPadding(0)),
            };
            if pad == 0 || pad > payload.len() {
                return Err(RtpError::BadPadding(pad));
            }
            payload.truncate(payload.len() - pad);
        }

        Ok(Self {
            header: RtpHeader {
                marker,
                payload_type,
                sequence_number,
                timestamp,
                ssrc,
                csrc,
                extension,
            },
            payload,
        })
    }

    pub fn size(&self) -> usize {
        let ext = self
            .header
            .extension
            .as_ref()
            .map(|(_, d)| 4 + d.len())
            .unwrap_or(0);
        RTP_HEADER_LEN + self.header.csrc.len() * 4 + ext + self.payload.len()
    }

    pub fn serialize(&self) -> Bytes {
        let h = &self.header;
        let mut buf = BytesMut::with_capacity(self.size());

        let mut b0 = RTP_VERSION << 6;
        if h.extension.is_some() {
            b0 |= 0x10;
        }
        b0 |= (h.csrc.len().min(15)) as u8;
        buf.put_u8(b0);
        buf.put_u8(((h.marker as u8) << 7) | (h.payload_type & 0x7f));
        buf.put_u16(h.sequence_number);
        buf.put_u32(h.timestamp);
        buf.put_u32(h.ssrc);
        for csrc in h.csrc.iter().take(15) {
            buf.put_u32(*csrc);
        }
        if let Some((profile, data)) = &h.extension {
            buf.put_u16(*profile);
            buf.put_u16((data.len() / 4) as u16);
            buf.put_slice(data);
        }
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

/// Stamps outbound payloads for one RTP stream.
pub struct Packetizer {
    payload_type: u8,
    ssrc: u32,
    sequence_number: u16,
    timestamp: u32,
    started: bool,
}

impl Packetizer {
    pub fn new(payload_type: u8) -> Self {
        Self::with_state(payload_type, rand::random(), rand::random(), rand::random())
    }

    pub fn with_state(payload_type: u8, ssrc: u32, sequence_number: u16, timestamp: u32) -> Self {
        Self {
            payload_type,
            ssrc,
            sequence_number,
            timestamp,
            started: false,
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Wrap `payload` covering `samples` ticks of the RTP clock.
    pub fn packetize(&mut self, payload: Bytes, samples: u32) -> RtpPacket {
        let packet = RtpPacket {
            header: RtpHeader {
                // Marker on the first packet of a talkspurt
                marker: !self.started,
                payload_type: self.payload_type,
                sequence_number: self.sequence_number,
                timestamp: self.timestamp,
                ssrc: self.ssrc,
                csrc: Vec::new(),
                extension: None,
            },
            payload,
        };
        self.started = true;
        self.sequence_number = self.sequence_number.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(samples);
        packet
    }
}
