//! Boundary traits for packet delivery, implemented by the transport layer.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Inbound packets of one remote track.
///
/// `read_packet` waits for the next datagram. Any error is permanent: the
/// stream is over and the owning track tears down.
#[async_trait]
pub trait PacketSource: Send {
    async fn read_packet(&mut self) -> Result<Bytes>;
}

/// Outbound packets of one local track.
///
/// Must not block. An error only concerns this packet; the sink stays usable.
pub trait PacketSink: Send + Sync {
    fn write_packet(&self, packet: Bytes) -> Result<()>;
}
