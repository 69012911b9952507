//! In-memory room collaborators backed by tokio channels.
//!
//! Used by the demo binary and by tests in place of a real SFU SDK.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::events::{RemoteTrack, RoomClient, TrackDescriptor};
use crate::error::{Error, Result};
use crate::transport::{PacketSink, PacketSource};

pub struct ChannelSource {
    rx: mpsc::Receiver<Bytes>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl PacketSource for ChannelSource {
    async fn read_packet(&mut self) -> Result<Bytes> {
        self.rx.recv().await.ok_or(Error::StreamClosed)
    }
}

/// Adapts any packet stream; the end of the stream closes the source.
pub struct StreamSource<S> {
    stream: S,
}

impl<S> StreamSource<S>
where
    S: Stream<Item = Bytes> + Send + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl<S> PacketSource for StreamSource<S>
where
    S: Stream<Item = Bytes> + Send + Unpin,
{
    async fn read_packet(&mut self) -> Result<Bytes> {
        self.stream.next().await.ok_or(Error::StreamClosed)
    }
}

pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }
}

impl PacketSink for ChannelSink {
    fn write_packet(&self, packet: Bytes) -> Result<()> {
        match self.tx.try_send(packet) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::Sink("packet queue full".into())),
            Err(TrySendError::Closed(_)) => Err(Error::Sink("packet queue closed".into())),
        }
    }
}

/// A remote track fed through the returned sender.
pub fn remote_track(id: &str, capacity: usize) -> (mpsc::Sender<Bytes>, RemoteTrack) {
    let (tx, rx) = mpsc::channel(capacity);
    (tx, RemoteTrack::new(id, ChannelSource::new(rx)))
}

/// Records what the bridge asks of the room.
pub struct LoopbackRoom {
    capacity: usize,
    local_packets: Mutex<HashMap<String, mpsc::Receiver<Bytes>>>,
    published: Mutex<Vec<(TrackDescriptor, bool)>>,
    unsubscribed: Mutex<Vec<String>>,
    left: AtomicBool,
}

impl LoopbackRoom {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            local_packets: Mutex::new(HashMap::new()),
            published: Mutex::new(Vec::new()),
            unsubscribed: Mutex::new(Vec::new()),
            left: AtomicBool::new(false),
        }
    }

    /// Packets written to the local track `track_id`.
    pub fn take_local_packets(&self, track_id: &str) -> Option<mpsc::Receiver<Bytes>> {
        self.local_packets.lock().remove(track_id)
    }

    pub fn published(&self) -> Vec<(TrackDescriptor, bool)> {
        self.published.lock().clone()
    }

    pub fn unsubscribed(&self) -> Vec<String> {
        self.unsubscribed.lock().clone()
    }

    pub fn has_left(&self) -> bool {
        self.left.load(Ordering::Acquire)
    }

    /// Local tracks whose packet queue has not been taken yet.
    pub fn pending_local_tracks(&self) -> usize {
        self.local_packets.lock().len()
    }
}

#[async_trait]
impl RoomClient for LoopbackRoom {
    fn create_local_track(&self, descriptor: &TrackDescriptor) -> Result<Arc<dyn PacketSink>> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut local = self.local_packets.lock();
        // Queues of closed tracks nobody took
        local.retain(|_, rx| !(rx.is_closed() && rx.is_empty()));
        local.insert(descriptor.track_id.clone(), rx);
        Ok(Arc::new(ChannelSink::new(tx)))
    }

    async fn publish(&self, descriptor: TrackDescriptor, enabled: bool) -> Result<()> {
        if self.has_left() {
            return Err(Error::Room("not in a room".into()));
        }
        self.published.lock().push((descriptor, enabled));
        Ok(())
    }

    async fn unsubscribe(&self, track_id: &str) -> Result<()> {
        self.unsubscribed.lock().push(track_id.to_string());
        Ok(())
    }

    async fn leave(&self) -> Result<()> {
        self.left.store(true, Ordering::Release);
        self.local_packets.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::events::TrackKind;
    use futures_util::stream;

    #[tokio::test]
    async fn stream_source_ends_with_stream_closed() {
        let mut source = StreamSource::new(stream::iter(vec![
            Bytes::from_static(b"a"),
            Bytes::from_static(b"b"),
        ]));
        assert_eq!(&source.read_packet().await.unwrap()[..], b"a");
        assert_eq!(&source.read_packet().await.unwrap()[..], b"b");
        assert!(matches!(source.read_packet().await, Err(Error::StreamClosed)));
    }

    #[tokio::test]
    async fn channel_sink_is_non_blocking() {
        let (tx, mut rx) = mpsc::channel(1);
        let sink = ChannelSink::new(tx);
        sink.write_packet(Bytes::from_static(b"1")).unwrap();
        assert!(sink.write_packet(Bytes::from_static(b"2")).is_err());
        assert_eq!(&rx.recv().await.unwrap()[..], b"1");
        // Transient: the next write succeeds again
        sink.write_packet(Bytes::from_static(b"3")).unwrap();
    }

    fn descriptor(id: &str) -> TrackDescriptor {
        TrackDescriptor {
            track_id: id.to_string(),
            stream_id: "s".to_string(),
            kind: TrackKind::Audio,
            mime_type: "audio/opus".to_string(),
            clock_rate: 48000,
            channels: 1,
            payload_type: 111,
        }
    }

    #[tokio::test]
    async fn untaken_queues_do_not_accumulate() {
        let room = LoopbackRoom::new(4);
        let first = room.create_local_track(&descriptor("a")).unwrap();
        let _second = room.create_local_track(&descriptor("b")).unwrap();
        assert_eq!(room.pending_local_tracks(), 2);

        // "a" is gone, its queue goes on the next create
        drop(first);
        let _third = room.create_local_track(&descriptor("c")).unwrap();
        assert_eq!(room.pending_local_tracks(), 2);
        assert!(room.take_local_packets("a").is_none());

        room.leave().await.unwrap();
        assert_eq!(room.pending_local_tracks(), 0);
    }
}
