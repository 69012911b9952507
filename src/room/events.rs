use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::transport::{PacketSink, PacketSource};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub id: String,
    pub name: String,
}

impl Peer {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomInfo {
    pub room_id: String,
    pub local_peer: Peer,
    #[serde(default)]
    pub peers: Vec<Peer>,
}

/// A subscribed remote track together with its packet stream.
pub struct RemoteTrack {
    pub id: String,
    pub source: Box<dyn PacketSource>,
}

impl RemoteTrack {
    pub fn new(id: impl Into<String>, source: impl PacketSource + 'static) -> Self {
        Self {
            id: id.into(),
            source: Box::new(source),
        }
    }
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack").field("id", &self.id).finish()
    }
}

/// Membership and track notifications from the room collaborator.
#[derive(Debug)]
pub enum RoomEvent {
    /// The local participant joined the room.
    Joined(RoomInfo),
    PeerJoined(Peer),
    PeerLeft(Peer),
    TrackAdded {
        kind: TrackKind,
        track: RemoteTrack,
        peer: Peer,
    },
    TrackRemoved {
        track_id: String,
        peer: Peer,
    },
    Error(String),
}

/// Announces a locally produced track to the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackDescriptor {
    pub track_id: String,
    pub stream_id: String,
    pub kind: TrackKind,
    pub mime_type: String,
    pub clock_rate: u32,
    pub channels: u32,
    pub payload_type: u8,
}

/// The room/SFU SDK as seen by the bridge.
#[async_trait]
pub trait RoomClient: Send + Sync {
    /// Packet sink for a local track; packets written before the track is
    /// published may be discarded by the implementation.
    fn create_local_track(&self, descriptor: &TrackDescriptor) -> Result<Arc<dyn PacketSink>>;

    async fn publish(&self, descriptor: TrackDescriptor, enabled: bool) -> Result<()>;

    async fn unsubscribe(&self, track_id: &str) -> Result<()>;

    async fn leave(&self) -> Result<()>;
}
