//! room - membership events, track lifecycle and the bridge tying them to the mixer

pub mod bridge;
pub mod events;
pub mod loopback;
pub mod track;

pub use bridge::RoomBridge;
pub use events::{Peer, RemoteTrack, RoomClient, RoomEvent, RoomInfo, TrackDescriptor, TrackKind};
pub use track::{LocalTrack, OutboundTrack, RemoteAudioTrack, TrackRegistry, TrackState};
