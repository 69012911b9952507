//! The room bridge: membership events in, track lifecycle out.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::events::{Peer, RemoteTrack, RoomClient, RoomEvent, RoomInfo, TrackKind};
use super::track::{LocalTrack, OutboundTrack, RemoteAudioTrack, TrackRegistry};
use crate::audio::{FrameWriter, SwitchWriter};
use crate::config::{Config, IgnoredTrackPolicy};
use crate::error::{Error, Result};
use crate::mixer::Mixer;

pub struct RoomBridge {
    config: Config,
    client: Arc<dyn RoomClient>,
    mixer: Arc<Mixer>,
    out: Arc<SwitchWriter>,
    tracks: TrackRegistry,
    room: Mutex<Option<RoomInfo>>,
    closed: AtomicBool,
}

impl RoomBridge {
    /// Build the mixer for `config.audio` and start ticking.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(config: Config, client: Arc<dyn RoomClient>) -> Arc<Self> {
        let bridge = Self::new_idle(config, client);
        bridge.mixer.start();
        bridge
    }

    /// Like `new` but without the tick loop; drive it with `mixer().mix_once()`.
    pub fn new_idle(config: Config, client: Arc<dyn RoomClient>) -> Arc<Self> {
        let out = Arc::new(SwitchWriter::new());
        let mixer = Mixer::new(out.clone(), config.audio.format(), config.mixer.clone());
        Arc::new(Self {
            config,
            client,
            mixer,
            out,
            tracks: TrackRegistry::default(),
            room: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn mixer(&self) -> &Arc<Mixer> {
        &self.mixer
    }

    pub fn room(&self) -> Option<RoomInfo> {
        self.room.lock().clone()
    }

    /// Where the mixed room audio currently goes.
    pub fn output(&self) -> Option<Arc<dyn FrameWriter>> {
        self.out.get()
    }

    pub fn set_output(&self, out: Option<Arc<dyn FrameWriter>>) {
        self.out.set(out);
    }

    pub fn track(&self, id: &str) -> Option<RemoteAudioTrack> {
        self.tracks.get(id)
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Consume events until the channel closes or the bridge is closed.
    pub async fn run(&self, mut events: mpsc::Receiver<RoomEvent>) {
        while let Some(event) = events.recv().await {
            if self.closed.load(Ordering::Acquire) {
                break;
            }
            self.dispatch(event).await;
        }
        log::info!("RoomBridge event loop finished");
    }

    pub async fn dispatch(&self, event: RoomEvent) {
        match event {
            RoomEvent::Joined(info) => {
                log::info!(
                    "Joined room {} as {} ({} peers)",
                    info.room_id,
                    info.local_peer.id,
                    info.peers.len()
                );
                *self.room.lock() = Some(info);
            }
            RoomEvent::PeerJoined(peer) => {
                log::info!("Peer joined: {} ({})", peer.id, peer.name);
            }
            RoomEvent::PeerLeft(peer) => {
                let tracks = self.tracks.remove_peer(&peer.id);
                log::info!("Peer left: {}, closing {} track(s)", peer.id, tracks.len());
                for track in tracks {
                    track.close();
                }
            }
            RoomEvent::TrackAdded { kind, track, peer } => {
                self.on_track_added(kind, track, peer).await;
            }
            RoomEvent::TrackRemoved { track_id, peer } => match self.tracks.remove(&track_id) {
                Some(track) => {
                    log::info!("Track {} of peer {} removed", track_id, peer.id);
                    track.close();
                }
                None => log::debug!("TrackRemoved for unknown track {}", track_id),
            },
            RoomEvent::Error(err) => {
                log::error!("Room SDK error: {}", err);
            }
        }
    }

    async fn on_track_added(&self, kind: TrackKind, track: RemoteTrack, peer: Peer) {
        log::info!("onTrackAdded: kind={:?}, track={}, peer={}", kind, track.id, peer.id);
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        if kind != TrackKind::Audio {
            match self.config.room.ignored_tracks {
                IgnoredTrackPolicy::Ignore => {
                    log::debug!("Ignoring {:?} track {}", kind, track.id);
                }
                IgnoredTrackPolicy::Unsubscribe => {
                    if let Err(e) = self.client.unsubscribe(&track.id).await {
                        log::warn!("Failed to unsubscribe {}: {}", track.id, e);
                    }
                }
            }
            return;
        }

        let track_id = track.id.clone();
        match RemoteAudioTrack::spawn(&self.mixer, &self.config.audio, track, peer, &self.tracks)
        {
            Ok(audio_track) => match self.tracks.insert(audio_track) {
                Ok(Some(previous)) => {
                    log::warn!("Track {} re-added, closing previous instance", track_id);
                    previous.close();
                }
                Ok(None) => {}
                // close() drained the registry while the track was spawning
                Err(late) => {
                    log::debug!("Bridge closed, dropping track {}", track_id);
                    late.close();
                }
            },
            Err(e) => log::error!("Failed to bridge track {}: {}", track_id, e),
        }
    }

    /// A mixer input for audio produced locally.
    pub fn new_track(&self) -> LocalTrack {
        LocalTrack::new(&self.mixer)
    }

    /// Create the outbound track carrying the call's voice into the room.
    pub fn new_participant(&self) -> Result<OutboundTrack> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Room("bridge closed".into()));
        }
        OutboundTrack::create(
            self.client.clone(),
            &self.config.audio,
            Duration::from_millis(self.config.room.publish_delay_ms),
        )
    }

    /// Send the mixed room audio into `track` (e.g. for a recording leg).
    ///
    /// Closing `track` unsets the output again if it still points there.
    pub fn route_mix_to(&self, track: &OutboundTrack) {
        track.route_from(&self.out);
    }

    /// Close every track, stop mixing and leave the room. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let tracks = self.tracks.close();
        log::info!("Closing RoomBridge with {} track(s)", tracks.len());
        for track in tracks {
            track.close();
        }
        self.mixer.stop();
        self.out.set(None);
        self.client.leave().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::loopback::{LoopbackRoom, remote_track};
    use crate::room::track::TrackState;

    fn bridge(config: Config) -> (Arc<RoomBridge>, Arc<LoopbackRoom>) {
        let room = Arc::new(LoopbackRoom::new(16));
        (RoomBridge::new_idle(config, room.clone()), room)
    }

    fn added(kind: TrackKind, id: &str, peer: &str) -> (mpsc::Sender<bytes::Bytes>, RoomEvent) {
        let (tx, track) = remote_track(id, 8);
        (
            tx,
            RoomEvent::TrackAdded {
                kind,
                track,
                peer: Peer::new(peer, peer),
            },
        )
    }

    #[tokio::test]
    async fn audio_tracks_get_inputs_and_leave_closes_them() {
        let (bridge, _room) = bridge(Config::default());
        let (_a, ev) = added(TrackKind::Audio, "a1", "alice");
        bridge.dispatch(ev).await;
        let (_b, ev) = added(TrackKind::Audio, "b1", "bob");
        bridge.dispatch(ev).await;

        assert_eq!(bridge.track_count(), 2);
        assert_eq!(bridge.mixer().input_count(), 2);

        let alice = bridge.track("a1").unwrap();
        bridge.dispatch(RoomEvent::PeerLeft(Peer::new("alice", "alice"))).await;
        assert_eq!(alice.state(), TrackState::Closed);
        assert_eq!(bridge.track_count(), 1);
        assert_eq!(bridge.mixer().input_count(), 1);

        bridge
            .dispatch(RoomEvent::TrackRemoved {
                track_id: "b1".into(),
                peer: Peer::new("bob", "bob"),
            })
            .await;
        assert_eq!(bridge.track_count(), 0);
        assert_eq!(bridge.mixer().input_count(), 0);
    }

    #[tokio::test]
    async fn non_audio_tracks_follow_policy() {
        let (bridge, room) = bridge(Config::default());
        let (_v, ev) = added(TrackKind::Video, "v1", "alice");
        bridge.dispatch(ev).await;
        assert_eq!(bridge.track_count(), 0);
        assert!(room.unsubscribed().is_empty());

        let mut config = Config::default();
        config.room.ignored_tracks = IgnoredTrackPolicy::Unsubscribe;
        let (bridge, room) = self::bridge(config);
        let (_v, ev) = added(TrackKind::Video, "v2", "alice");
        bridge.dispatch(ev).await;
        assert_eq!(bridge.track_count(), 0);
        assert_eq!(bridge.mixer().input_count(), 0);
        assert_eq!(room.unsubscribed(), vec!["v2".to_string()]);
    }

    #[tokio::test]
    async fn re_added_track_replaces_previous() {
        let (bridge, _room) = bridge(Config::default());
        let (_t1, ev) = added(TrackKind::Audio, "a1", "alice");
        bridge.dispatch(ev).await;
        let first = bridge.track("a1").unwrap();
        let (_t2, ev) = added(TrackKind::Audio, "a1", "alice");
        bridge.dispatch(ev).await;

        assert_eq!(first.state(), TrackState::Closed);
        assert_eq!(bridge.track_count(), 1);
        assert_eq!(bridge.mixer().input_count(), 1);
    }

    #[tokio::test]
    async fn joined_and_error_events() {
        let (bridge, _room) = bridge(Config::default());
        bridge
            .dispatch(RoomEvent::Joined(RoomInfo {
                room_id: "r1".into(),
                local_peer: Peer::new("me", "sip-bridge"),
                peers: vec![],
            }))
            .await;
        bridge.dispatch(RoomEvent::Error("boom".into())).await;
        bridge.dispatch(RoomEvent::PeerJoined(Peer::new("x", "x"))).await;
        assert_eq!(bridge.room().unwrap().room_id, "r1");
    }

    #[tokio::test]
    async fn close_releases_everything() {
        let (bridge, room) = bridge(Config::default());
        let (_a, ev) = added(TrackKind::Audio, "a1", "alice");
        bridge.dispatch(ev).await;
        let track = bridge.track("a1").unwrap();

        bridge.close().await.unwrap();
        bridge.close().await.unwrap();
        assert!(room.has_left());
        assert_eq!(track.state(), TrackState::Closed);
        assert_eq!(bridge.mixer().input_count(), 0);
        assert!(bridge.output().is_none());
        assert!(bridge.new_participant().is_err());

        let (_b, ev) = added(TrackKind::Audio, "b1", "bob");
        bridge.dispatch(ev).await;
        assert_eq!(bridge.track_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn close_racing_track_added_leaves_no_inputs() {
        for i in 0..200 {
            let (bridge, _room) = bridge(Config::default());
            let (_tx, ev) = added(TrackKind::Audio, &format!("t{}", i), "alice");

            let adder = {
                let bridge = bridge.clone();
                tokio::spawn(async move { bridge.dispatch(ev).await })
            };
            let closer = {
                let bridge = bridge.clone();
                tokio::spawn(async move { bridge.close().await })
            };
            adder.await.unwrap();
            closer.await.unwrap().unwrap();

            assert_eq!(bridge.track_count(), 0);
            assert_eq!(bridge.mixer().input_count(), 0);
        }
    }

    #[tokio::test]
    async fn closing_routed_participant_unsets_output() {
        let (bridge, room) = bridge(Config::default());
        let participant = bridge.new_participant().unwrap();
        let mut packets = room.take_local_packets(participant.id()).unwrap();

        bridge.route_mix_to(&participant);
        assert!(bridge.output().is_some());
        bridge.mixer().mix_once();
        assert!(packets.try_recv().is_ok());

        participant.close();
        assert!(bridge.output().is_none());
        assert!(matches!(
            packets.try_recv(),
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected)
        ));
    }
}
