//! Track lifecycle: the unit binding one audio stream to the mixing core.
//!
//! - `RemoteAudioTrack`: remote packets → decode task → mixer input
//! - `LocalTrack`: frames produced in-process → mixer input
//! - `OutboundTrack`: frames → encode adapter → published local track

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use uuid::Uuid;

use super::events::{Peer, RemoteTrack, RoomClient, TrackDescriptor, TrackKind};
use crate::audio::{AudioFormat, FrameWriter, MediaStreamIn, MediaStreamOut, SwitchWriter};
use crate::config::AudioConfig;
use crate::error::{Error, Result};
use crate::mixer::{InputHandle, Mixer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Created,
    Active,
    Closing,
    Closed,
}

impl TrackState {
    fn is_terminal(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

// ======================== Remote audio track ========================

struct RemoteInner {
    id: String,
    peer: Peer,
    state: Mutex<TrackState>,
    input: InputHandle,
    mixer: Arc<Mixer>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RemoteInner {
    /// Move to `Closed`. The first caller wins, later calls return false.
    fn shutdown(&self, abort_task: bool) -> bool {
        {
            let mut state = self.state.lock();
            if state.is_terminal() {
                return false;
            }
            *state = TrackState::Closing;
        }

        let task = self.task.lock().take();
        if abort_task {
            if let Some(task) = task {
                task.abort();
            }
        }
        self.mixer.remove_input(&self.input);

        *self.state.lock() = TrackState::Closed;
        log::info!("Track {} of peer {} closed", self.id, self.peer.id);
        true
    }
}

#[derive(Default)]
struct Tracks {
    by_id: HashMap<String, RemoteAudioTrack>,
    closed: bool,
}

/// Remote tracks currently bridged, keyed by track id.
///
/// Once closed the registry refuses new tracks, so nothing can be added
/// after the final drain.
#[derive(Clone, Default)]
pub struct TrackRegistry {
    tracks: Arc<Mutex<Tracks>>,
}

impl TrackRegistry {
    /// Insert `track`, returning the one it replaced.
    ///
    /// A closed registry hands `track` back as the error.
    pub fn insert(
        &self,
        track: RemoteAudioTrack,
    ) -> std::result::Result<Option<RemoteAudioTrack>, RemoteAudioTrack> {
        let mut tracks = self.tracks.lock();
        if tracks.closed {
            return Err(track);
        }
        Ok(tracks.by_id.insert(track.id().to_string(), track))
    }

    pub fn get(&self, id: &str) -> Option<RemoteAudioTrack> {
        self.tracks.lock().by_id.get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<RemoteAudioTrack> {
        self.tracks.lock().by_id.remove(id)
    }

    /// Remove every track of `peer_id`.
    pub fn remove_peer(&self, peer_id: &str) -> Vec<RemoteAudioTrack> {
        let mut tracks = self.tracks.lock();
        let ids: Vec<String> = tracks
            .by_id
            .values()
            .filter(|t| t.peer().id == peer_id)
            .map(|t| t.id().to_string())
            .collect();
        ids.iter().filter_map(|id| tracks.by_id.remove(id)).collect()
    }

    /// Refuse further inserts and hand back everything still registered.
    pub fn close(&self) -> Vec<RemoteAudioTrack> {
        let mut tracks = self.tracks.lock();
        tracks.closed = true;
        tracks.by_id.drain().map(|(_, t)| t).collect()
    }

    pub fn len(&self) -> usize {
        self.tracks.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove_if_same(&self, track: &RemoteAudioTrack) {
        let mut tracks = self.tracks.lock();
        if tracks
            .by_id
            .get(track.id())
            .is_some_and(|t| Arc::ptr_eq(&t.inner, &track.inner))
        {
            tracks.by_id.remove(track.id());
        }
    }
}

/// A remote participant's audio, decoded into its own mixer input.
#[derive(Clone)]
pub struct RemoteAudioTrack {
    inner: Arc<RemoteInner>,
}

impl RemoteAudioTrack {
    /// Wire a fresh mixer input and spawn the decode task for `remote`.
    ///
    /// When the upstream stream fails the track closes itself and leaves
    /// `registry`.
    pub fn spawn(
        mixer: &Arc<Mixer>,
        audio: &AudioConfig,
        remote: RemoteTrack,
        peer: Peer,
        registry: &TrackRegistry,
    ) -> Result<Self> {
        let RemoteTrack { id, mut source } = remote;
        let input = mixer.add_input();
        let track = Self {
            inner: Arc::new(RemoteInner {
                id,
                peer,
                state: Mutex::new(TrackState::Created),
                input: input.clone(),
                mixer: mixer.clone(),
                task: Mutex::new(None),
            }),
        };

        let mut stream = match MediaStreamIn::opus(mixer.format(), audio.payload_type, input) {
            Ok(stream) => stream,
            Err(e) => {
                track.inner.shutdown(false);
                return Err(e);
            }
        };
        *track.inner.state.lock() = TrackState::Active;

        let task = {
            let track = track.clone();
            let registry = registry.clone();
            tokio::spawn(async move {
                let end = stream.run(source.as_mut()).await;
                log::info!(
                    "Track {} of peer {}: upstream ended ({}), tearing down",
                    track.id(),
                    track.peer().id,
                    end
                );
                track.inner.shutdown(false);
                registry.remove_if_same(&track);
            })
        };

        if track.state().is_terminal() {
            task.abort();
        } else {
            *track.inner.task.lock() = Some(task);
        }
        log::info!(
            "Track {} of peer {} active on mixer input {}",
            track.id(),
            track.peer().id,
            track.input().id()
        );
        Ok(track)
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn peer(&self) -> &Peer {
        &self.inner.peer
    }

    pub fn state(&self) -> TrackState {
        *self.inner.state.lock()
    }

    pub fn input(&self) -> &InputHandle {
        &self.inner.input
    }

    /// Stop the decode task and remove the mixer input. Idempotent.
    pub fn close(&self) {
        self.inner.shutdown(true);
    }
}

impl fmt::Debug for RemoteAudioTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteAudioTrack")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer.id)
            .field("state", &self.state())
            .finish()
    }
}

// ======================== Local track ========================

/// A mixer input fed directly by local code (prompts, tones, test audio).
pub struct LocalTrack {
    input: InputHandle,
    mixer: Arc<Mixer>,
    format: AudioFormat,
    state: Mutex<TrackState>,
}

impl LocalTrack {
    pub fn new(mixer: &Arc<Mixer>) -> Self {
        Self {
            input: mixer.add_input(),
            mixer: mixer.clone(),
            format: mixer.format(),
            state: Mutex::new(TrackState::Active),
        }
    }

    pub fn state(&self) -> TrackState {
        *self.state.lock()
    }

    pub fn input(&self) -> &InputHandle {
        &self.input
    }

    /// Write `frames` paced at the frame duration, first frame immediately.
    ///
    /// Stops early without error if the track is closed meanwhile.
    pub async fn play_audio(&self, frames: &[Vec<i16>]) -> Result<()> {
        let mut interval = time::interval(self.format.frame_duration());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        for frame in frames {
            interval.tick().await;
            if self.state().is_terminal() {
                return Ok(());
            }
            self.input.write_frame(frame)?;
        }
        Ok(())
    }

    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.is_terminal() {
            return;
        }
        self.mixer.remove_input(&self.input);
        *state = TrackState::Closed;
    }
}

impl FrameWriter for LocalTrack {
    fn write_frame(&self, frame: &[i16]) -> Result<()> {
        self.input.write_frame(frame)
    }
}

impl Drop for LocalTrack {
    fn drop(&mut self) {
        self.close();
    }
}

// ======================== Outbound track ========================

struct OutboundInner {
    /// `None` once the track is closed and the packet stream released.
    stream: Mutex<Option<MediaStreamOut>>,
    enabled: AtomicBool,
}

impl FrameWriter for OutboundInner {
    fn write_frame(&self, frame: &[i16]) -> Result<()> {
        let guard = self.stream.lock();
        let Some(stream) = guard.as_ref() else {
            return Err(Error::Sink("outbound track closed".into()));
        };
        if !self.enabled.load(Ordering::Acquire) {
            return Ok(());
        }
        stream.write_frame(frame)
    }
}

/// The bridged call's own voice, published into the room as a new track.
pub struct OutboundTrack {
    descriptor: TrackDescriptor,
    inner: Arc<OutboundInner>,
    state: Mutex<TrackState>,
    publish_task: Mutex<Option<JoinHandle<()>>>,
    /// Switches currently pointed at this track's writer.
    routes: Mutex<Vec<Weak<SwitchWriter>>>,
}

impl OutboundTrack {
    /// Build the encode path and announce the track after `publish_delay`.
    pub fn create(
        client: Arc<dyn RoomClient>,
        audio: &AudioConfig,
        publish_delay: Duration,
    ) -> Result<Self> {
        let descriptor = TrackDescriptor {
            track_id: Uuid::new_v4().to_string(),
            stream_id: Uuid::new_v4().to_string(),
            kind: TrackKind::Audio,
            mime_type: "audio/opus".to_string(),
            clock_rate: audio.rtp_clock_rate,
            channels: audio.channels,
            payload_type: audio.payload_type,
        };

        let sink = client.create_local_track(&descriptor)?;
        let inner = Arc::new(OutboundInner {
            stream: Mutex::new(Some(MediaStreamOut::new(audio, sink)?)),
            enabled: AtomicBool::new(true),
        });

        let publish_task = {
            let descriptor = descriptor.clone();
            tokio::spawn(async move {
                time::sleep(publish_delay).await;
                log::info!(
                    "Publishing track {}",
                    serde_json::to_string(&descriptor).unwrap_or_default()
                );
                let track_id = descriptor.track_id.clone();
                if let Err(e) = client.publish(descriptor, true).await {
                    log::error!("Failed to publish track {}: {}", track_id, e);
                }
            })
        };

        Ok(Self {
            descriptor,
            inner,
            state: Mutex::new(TrackState::Active),
            publish_task: Mutex::new(Some(publish_task)),
            routes: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> &str {
        &self.descriptor.track_id
    }

    pub fn descriptor(&self) -> &TrackDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> TrackState {
        *self.state.lock()
    }

    /// Frames written here are encoded and sent to the room.
    pub fn writer(&self) -> Arc<dyn FrameWriter> {
        self.inner.clone()
    }

    /// Point `switch` at this track; closing the track unsets it again.
    pub fn route_from(&self, switch: &Arc<SwitchWriter>) {
        switch.set(Some(self.writer()));
        let mut routes = self.routes.lock();
        routes.retain(|r| r.strong_count() > 0);
        routes.push(Arc::downgrade(switch));
    }

    /// A disabled track drops frames without encoding them.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Release);
    }

    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.is_terminal() {
            return;
        }
        *state = TrackState::Closing;
        if let Some(task) = self.publish_task.lock().take() {
            task.abort();
        }

        let writer = self.writer();
        for switch in self.routes.lock().drain(..).filter_map(|r| r.upgrade()) {
            switch.clear_if(&writer);
        }
        // Dropping the adapter drops the room's packet sink
        drop(self.inner.stream.lock().take());
        *state = TrackState::Closed;
        log::info!("Outbound track {} closed", self.descriptor.track_id);
    }
}

impl FrameWriter for OutboundTrack {
    fn write_frame(&self, frame: &[i16]) -> Result<()> {
        self.inner.write_frame(frame)
    }
}

impl Drop for OutboundTrack {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MixerConfig;
    use crate::room::loopback::{LoopbackRoom, remote_track};
    use bytes::Bytes;
    use tokio::sync::mpsc::error::TryRecvError;

    fn mixer() -> Arc<Mixer> {
        let audio = AudioConfig::default();
        Mixer::new(Arc::new(SwitchWriter::new()), audio.format(), MixerConfig::default())
    }

    #[tokio::test]
    async fn remote_track_tears_down_when_upstream_ends() {
        let mixer = mixer();
        let registry = TrackRegistry::default();
        let (tx, remote) = remote_track("t1", 8);
        let track = RemoteAudioTrack::spawn(
            &mixer,
            &AudioConfig::default(),
            remote,
            Peer::new("p1", "alice"),
            &registry,
        )
        .unwrap();
        registry.insert(track.clone()).unwrap();

        assert_eq!(track.state(), TrackState::Active);
        assert_eq!(mixer.input_count(), 1);

        tx.send(Bytes::from_static(b"garbage")).await.unwrap();
        drop(tx);
        for _ in 0..100 {
            if track.state() == TrackState::Closed && registry.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(track.state(), TrackState::Closed);
        assert!(track.input().is_removed());
        assert_eq!(mixer.input_count(), 0);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_removes_input() {
        let mixer = mixer();
        let registry = TrackRegistry::default();
        let (_tx, remote) = remote_track("t2", 8);
        let track = RemoteAudioTrack::spawn(
            &mixer,
            &AudioConfig::default(),
            remote,
            Peer::new("p1", "alice"),
            &registry,
        )
        .unwrap();

        track.close();
        track.close();
        assert_eq!(track.state(), TrackState::Closed);
        assert_eq!(mixer.input_count(), 0);
    }

    #[tokio::test]
    async fn registry_removes_by_peer() {
        let mixer = mixer();
        let registry = TrackRegistry::default();
        let mut senders = Vec::new();
        for (track_id, peer) in [("a", "p1"), ("b", "p1"), ("c", "p2")] {
            let (tx, remote) = remote_track(track_id, 1);
            senders.push(tx);
            let track = RemoteAudioTrack::spawn(
                &mixer,
                &AudioConfig::default(),
                remote,
                Peer::new(peer, peer),
                &registry,
            )
            .unwrap();
            registry.insert(track).unwrap();
        }

        let removed = registry.remove_peer("p1");
        assert_eq!(removed.len(), 2);
        assert!(removed.iter().all(|t| t.peer().id == "p1"));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("c").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn local_track_paces_frames() {
        let mixer = mixer();
        let track = LocalTrack::new(&mixer);
        let n = mixer.format().samples_per_frame();
        let frames = vec![vec![1i16; n], vec![2; n], vec![3; n]];

        let start = time::Instant::now();
        track.play_audio(&frames).await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(40) && elapsed < Duration::from_millis(45));

        assert_eq!(mixer.mix_once()[0], 1);
        assert_eq!(mixer.mix_once()[0], 2);
        assert_eq!(mixer.mix_once()[0], 3);

        drop(track);
        assert_eq!(mixer.input_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn outbound_track_publishes_after_delay() {
        let room = Arc::new(LoopbackRoom::new(16));
        let track =
            OutboundTrack::create(room.clone(), &AudioConfig::default(), Duration::from_secs(2))
                .unwrap();
        let mut packets = room.take_local_packets(track.id()).unwrap();

        let silence = AudioConfig::default().format().silence();
        track.write_frame(&silence).unwrap();
        assert!(packets.try_recv().is_ok());

        track.set_enabled(false);
        track.write_frame(&silence).unwrap();
        assert!(packets.try_recv().is_err());

        assert!(room.published().is_empty());
        time::sleep(Duration::from_millis(2100)).await;
        let published = room.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0.track_id, track.id());
        assert!(published[0].1);

        track.close();
        assert!(track.write_frame(&silence).is_err());
    }

    #[tokio::test]
    async fn closed_registry_hands_tracks_back() {
        let mixer = mixer();
        let registry = TrackRegistry::default();
        let (_tx1, first) = remote_track("a", 1);
        let track = RemoteAudioTrack::spawn(
            &mixer,
            &AudioConfig::default(),
            first,
            Peer::new("p1", "alice"),
            &registry,
        )
        .unwrap();
        registry.insert(track).unwrap();

        let drained = registry.close();
        assert_eq!(drained.len(), 1);
        assert!(registry.is_empty());

        let (_tx2, late) = remote_track("b", 1);
        let late = RemoteAudioTrack::spawn(
            &mixer,
            &AudioConfig::default(),
            late,
            Peer::new("p1", "alice"),
            &registry,
        )
        .unwrap();
        let refused = registry.insert(late).unwrap_err();
        assert_eq!(refused.id(), "b");
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn outbound_close_releases_sink_and_route() {
        let room = Arc::new(LoopbackRoom::new(16));
        let track =
            OutboundTrack::create(room.clone(), &AudioConfig::default(), Duration::from_secs(2))
                .unwrap();
        let mut packets = room.take_local_packets(track.id()).unwrap();

        let switch = Arc::new(SwitchWriter::new());
        track.route_from(&switch);
        switch.write_frame(&AudioConfig::default().format().silence()).unwrap();
        assert!(packets.try_recv().is_ok());

        track.close();
        assert_eq!(track.state(), TrackState::Closed);
        assert!(matches!(packets.try_recv(), Err(TryRecvError::Disconnected)));
        assert!(switch.get().is_none());
    }

    #[tokio::test]
    async fn closing_one_track_keeps_foreign_route() {
        let room = Arc::new(LoopbackRoom::new(16));
        let audio = AudioConfig::default();
        let first = OutboundTrack::create(room.clone(), &audio, Duration::from_secs(2)).unwrap();
        let second = OutboundTrack::create(room.clone(), &audio, Duration::from_secs(2)).unwrap();

        let switch = Arc::new(SwitchWriter::new());
        first.route_from(&switch);
        second.route_from(&switch);
        first.close();

        let current = switch.get().unwrap();
        assert!(Arc::ptr_eq(&current, &second.writer()));
    }
}
