use std::f32::consts::PI;
use std::sync::Arc;

use room_audio_bridge::audio::{AudioFormat, ChannelFrameWriter, FrameWriter, MediaStreamOut};
use room_audio_bridge::config::Config;
use room_audio_bridge::room::loopback::{ChannelSink, LoopbackRoom, remote_track};
use room_audio_bridge::room::{Peer, RoomBridge, RoomEvent, RoomInfo, TrackKind};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};

// 正弦波发生器，模拟一个说话的参与者
struct Tone {
    format: AudioFormat,
    freq: f32,
    amplitude: f32,
    phase: f32,
}

impl Tone {
    fn new(format: AudioFormat, freq: f32, amplitude: f32) -> Self {
        Self {
            format,
            freq,
            amplitude,
            phase: 0.0,
        }
    }

    fn next_frame(&mut self) -> Vec<i16> {
        let channels = self.format.channels as usize;
        let step = 2.0 * PI * self.freq / self.format.sample_rate as f32;
        let mut frame = Vec::with_capacity(self.format.samples_per_frame());
        for _ in 0..self.format.frame_size_per_channel() {
            let s = (self.phase.sin() * self.amplitude) as i16;
            frame.extend(std::iter::repeat_n(s, channels));
            self.phase = (self.phase + step) % (2.0 * PI);
        }
        frame
    }
}

fn rms(frame: &[i16]) -> f64 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum: f64 = frame.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / frame.len() as f64).sqrt()
}

// 启动一个模拟的远端参与者：音调 → Opus/RTP → 通道 → 桥接的远端轨道
async fn spawn_remote_peer(
    config: &Config,
    events: &mpsc::Sender<RoomEvent>,
    peer: Peer,
    track_id: &str,
    freq: f32,
) -> anyhow::Result<()> {
    let (tx, track) = remote_track(track_id, config.room.packet_queue);
    let encoder = MediaStreamOut::new(&config.audio, Arc::new(ChannelSink::new(tx)))?;
    let mut tone = Tone::new(encoder.format(), freq, 6000.0);
    let period = encoder.format().frame_duration();

    events
        .send(RoomEvent::TrackAdded {
            kind: TrackKind::Audio,
            track,
            peer: peer.clone(),
        })
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    tokio::spawn(async move {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = encoder.write_frame(&tone.next_frame()) {
                log::warn!("Peer {} stopped sending: {}", peer.id, e);
                break;
            }
        }
    });
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载配置
    let config = Config::new()?;
    log::info!(
        "{} {} starting as {}",
        env!("APP_NAME"),
        env!("APP_VERSION"),
        config.room.identity
    );

    // 本地回环房间，代替真实的SFU
    let room = Arc::new(LoopbackRoom::new(config.room.packet_queue));
    let bridge = RoomBridge::new(config.clone(), room.clone());

    // 房间事件通道
    let (tx_event, rx_event) = mpsc::channel::<RoomEvent>(100);
    let bridge_clone = bridge.clone();
    tokio::spawn(async move {
        bridge_clone.run(rx_event).await;
    });

    // 混音输出，交给通话一侧
    let (mix_writer, mut rx_mix) = ChannelFrameWriter::channel(16);
    bridge.set_output(Some(Arc::new(mix_writer)));

    tx_event
        .send(RoomEvent::Joined(RoomInfo {
            room_id: "loopback".to_string(),
            local_peer: Peer::new("local", config.room.identity.clone()),
            peers: vec![Peer::new("p1", "alice"), Peer::new("p2", "bob")],
        }))
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    spawn_remote_peer(&config, &tx_event, Peer::new("p1", "alice"), "alice-mic", 440.0).await?;
    spawn_remote_peer(&config, &tx_event, Peer::new("p2", "bob"), "bob-mic", 660.0).await?;

    // 通话方的声音作为新轨道发布到房间
    let participant = bridge.new_participant()?;
    let Some(mut rx_published) = room.take_local_packets(participant.id()) else {
        anyhow::bail!("local track {} has no packet queue", participant.id());
    };
    log::info!(
        "Call audio goes out as {} track {} (pt {})",
        participant.descriptor().mime_type,
        participant.id(),
        participant.descriptor().payload_type
    );
    let voice = participant.writer();
    let mut voice_tone = Tone::new(config.audio.format(), 330.0, 4000.0);

    // 本地提示音，直接进入混音
    let prompt = Arc::new(bridge.new_track());
    let mut prompt_tone = Tone::new(config.audio.format(), 880.0, 2000.0);
    let prompt_frames: Vec<Vec<i16>> = (0..25).map(|_| prompt_tone.next_frame()).collect();
    let prompt_clone = prompt.clone();
    tokio::spawn(async move {
        time::sleep(time::Duration::from_secs(1)).await;
        if let Err(e) = prompt_clone.play_audio(&prompt_frames).await {
            log::warn!("Prompt failed: {}", e);
        }
    });

    let mut voice_interval = time::interval(config.audio.format().frame_duration());
    voice_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut report = time::interval(time::Duration::from_secs(1));
    let mut frames = 0u64;
    let mut level = 0.0f64;
    let mut packets = 0u64;

    log::info!("Bridge running, press Ctrl+C to stop");
    loop {
        tokio::select! {
            // 监听 Ctrl+C 信号
            _ = signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                break;
            }

            // 通话方说话
            _ = voice_interval.tick() => {
                if let Err(e) = voice.write_frame(&voice_tone.next_frame()) {
                    log::warn!("Failed to send call audio: {}", e);
                }
            }

            // 房间混音
            Some(frame) = rx_mix.recv() => {
                frames += 1;
                level = level.max(rms(&frame));
            }

            // 发布到房间的RTP包
            Some(packet) = rx_published.recv() => {
                packets += 1;
                log::trace!("Published packet: {} bytes", packet.len());
            }

            _ = report.tick() => {
                log::info!(
                    "mix: {} frames, peak rms {:.0}; tracks: {}; published: {} packets",
                    frames,
                    level,
                    bridge.track_count(),
                    packets
                );
                frames = 0;
                level = 0.0;
            }
        }
    }

    participant.close();
    prompt.close();
    bridge.close().await?;
    drop(tx_event);
    Ok(())
}
