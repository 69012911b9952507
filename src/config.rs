use anyhow::{Context, Result, bail};

use crate::audio::AudioFormat;
use crate::mixer::StallPolicy;

/// Codec and framing profile shared by every adapter attached to one mixer.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u32,
    pub frame_duration_ms: u32,
    /// Opus bitrate in bits/s
    pub opus_bitrate: i32,
    /// RTP payload type negotiated for Opus (dynamic range)
    pub payload_type: u8,
    /// RTP timestamp clock; always 48000 for Opus (RFC 7587)
    pub rtp_clock_rate: u32,
}

impl AudioConfig {
    pub fn format(&self) -> AudioFormat {
        AudioFormat::new(self.sample_rate, self.channels, self.frame_duration_ms)
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 1,
            frame_duration_ms: 20,
            opus_bitrate: 32000,
            payload_type: 111,
            rtp_clock_rate: 48000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MixerConfig {
    /// Per-input queue depth; the oldest pending frame is dropped when full.
    pub input_queue_frames: usize,
    pub stall_policy: StallPolicy,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            input_queue_frames: 3,
            stall_policy: StallPolicy::Silence,
        }
    }
}

/// What to do with remote tracks the bridge does not mix (non-audio kinds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IgnoredTrackPolicy {
    #[default]
    Ignore,
    Unsubscribe,
}

impl IgnoredTrackPolicy {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "ignore" => Ok(Self::Ignore),
            "unsubscribe" => Ok(Self::Unsubscribe),
            other => bail!("Unsupported ignored_tracks policy: {}", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoomConfig {
    pub identity: String,
    pub ignored_tracks: IgnoredTrackPolicy,
    /// Delay before the outbound track is announced to the room
    pub publish_delay_ms: u64,
    /// Capacity of in-memory packet queues
    pub packet_queue: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            identity: "sip-bridge".to_string(),
            ignored_tracks: IgnoredTrackPolicy::Ignore,
            publish_delay_ms: 2000,
            packet_queue: 64,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub audio: AudioConfig,
    pub mixer: MixerConfig,
    pub room: RoomConfig,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self> {
        let audio = AudioConfig {
            sample_rate: env!("AUDIO_SAMPLE_RATE")
                .parse()
                .context("Failed to parse AUDIO_SAMPLE_RATE")?,
            channels: env!("AUDIO_CHANNELS")
                .parse()
                .context("Failed to parse AUDIO_CHANNELS")?,
            frame_duration_ms: env!("AUDIO_FRAME_DURATION_MS")
                .parse()
                .context("Failed to parse AUDIO_FRAME_DURATION_MS")?,
            opus_bitrate: env!("AUDIO_OPUS_BITRATE")
                .parse()
                .context("Failed to parse AUDIO_OPUS_BITRATE")?,
            payload_type: env!("AUDIO_PAYLOAD_TYPE")
                .parse()
                .context("Failed to parse AUDIO_PAYLOAD_TYPE")?,
            rtp_clock_rate: env!("AUDIO_RTP_CLOCK_RATE")
                .parse()
                .context("Failed to parse AUDIO_RTP_CLOCK_RATE")?,
        };

        let hold_ticks: u32 = env!("MIXER_STALL_HOLD_TICKS")
            .parse()
            .context("Failed to parse MIXER_STALL_HOLD_TICKS")?;
        let mixer = MixerConfig {
            input_queue_frames: env!("MIXER_INPUT_QUEUE_FRAMES")
                .parse()
                .context("Failed to parse MIXER_INPUT_QUEUE_FRAMES")?,
            stall_policy: StallPolicy::parse(env!("MIXER_STALL_POLICY"), hold_ticks)?,
        };

        let room = RoomConfig {
            identity: env!("ROOM_IDENTITY").to_string(),
            ignored_tracks: IgnoredTrackPolicy::parse(env!("ROOM_IGNORED_TRACKS"))?,
            publish_delay_ms: env!("ROOM_PUBLISH_DELAY_MS")
                .parse()
                .context("Failed to parse ROOM_PUBLISH_DELAY_MS")?,
            packet_queue: env!("ROOM_PACKET_QUEUE")
                .parse()
                .context("Failed to parse ROOM_PACKET_QUEUE")?,
        };

        let config = Self { audio, mixer, room };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        match self.audio.sample_rate {
            8000 | 12000 | 16000 | 24000 | 48000 => {}
            other => bail!("Opus does not support sample rate {}", other),
        }
        if !(1..=2).contains(&self.audio.channels) {
            bail!("Unsupported channel count: {}", self.audio.channels);
        }
        match self.audio.frame_duration_ms {
            10 | 20 | 40 | 60 => {}
            other => bail!("Unsupported frame duration: {}ms", other),
        }
        if self.mixer.input_queue_frames == 0 {
            bail!("input_queue_frames must be at least 1");
        }
        if self.room.packet_queue == 0 {
            bail!("packet_queue must be at least 1");
        }
        Ok(())
    }
}
