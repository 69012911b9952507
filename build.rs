use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    application: Application,
    audio: Audio,
    mixer: Mixer,
    room: Room,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Audio {
    sample_rate: u32,
    channels: u32,
    frame_duration_ms: u32,
    opus_bitrate: i32,
    payload_type: u8,
    rtp_clock_rate: u32,
}

#[derive(Deserialize)]
struct Mixer {
    input_queue_frames: usize,
    stall_policy: String,
    stall_hold_ticks: u32,
}

#[derive(Deserialize)]
struct Room {
    identity: String,
    ignored_tracks: String,
    publish_delay_ms: u64,
    packet_queue: usize,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    // 音频配置
    println!("cargo:rustc-env=AUDIO_SAMPLE_RATE={}", config.audio.sample_rate);
    println!("cargo:rustc-env=AUDIO_CHANNELS={}", config.audio.channels);
    println!("cargo:rustc-env=AUDIO_FRAME_DURATION_MS={}", config.audio.frame_duration_ms);
    println!("cargo:rustc-env=AUDIO_OPUS_BITRATE={}", config.audio.opus_bitrate);
    println!("cargo:rustc-env=AUDIO_PAYLOAD_TYPE={}", config.audio.payload_type);
    println!("cargo:rustc-env=AUDIO_RTP_CLOCK_RATE={}", config.audio.rtp_clock_rate);

    // 混音器配置
    println!("cargo:rustc-env=MIXER_INPUT_QUEUE_FRAMES={}", config.mixer.input_queue_frames);
    println!("cargo:rustc-env=MIXER_STALL_POLICY={}", config.mixer.stall_policy);
    println!("cargo:rustc-env=MIXER_STALL_HOLD_TICKS={}", config.mixer.stall_hold_ticks);

    // 房间配置
    println!("cargo:rustc-env=ROOM_IDENTITY={}", config.room.identity);
    println!("cargo:rustc-env=ROOM_IGNORED_TRACKS={}", config.room.ignored_tracks);
    println!("cargo:rustc-env=ROOM_PUBLISH_DELAY_MS={}", config.room.publish_delay_ms);
    println!("cargo:rustc-env=ROOM_PACKET_QUEUE={}", config.room.packet_queue);
}
