//! audio - PCM frames, sinks and the Opus/RTP codec adapters
//!
//! Everything here works on one fixed profile (sample rate, channels,
//! frame duration) chosen when the mixer is built.

pub mod frame;
mod opus_codec;
pub mod stream_decoder;
pub mod stream_in;
pub mod stream_out;
pub mod writer;

pub use frame::{AudioFormat, Framer};
pub use opus_codec::{OpusDecoder, OpusEncoder};
pub use stream_decoder::StreamDecoder;
pub use stream_in::{MediaStreamIn, StreamStats};
pub use stream_out::MediaStreamOut;
pub use writer::{ChannelFrameWriter, FrameWriter, SwitchWriter};
