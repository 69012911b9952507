//! Error types shared by the mixer, codec adapters and room bridge.

use thiserror::Error;

use crate::rtp::RtpError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A PCM frame did not have the profile's sample count.
    #[error("frame size mismatch: expected {expected} samples, got {actual}")]
    FrameSize { expected: usize, actual: usize },

    #[error("rtp: {0}")]
    Rtp(#[from] RtpError),

    #[error("codec error: {0}")]
    Codec(String),

    /// The upstream packet stream ended and will not produce more packets.
    #[error("stream closed")]
    StreamClosed,

    #[error("sink error: {0}")]
    Sink(String),

    #[error("room error: {0}")]
    Room(String),
}

impl From<opus::Error> for Error {
    fn from(e: opus::Error) -> Self {
        Error::Codec(e.to_string())
    }
}
