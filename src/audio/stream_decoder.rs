//! Generic stream decoder trait used by the inbound codec adapter.

use crate::error::Result;

/// A trait for audio stream decoders that convert one compressed packet
/// payload into interleaved i16 PCM samples in the mixer's profile.
///
/// Implementations keep their own streaming state (e.g. Opus history) and
/// are owned by exactly one inbound stream.
pub trait StreamDecoder: Send {
    /// Decode compressed audio bytes into interleaved i16 PCM samples.
    fn decode(&mut self, data: &[u8]) -> Result<Vec<i16>>;
}
