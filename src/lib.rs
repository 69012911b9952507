//! Bridges a single audio call into a multi-party room.
//!
//! Remote room tracks are decoded into a fixed-cadence mixer whose output
//! goes to a switchable sink; the call's own audio is encoded and published
//! back into the room as a new track.

pub mod audio;
pub mod config;
pub mod error;
pub mod mixer;
pub mod room;
pub mod rtp;
pub mod transport;

pub use error::{Error, Result};
pub use mixer::{InputHandle, Mixer, StallPolicy};
pub use room::RoomBridge;
