//! Fixed-duration linear PCM frames.

use std::time::Duration;

/// Describes the PCM frames exchanged between adapters and the mixer.
///
/// Samples are signed 16-bit, interleaved when `channels > 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u32,
    pub frame_duration_ms: u32,
}

impl AudioFormat {
    pub const fn new(sample_rate: u32, channels: u32, frame_duration_ms: u32) -> Self {
        Self {
            sample_rate,
            channels,
            frame_duration_ms,
        }
    }

    /// Number of samples per channel for one frame.
    pub fn frame_size_per_channel(&self) -> usize {
        (self.sample_rate * self.frame_duration_ms / 1000) as usize
    }

    /// Total number of interleaved i16 samples per frame.
    pub fn samples_per_frame(&self) -> usize {
        self.frame_size_per_channel() * self.channels as usize
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_millis(self.frame_duration_ms as u64)
    }

    pub fn silence(&self) -> Vec<i16> {
        vec![0i16; self.samples_per_frame()]
    }
}

/// Sample-wise add of `src` into the wide accumulator `acc`.
pub fn mix_into(acc: &mut [i32], src: &[i16]) {
    for (a, s) in acc.iter_mut().zip(src) {
        *a += *s as i32;
    }
}

/// Clamp accumulated samples back to the 16-bit range.
pub fn clip(acc: &[i32]) -> Vec<i16> {
    acc.iter()
        .map(|&s| s.clamp(i16::MIN as i32, i16::MAX as i32) as i16)
        .collect()
}

/// Splits an arbitrary-length PCM stream into whole frames, carrying the
/// remainder over to the next push.
pub struct Framer {
    frame_samples: usize,
    pending: Vec<i16>,
}

impl Framer {
    pub fn new(format: AudioFormat) -> Self {
        let frame_samples = format.samples_per_frame();
        Self {
            frame_samples,
            pending: Vec::with_capacity(frame_samples * 2),
        }
    }

    pub fn push(&mut self, pcm: &[i16]) -> Vec<Vec<i16>> {
        // Fast path: exactly one frame and nothing carried over
        if self.pending.is_empty() && pcm.len() == self.frame_samples {
            return vec![pcm.to_vec()];
        }

        self.pending.extend_from_slice(pcm);
        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_samples {
            frames.push(self.pending.drain(..self.frame_samples).collect());
        }
        frames
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
