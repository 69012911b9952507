//! N-to-1 PCM mixer driven by a fixed-cadence clock.
//!
//! Every tick pops the oldest pending frame of each enabled input, sums the
//! frames with 16-bit saturation and writes exactly one frame to the output
//! sink, even when nobody is talking.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use anyhow::bail;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::audio::frame::{clip, mix_into};
use crate::audio::{AudioFormat, FrameWriter, SwitchWriter};
use crate::config::MixerConfig;
use crate::error::{Error, Result};

/// What an input contributes on a tick where its producer delivered nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StallPolicy {
    /// Contribute silence until new frames arrive.
    #[default]
    Silence,
    /// Repeat the last real frame for up to `max_ticks` ticks, then silence.
    HoldLast { max_ticks: u32 },
}

impl StallPolicy {
    pub fn parse(s: &str, hold_ticks: u32) -> anyhow::Result<Self> {
        match s {
            "silence" => Ok(Self::Silence),
            "hold" => Ok(Self::HoldLast {
                max_ticks: hold_ticks,
            }),
            other => bail!("Unsupported stall policy: {}", other),
        }
    }
}

struct InputQueue {
    frames: VecDeque<Vec<i16>>,
    last: Option<Vec<i16>>,
    stalled_ticks: u32,
    dropped: u64,
}

struct Input {
    id: u64,
    frame_samples: usize,
    capacity: usize,
    queue: Mutex<InputQueue>,
    enabled: AtomicBool,
    removed: AtomicBool,
}

impl Input {
    fn new(id: u64, frame_samples: usize, capacity: usize) -> Self {
        Self {
            id,
            frame_samples,
            capacity,
            queue: Mutex::new(InputQueue {
                frames: VecDeque::with_capacity(capacity),
                last: None,
                stalled_ticks: 0,
                dropped: 0,
            }),
            enabled: AtomicBool::new(true),
            removed: AtomicBool::new(false),
        }
    }

    fn push(&self, frame: &[i16]) -> Result<()> {
        if frame.len() != self.frame_samples {
            return Err(Error::FrameSize {
                expected: self.frame_samples,
                actual: frame.len(),
            });
        }
        if self.removed.load(Ordering::Acquire) {
            return Ok(());
        }

        let mut q = self.queue.lock();
        if q.frames.len() >= self.capacity {
            q.frames.pop_front();
            q.dropped += 1;
            log::trace!("Mixer input {} full, dropped oldest frame", self.id);
        }
        q.frames.push_back(frame.to_vec());
        Ok(())
    }

    /// Take this tick's contribution, or `None` for silence.
    fn take(&self, policy: StallPolicy) -> Option<Vec<i16>> {
        let mut q = self.queue.lock();
        match q.frames.pop_front() {
            Some(frame) => {
                q.stalled_ticks = 0;
                if matches!(policy, StallPolicy::HoldLast { .. }) {
                    q.last = Some(frame.clone());
                }
                Some(frame)
            }
            None => match policy {
                StallPolicy::Silence => None,
                StallPolicy::HoldLast { max_ticks } => {
                    if q.stalled_ticks < max_ticks {
                        q.stalled_ticks += 1;
                        q.last.clone()
                    } else {
                        q.last = None;
                        None
                    }
                }
            },
        }
    }

    fn clear(&self) {
        let mut q = self.queue.lock();
        q.frames.clear();
        q.last = None;
    }
}

/// Producer-side handle to a mixer input.
///
/// Cloneable and cheap; the mixer keeps ownership of the input itself.
/// Writes after removal are dropped.
#[derive(Clone)]
pub struct InputHandle {
    input: Arc<Input>,
}

impl InputHandle {
    pub fn id(&self) -> u64 {
        self.input.id
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.input.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.input.enabled.load(Ordering::Acquire)
    }

    pub fn is_removed(&self) -> bool {
        self.input.removed.load(Ordering::Acquire)
    }

    /// Number of frames dropped because the queue was full.
    pub fn dropped_frames(&self) -> u64 {
        self.input.queue.lock().dropped
    }
}

impl FrameWriter for InputHandle {
    fn write_frame(&self, frame: &[i16]) -> Result<()> {
        self.input.push(frame)
    }
}

impl std::fmt::Debug for InputHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputHandle")
            .field("id", &self.input.id)
            .field("enabled", &self.is_enabled())
            .field("removed", &self.is_removed())
            .finish()
    }
}

pub struct Mixer {
    format: AudioFormat,
    config: MixerConfig,
    inputs: Mutex<Vec<Arc<Input>>>,
    next_id: AtomicU64,
    out: Arc<SwitchWriter>,
    ticks: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Mixer {
    pub fn new(out: Arc<SwitchWriter>, format: AudioFormat, config: MixerConfig) -> Arc<Self> {
        Arc::new(Self {
            format,
            config,
            inputs: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            out,
            ticks: AtomicU64::new(0),
            task: Mutex::new(None),
        })
    }

    /// Create a mixer and start its tick loop on the current tokio runtime.
    pub fn start_new(
        out: Arc<SwitchWriter>,
        format: AudioFormat,
        config: MixerConfig,
    ) -> Arc<Self> {
        let mixer = Self::new(out, format, config);
        mixer.start();
        mixer
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn output(&self) -> &Arc<SwitchWriter> {
        &self.out
    }

    /// Start ticking at the frame duration. Calling it twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }

        let period = self.format.frame_duration();
        let weak: Weak<Self> = Arc::downgrade(self);
        log::info!(
            "Mixer started: rate={}, ch={}, frame={}ms, samples={}",
            self.format.sample_rate,
            self.format.channels,
            self.format.frame_duration_ms,
            self.format.samples_per_frame(),
        );

        *task = Some(tokio::spawn(async move {
            // Absolute schedule: tick n fires at start + n * period
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let Some(mixer) = weak.upgrade() else {
                    break;
                };
                mixer.mix_once();
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            log::info!("Mixer stopped after {} ticks", self.ticks());
        }
    }

    pub fn add_input(&self) -> InputHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let input = Arc::new(Input::new(
            id,
            self.format.samples_per_frame(),
            self.config.input_queue_frames.max(1),
        ));
        self.inputs.lock().push(input.clone());
        log::debug!("Mixer input {} added", id);
        InputHandle { input }
    }

    pub fn remove_input(&self, handle: &InputHandle) {
        if handle.input.removed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inputs.lock().retain(|i| i.id != handle.input.id);
        handle.input.clear();
        log::debug!("Mixer input {} removed", handle.input.id);
    }

    pub fn input_count(&self) -> usize {
        self.inputs.lock().len()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Run one combine step and deliver the result to the output sink.
    pub fn mix_once(&self) -> Vec<i16> {
        let inputs: Vec<Arc<Input>> = self.inputs.lock().clone();

        let mut acc = vec![0i32; self.format.samples_per_frame()];
        for input in &inputs {
            if input.removed.load(Ordering::Acquire) {
                continue;
            }
            if !input.enabled.load(Ordering::Acquire) {
                // Keep a muted input from replaying stale audio when re-enabled
                input.clear();
                continue;
            }
            if let Some(frame) = input.take(self.config.stall_policy) {
                mix_into(&mut acc, &frame);
            }
        }
        let mixed = clip(&acc);

        let tick = self.ticks.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.out.write_frame(&mixed) {
            log::debug!("Mixer tick {}: output write failed: {}", tick, e);
        }
        mixed
    }
}

impl Drop for Mixer {
    fn drop(&mut self) {
        self.stop();
    }
}
