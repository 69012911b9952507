//! PCM frame sinks and the switchable output used by the mixer.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::{Error, Result};

/// A destination for fixed-size PCM frames.
///
/// Implementations must not block: the mixer calls `write_frame` from its
/// tick and a slow consumer would stall every participant.
pub trait FrameWriter: Send + Sync {
    fn write_frame(&self, frame: &[i16]) -> Result<()>;
}

/// Redirectable output for the mixed signal.
///
/// Delivery happens while holding the destination lock, so `set` returns
/// only after a delivery that already started has finished on the old
/// destination. Every frame therefore lands on exactly one destination.
#[derive(Default)]
pub struct SwitchWriter {
    current: Mutex<Option<Arc<dyn FrameWriter>>>,
}

impl SwitchWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, dest: Option<Arc<dyn FrameWriter>>) {
        let mut current = self.current.lock();
        log::debug!(
            "SwitchWriter redirect: {} -> {}",
            if current.is_some() { "set" } else { "unset" },
            if dest.is_some() { "set" } else { "unset" },
        );
        *current = dest;
    }

    pub fn get(&self) -> Option<Arc<dyn FrameWriter>> {
        self.current.lock().clone()
    }

    /// Unset the destination if it is still `dest`. Returns whether it was.
    pub fn clear_if(&self, dest: &Arc<dyn FrameWriter>) -> bool {
        let mut current = self.current.lock();
        if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, dest)) {
            *current = None;
            log::debug!("SwitchWriter redirect: set -> unset");
            true
        } else {
            false
        }
    }
}

impl FrameWriter for SwitchWriter {
    fn write_frame(&self, frame: &[i16]) -> Result<()> {
        let current = self.current.lock();
        match current.as_ref() {
            Some(dest) => dest.write_frame(frame),
            // Nobody listening
            None => Ok(()),
        }
    }
}

/// Forwards frames into a tokio channel without waiting.
///
/// A full channel drops the frame and reports a sink error.
pub struct ChannelFrameWriter {
    tx: mpsc::Sender<Vec<i16>>,
}

impl ChannelFrameWriter {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Vec<i16>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl FrameWriter for ChannelFrameWriter {
    fn write_frame(&self, frame: &[i16]) -> Result<()> {
        match self.tx.try_send(frame.to_vec()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::Sink("frame channel full".into())),
            Err(TrySendError::Closed(_)) => Err(Error::Sink("frame channel closed".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<Vec<i16>>>,
    }

    impl FrameWriter for Recorder {
        fn write_frame(&self, frame: &[i16]) -> Result<()> {
            self.frames.lock().push(frame.to_vec());
            Ok(())
        }
    }

    #[test]
    fn unset_drops_silently() {
        let sw = SwitchWriter::new();
        assert!(sw.write_frame(&[1, 2, 3]).is_ok());
        assert!(sw.get().is_none());
    }

    #[test]
    fn set_redirects_following_writes() {
        let sw = SwitchWriter::new();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());

        sw.set(Some(a.clone()));
        sw.write_frame(&[1]).unwrap();
        sw.set(Some(b.clone()));
        sw.write_frame(&[2]).unwrap();
        sw.set(None);
        sw.write_frame(&[3]).unwrap();

        assert_eq!(*a.frames.lock(), vec![vec![1]]);
        assert_eq!(*b.frames.lock(), vec![vec![2]]);
    }

    #[test]
    fn clear_if_only_unsets_matching_destination() {
        let sw = SwitchWriter::new();
        let a: Arc<dyn FrameWriter> = Arc::new(Recorder::default());
        let b: Arc<dyn FrameWriter> = Arc::new(Recorder::default());

        sw.set(Some(b.clone()));
        assert!(!sw.clear_if(&a));
        assert!(sw.get().is_some());
        assert!(sw.clear_if(&b));
        assert!(sw.get().is_none());
    }

    #[test]
    fn concurrent_switching_delivers_each_frame_once() {
        let sw = Arc::new(SwitchWriter::new());
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        sw.set(Some(a.clone()));

        let writer = {
            let sw = sw.clone();
            thread::spawn(move || {
                for seq in 0..2000i16 {
                    sw.write_frame(&[seq]).unwrap();
                }
            })
        };
        let switcher = {
            let sw = sw.clone();
            let (a, b) = (a.clone(), b.clone());
            thread::spawn(move || {
                for i in 0..500 {
                    let dest: Arc<dyn FrameWriter> =
                        if i % 2 == 0 { b.clone() } else { a.clone() };
                    sw.set(Some(dest));
                    thread::yield_now();
                }
            })
        };
        writer.join().unwrap();
        switcher.join().unwrap();

        let seen_a: Vec<i16> = a.frames.lock().iter().map(|f| f[0]).collect();
        let seen_b: Vec<i16> = b.frames.lock().iter().map(|f| f[0]).collect();
        assert!(seen_a.windows(2).all(|w| w[0] < w[1]));
        assert!(seen_b.windows(2).all(|w| w[0] < w[1]));

        let mut all: Vec<i16> = seen_a.into_iter().chain(seen_b).collect();
        all.sort_unstable();
        assert_eq!(all, (0..2000).collect::<Vec<_>>());
    }

    #[test]
    fn channel_writer_reports_full_and_closed() {
        let (w, mut rx) = ChannelFrameWriter::channel(1);
        w.write_frame(&[7]).unwrap();
        assert!(matches!(w.write_frame(&[8]), Err(Error::Sink(_))));
        assert_eq!(rx.try_recv().unwrap(), vec![7]);
        drop(rx);
        assert!(w.write_frame(&[9]).is_err());
    }
}
