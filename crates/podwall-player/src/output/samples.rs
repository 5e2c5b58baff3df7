//! Bounded queue of interleaved samples between the output threads.
//!
//! The feeder pushes decoded audio, the resampler (when the device rate
//! differs) moves it into a second queue, and the CPAL callback drains the
//! last one without blocking.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

pub struct SharedAudio {
    channels: usize,
    inner: Mutex<SharedInner>,
    cv: Condvar,
    max_buffered_samples: usize,
}

struct SharedInner {
    queue: VecDeque<f32>,
    done: bool,
}

pub enum PopStrategy {
    /// Block until exactly `frames` are available; `None` if closed first.
    BlockingExact { frames: usize },
    /// Block until any frame is available, then take up to `max_frames`.
    BlockingUpTo { max_frames: usize },
    /// Take up to `max_frames` right now; `None` if empty.
    NonBlocking { max_frames: usize },
}

/// Queue capacity in samples for `buffer_seconds` of audio.
///
/// Non-finite or non-positive durations fall back to two seconds.
pub fn calc_max_buffered_samples(rate_hz: u32, channels: usize, buffer_seconds: f32) -> usize {
    let secs = if buffer_seconds.is_finite() && buffer_seconds > 0.0 {
        buffer_seconds
    } else {
        2.0
    };
    let frames = (rate_hz as f32 * secs).ceil() as usize;
    frames.saturating_mul(channels.max(1))
}

impl SharedAudio {
    pub fn new(channels: usize, max_buffered_samples: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            inner: Mutex::new(SharedInner {
                queue: VecDeque::new(),
                done: false,
            }),
            cv: Condvar::new(),
            max_buffered_samples: max_buffered_samples.max(channels),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SharedInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn len_frames(&self) -> usize {
        self.lock().queue.len() / self.channels
    }

    pub fn is_done(&self) -> bool {
        self.lock().done
    }

    /// Producer finished; buffered samples can still be drained.
    pub fn close(&self) {
        self.lock().done = true;
        self.cv.notify_all();
    }

    /// Drop everything buffered and close.
    pub fn abort(&self) {
        let mut g = self.lock();
        g.queue.clear();
        g.done = true;
        drop(g);
        self.cv.notify_all();
    }

    /// Push samples, blocking while the queue is full.
    ///
    /// Returns `false` if the queue closed before every sample was accepted.
    pub fn push_interleaved_blocking(&self, samples: &[f32]) -> bool {
        let mut offset = 0;
        while offset < samples.len() {
            let mut g = self.lock();
            while g.queue.len() >= self.max_buffered_samples && !g.done {
                g = self.cv.wait(g).unwrap_or_else(|e| e.into_inner());
            }
            if g.done {
                return false;
            }
            let room = self.max_buffered_samples - g.queue.len();
            let take = room.min(samples.len() - offset);
            g.queue.extend(&samples[offset..offset + take]);
            offset += take;
            drop(g);
            self.cv.notify_all();
        }
        true
    }

    pub fn pop(&self, strategy: PopStrategy) -> Option<Vec<f32>> {
        let mut g = self.lock();
        let take_samples = match strategy {
            PopStrategy::BlockingExact { frames } => {
                let want = frames * self.channels;
                while g.queue.len() < want && !g.done {
                    g = self.cv.wait(g).unwrap_or_else(|e| e.into_inner());
                }
                if g.queue.len() < want {
                    return None;
                }
                want
            }
            PopStrategy::BlockingUpTo { max_frames } => {
                while g.queue.len() < self.channels && !g.done {
                    g = self.cv.wait(g).unwrap_or_else(|e| e.into_inner());
                }
                (g.queue.len() / self.channels).min(max_frames) * self.channels
            }
            PopStrategy::NonBlocking { max_frames } => {
                (g.queue.len() / self.channels).min(max_frames) * self.channels
            }
        };
        if take_samples == 0 {
            return None;
        }
        let out: Vec<f32> = g.queue.drain(..take_samples).collect();
        drop(g);
        self.cv.notify_all();
        Some(out)
    }

    /// Block until the queue is closed and empty, or `cancel` is set.
    ///
    /// Returns `true` when the queue drained normally.
    pub fn wait_until_drained_or_cancel(&self, cancel: &AtomicBool) -> bool {
        let mut g = self.lock();
        loop {
            if cancel.load(Ordering::Relaxed) {
                return false;
            }
            if g.done && g.queue.is_empty() {
                return true;
            }
            let (next, _timeout) = self
                .cv
                .wait_timeout(g, Duration::from_millis(50))
                .unwrap_or_else(|e| e.into_inner());
            g = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn calc_max_buffered_samples_fallbacks() {
        assert_eq!(calc_max_buffered_samples(48_000, 2, 2.0), 192_000);
        assert_eq!(calc_max_buffered_samples(48_000, 2, -1.0), 192_000);
        assert_eq!(calc_max_buffered_samples(48_000, 2, f32::NAN), 192_000);
        assert_eq!(calc_max_buffered_samples(8_000, 1, 0.5), 4_000);
    }

    #[test]
    fn nonblocking_pop_takes_whole_frames_only() {
        let q = SharedAudio::new(2, 64);
        assert!(q.pop(PopStrategy::NonBlocking { max_frames: 4 }).is_none());
        assert!(q.push_interleaved_blocking(&[1.0, 2.0, 3.0, 4.0, 5.0]));
        let out = q.pop(PopStrategy::NonBlocking { max_frames: 4 }).unwrap();
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(q.len_frames(), 0);
    }

    #[test]
    fn blocking_exact_waits_for_producer() {
        let q = Arc::new(SharedAudio::new(2, 64));
        let consumer = q.clone();
        let handle = thread::spawn(move || consumer.pop(PopStrategy::BlockingExact { frames: 3 }));
        q.push_interleaved_blocking(&[0.1, 0.2, 0.3, 0.4]);
        q.push_interleaved_blocking(&[0.5, 0.6]);
        assert_eq!(handle.join().unwrap().map(|v| v.len()), Some(6));
    }

    #[test]
    fn blocking_up_to_drains_tail_then_ends() {
        let q = SharedAudio::new(1, 64);
        q.push_interleaved_blocking(&[1.0, 2.0, 3.0]);
        q.close();
        assert!(q.pop(PopStrategy::BlockingExact { frames: 8 }).is_none());
        assert_eq!(
            q.pop(PopStrategy::BlockingUpTo { max_frames: 8 }),
            Some(vec![1.0, 2.0, 3.0])
        );
        assert!(q.pop(PopStrategy::BlockingUpTo { max_frames: 8 }).is_none());
    }

    #[test]
    fn full_queue_push_unblocks_on_abort() {
        let q = Arc::new(SharedAudio::new(1, 4));
        let producer = q.clone();
        let handle = thread::spawn(move || producer.push_interleaved_blocking(&[0.0; 16]));
        while q.len_frames() < 4 {
            thread::yield_now();
        }
        q.abort();
        assert!(!handle.join().unwrap());
        assert_eq!(q.len_frames(), 0);
    }

    #[test]
    fn drained_wait_reports_cancel() {
        let q = SharedAudio::new(1, 8);
        let cancel = AtomicBool::new(true);
        assert!(!q.wait_until_drained_or_cancel(&cancel));
        cancel.store(false, Ordering::Relaxed);
        q.close();
        assert!(q.wait_until_drained_or_cancel(&cancel));
    }
}
