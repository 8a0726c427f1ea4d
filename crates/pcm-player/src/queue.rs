//! Bounded interleaved sample queue between a device writer and the output callback.
//!
//! The writer side blocks while the queue is full, which is how device backpressure reaches
//! a player's `write`. The real-time callback side never blocks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Thread-safe bounded queue of interleaved `i16` samples.
///
/// A `done` flag lives under the same mutex as the samples so close and drain decisions
/// never race with pushes.
pub struct SampleQueue {
    channels: usize,
    inner: Mutex<QueueInner>,
    cv: Condvar,
    max_buffered_samples: usize,
}

struct QueueInner {
    samples: VecDeque<i16>,
    done: bool,
}

/// Strategy for popping interleaved frames from the queue.
pub enum PopStrategy {
    /// Block until at least one frame is available, then return up to `max_frames`.
    BlockingUpTo { max_frames: usize },
    /// Return immediately with up to `max_frames`, or `None` if currently empty.
    NonBlocking { max_frames: usize },
}

/// Queue capacity in samples for `buffer_seconds` of audio.
///
/// Non-finite or non-positive durations fall back to half a second.
pub fn calc_max_buffered_samples(rate_hz: u32, channels: usize, buffer_seconds: f32) -> usize {
    let secs = if buffer_seconds.is_finite() && buffer_seconds > 0.0 {
        buffer_seconds
    } else {
        0.5
    };

    let frames = (rate_hz as f32 * secs).ceil() as usize;
    frames.max(1).saturating_mul(channels)
}

impl SampleQueue {
    pub fn new(channels: usize, max_buffered_samples: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            inner: Mutex::new(QueueInner {
                samples: VecDeque::new(),
                done: false,
            }),
            cv: Condvar::new(),
            max_buffered_samples: max_buffered_samples.max(channels),
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Current buffered frames (best-effort snapshot).
    pub fn len_frames(&self) -> usize {
        self.inner.lock().samples.len() / self.channels
    }

    pub fn is_done(&self) -> bool {
        self.inner.lock().done
    }

    /// Mark the queue as finished and wake all waiters. Idempotent.
    pub fn close(&self) {
        self.inner.lock().done = true;
        self.cv.notify_all();
    }

    /// Push samples, blocking while the queue is full.
    ///
    /// Returns `false` if the queue was closed before every sample was accepted.
    pub fn push_interleaved_blocking(&self, samples: &[i16]) -> bool {
        let mut offset = 0;

        while offset < samples.len() {
            let mut g = self.inner.lock();

            while g.samples.len() >= self.max_buffered_samples && !g.done {
                self.cv.wait(&mut g);
            }
            if g.done {
                return false;
            }

            let room = self.max_buffered_samples - g.samples.len();
            let take = room.min(samples.len() - offset);
            g.samples.extend(&samples[offset..offset + take]);
            offset += take;

            drop(g);
            self.cv.notify_all();
        }
        true
    }

    /// Pop whole frames using the requested strategy.
    ///
    /// Returns `None` when no frame can satisfy the request.
    pub fn pop(&self, strategy: PopStrategy) -> Option<Vec<i16>> {
        let mut g = self.inner.lock();
        let max_frames = match strategy {
            PopStrategy::BlockingUpTo { max_frames } => {
                while g.samples.len() < self.channels && !g.done {
                    self.cv.wait(&mut g);
                }
                max_frames
            }
            PopStrategy::NonBlocking { max_frames } => max_frames,
        };

        let take_frames = (g.samples.len() / self.channels).min(max_frames);
        if take_frames == 0 {
            return None;
        }
        let out: Vec<i16> = g.samples.drain(..take_frames * self.channels).collect();

        drop(g);
        self.cv.notify_all();
        Some(out)
    }

    /// Block until the queue holds less than one frame, or `cancel` becomes true.
    ///
    /// Returns `true` if the queue drained, `false` if cancelled.
    pub fn wait_until_drained_or_cancel(&self, cancel: &AtomicBool) -> bool {
        let mut g = self.inner.lock();
        loop {
            if cancel.load(Ordering::Relaxed) {
                return false;
            }
            if g.samples.len() < self.channels {
                return true;
            }
            self.cv.wait_for(&mut g, Duration::from_millis(50));
        }
    }
}
