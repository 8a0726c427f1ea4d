//! Fixed-capacity admission gate shared by the players of one context.
//!
//! Slots are tokens in a bounded channel: acquiring sends a token (blocking while the channel
//! is full), releasing receives one back.

use crossbeam_channel::{Receiver, Sender};

/// Counting semaphore bounding concurrent source reads.
#[derive(Clone, Debug)]
pub struct AdmissionSemaphore {
    slots_tx: Sender<()>,
    slots_rx: Receiver<()>,
    capacity: usize,
}

/// A held slot; released on drop.
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct Permit<'a> {
    semaphore: &'a AdmissionSemaphore,
}

impl AdmissionSemaphore {
    /// Create a semaphore with `capacity` slots (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (slots_tx, slots_rx) = crossbeam_channel::bounded(capacity);
        Self {
            slots_tx,
            slots_rx,
            capacity,
        }
    }

    /// Block until a slot is free and take it.
    pub fn acquire(&self) -> Permit<'_> {
        // Both channel ends live in `self`, so the send cannot observe a disconnect.
        let _ = self.slots_tx.send(());
        Permit { semaphore: self }
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        self.slots_tx
            .try_send(())
            .ok()
            .map(|()| Permit { semaphore: self })
    }

    /// Slots currently held (best-effort snapshot).
    pub fn in_use(&self) -> usize {
        self.slots_rx.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        let _ = self.semaphore.slots_rx.try_recv();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn zero_capacity_is_bumped_to_one() {
        let sem = AdmissionSemaphore::new(0);
        assert_eq!(sem.capacity(), 1);
        let permit = sem.try_acquire();
        assert!(permit.is_some());
        assert!(sem.try_acquire().is_none());
    }

    #[test]
    fn permits_release_on_drop() {
        let sem = AdmissionSemaphore::new(2);
        let a = sem.acquire();
        let b = sem.acquire();
        assert_eq!(sem.in_use(), 2);
        assert!(sem.try_acquire().is_none());
        drop(a);
        assert_eq!(sem.in_use(), 1);
        assert!(sem.try_acquire().is_some());
        drop(b);
        assert_eq!(sem.in_use(), 0);
    }

    #[test]
    fn acquire_bounds_concurrency() {
        let sem = Arc::new(AdmissionSemaphore::new(3));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let sem = sem.clone();
                let active = active.clone();
                let peak = peak.clone();
                thread::spawn(move || {
                    for _ in 0..5 {
                        let _permit = sem.acquire();
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(1));
                        active.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(sem.in_use(), 0);
    }
}
