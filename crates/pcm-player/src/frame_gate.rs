//! Host frame hook registry and the one-shot latch it releases.
//!
//! The host render loop calls [`FrameGate::run_before_update`] once per frame. A context
//! registers a hook that fires its [`Latch`] on the first frame, so device creation never
//! happens before the host has started ticking.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;

type Hook = Box<dyn FnMut() -> anyhow::Result<()> + Send>;

/// Hooks invoked by the host before each frame update.
#[derive(Default)]
pub struct FrameGate {
    hooks: Mutex<Vec<Hook>>,
}

impl FrameGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `hook` to run before every frame update.
    ///
    /// Hooks must not register further hooks from inside their body.
    pub fn append_hook<F>(&self, hook: F)
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        self.hooks.lock().push(Box::new(hook));
    }

    /// Run all hooks in registration order, stopping at the first error.
    pub fn run_before_update(&self) -> anyhow::Result<()> {
        let mut hooks = self.hooks.lock();
        for hook in hooks.iter_mut() {
            hook()?;
        }
        Ok(())
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.lock().len()
    }
}

/// One-shot signal: once fired it stays fired and every waiter is released.
///
/// Firing drops the only sender, which disconnects the channel for all receivers.
#[derive(Clone)]
pub struct Latch {
    trigger: Arc<Mutex<Option<Sender<()>>>>,
    fired: Receiver<()>,
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

impl Latch {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(0);
        Self {
            trigger: Arc::new(Mutex::new(Some(tx))),
            fired: rx,
        }
    }

    /// Fire the latch. Returns `true` only for the call that actually fired it.
    pub fn fire(&self) -> bool {
        let sender = self.trigger.lock().take();
        sender.is_some()
    }

    pub fn is_fired(&self) -> bool {
        matches!(self.fired.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Block until the latch fires.
    pub fn wait(&self) {
        // No value is ever sent; `recv` only returns once the sender is gone.
        let _ = self.fired.recv();
    }

    /// Block until the latch fires or `timeout` elapses. Returns whether it fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        matches!(
            self.fired.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn hooks_run_in_order_every_frame() {
        let gate = FrameGate::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for id in 0..3 {
            let log = log.clone();
            gate.append_hook(move || {
                log.lock().push(id);
                Ok(())
            });
        }
        gate.run_before_update().unwrap();
        gate.run_before_update().unwrap();
        assert_eq!(*log.lock(), vec![0, 1, 2, 0, 1, 2]);
        assert_eq!(gate.hook_count(), 3);
    }

    #[test]
    fn hook_error_stops_the_frame() {
        let gate = FrameGate::new();
        let after = Arc::new(AtomicUsize::new(0));
        gate.append_hook(|| Err(anyhow::anyhow!("boom")));
        {
            let after = after.clone();
            gate.append_hook(move || {
                after.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        let err = gate.run_before_update().unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert_eq!(after.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn latch_fires_once() {
        let latch = Latch::new();
        assert!(!latch.is_fired());
        assert!(latch.fire());
        assert!(!latch.fire());
        assert!(latch.is_fired());
        latch.wait();
    }

    #[test]
    fn latch_releases_all_waiters() {
        let latch = Latch::new();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let latch = latch.clone();
                thread::spawn(move || latch.wait())
            })
            .collect();
        assert!(!latch.wait_timeout(Duration::from_millis(10)));
        latch.fire();
        for h in handles {
            h.join().unwrap();
        }
        assert!(latch.wait_timeout(Duration::from_millis(1)));
    }
}
