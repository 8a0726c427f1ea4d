//! Shared playback context: device sink lifecycle, admission control, live players and the
//! sticky ready/error latches.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use anyhow::Context as _;
use parking_lot::{Condvar, Mutex};

use crate::config::ContextConfig;
use crate::error::{PlaybackError, Result};
use crate::frame_gate::{FrameGate, Latch};
use crate::player::{Player, PlayerId};
use crate::semaphore::AdmissionSemaphore;
use crate::sink::{DeviceSink, SinkWriter};
use crate::source::Source;

type SinkOpener = Box<dyn FnOnce(&ContextConfig) -> anyhow::Result<Arc<dyn DeviceSink>> + Send>;

/// Owner of the device sink and the players streaming into it.
///
/// Cloning is cheap and yields another handle to the same context.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    config: ContextConfig,
    semaphore: AdmissionSemaphore,
    players: Mutex<HashMap<PlayerId, Player>>,
    players_idle: Condvar,
    next_player_id: AtomicU64,
    inited: Latch,
    opener: Mutex<Option<SinkOpener>>,
    sink: OnceLock<Result<Arc<dyn DeviceSink>>>,
    ready: AtomicBool,
    err: OnceLock<PlaybackError>,
    closed: AtomicBool,
}

impl Context {
    /// Create a context whose device sink is opened lazily by `open_sink`.
    ///
    /// `open_sink` runs at most once, on the first player that needs a writer after `gate`
    /// has run its first frame.
    pub fn new<F>(config: ContextConfig, gate: &FrameGate, open_sink: F) -> Self
    where
        F: FnOnce(&ContextConfig) -> anyhow::Result<Arc<dyn DeviceSink>> + Send + 'static,
    {
        let config = config.normalized();
        let inited = Latch::new();
        {
            let inited = inited.clone();
            gate.append_hook(move || {
                if inited.fire() {
                    tracing::debug!("first frame; audio device may be opened");
                }
                Ok(())
            });
        }

        Self {
            inner: Arc::new(ContextInner {
                semaphore: AdmissionSemaphore::new(config.max_in_flight_reads),
                config,
                players: Mutex::new(HashMap::new()),
                players_idle: Condvar::new(),
                next_player_id: AtomicU64::new(0),
                inited,
                opener: Mutex::new(Some(Box::new(open_sink))),
                sink: OnceLock::new(),
                ready: AtomicBool::new(false),
                err: OnceLock::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Create a context around an already constructed sink.
    pub fn with_sink(config: ContextConfig, gate: &FrameGate, sink: Arc<dyn DeviceSink>) -> Self {
        Self::new(config, gate, move |_| Ok(sink))
    }

    /// Create a player bound to this context. Streaming starts on [`Player::play`].
    pub fn create_player(&self, source: Source) -> Player {
        let id = self.inner.next_player_id.fetch_add(1, Ordering::Relaxed);
        Player::new(id, self.clone(), source)
    }

    pub fn config(&self) -> &ContextConfig {
        &self.inner.config
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.config.sample_rate
    }

    pub(crate) fn semaphore(&self) -> &AdmissionSemaphore {
        &self.inner.semaphore
    }

    pub(crate) fn add_player(&self, player: &Player) {
        self.inner.players.lock().insert(player.id(), player.clone());
    }

    pub(crate) fn remove_player(&self, id: PlayerId) {
        let mut players = self.inner.players.lock();
        players.remove(&id);
        if players.is_empty() {
            self.inner.players_idle.notify_all();
        }
    }

    /// Number of players whose pipeline is currently registered.
    pub fn active_players(&self) -> usize {
        self.inner.players.lock().len()
    }

    /// Record `err` as the context error unless one is already set.
    pub fn set_error(&self, err: PlaybackError) {
        if self.inner.err.set(err).is_ok() {
            if let Some(err) = self.inner.err.get() {
                tracing::warn!(error = %err, "audio context failed; players will stop");
            }
        }
    }

    pub fn has_error(&self) -> bool {
        self.inner.err.get().is_some()
    }

    /// The first error recorded on this context.
    pub fn error(&self) -> Option<PlaybackError> {
        self.inner.err.get().cloned()
    }

    pub fn set_ready(&self) {
        if !self.inner.ready.swap(true, Ordering::AcqRel) {
            tracing::info!("audio output ready");
        }
    }

    /// Whether any device write has succeeded yet.
    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    /// Whether the frame gate has released device creation.
    pub fn is_initialized(&self) -> bool {
        self.inner.inited.is_fired()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub(crate) fn wait_initialized(&self) {
        self.inner.inited.wait();
    }

    /// The device sink, opened on first use.
    fn sink(&self) -> Result<Arc<dyn DeviceSink>> {
        debug_assert!(self.is_initialized(), "device sink accessed before the first frame");
        self.inner
            .sink
            .get_or_init(|| {
                let opener = self.inner.opener.lock().take();
                let open = opener.ok_or_else(|| {
                    PlaybackError::device(anyhow::anyhow!("device sink opener already used"))
                })?;
                let sink = open(&self.inner.config)
                    .context("open device sink")
                    .map_err(PlaybackError::device)?;
                tracing::info!(rate_hz = self.inner.config.sample_rate, "device sink opened");
                Ok(sink)
            })
            .clone()
    }

    pub(crate) fn new_writer(&self) -> Result<Box<dyn SinkWriter>> {
        self.sink()?
            .new_writer()
            .context("create device writer")
            .map_err(PlaybackError::device)
    }

    /// Tear the context down.
    ///
    /// Further `play` calls fail with [`PlaybackError::ContextClosed`]. Live players are paused
    /// and this call blocks until every pipeline has deregistered, then closes the device sink
    /// if it was ever opened.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Err(PlaybackError::ContextClosed);
        }
        // Release pipelines still parked on the gate; they see `closed` and wind down.
        self.inner.inited.fire();

        let live: Vec<Player> = self.inner.players.lock().values().cloned().collect();
        for player in &live {
            player.pause();
        }

        {
            let mut players = self.inner.players.lock();
            while !players.is_empty() {
                self.inner.players_idle.wait(&mut players);
            }
        }

        if let Some(Ok(sink)) = self.inner.sink.get() {
            sink.close()
                .context("close device sink")
                .map_err(PlaybackError::device)?;
        }
        tracing::debug!("audio context closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use std::io;
    use std::sync::atomic::AtomicUsize;

    fn context_with(sink: &MemorySink) -> (FrameGate, Context) {
        let gate = FrameGate::new();
        let ctx = Context::with_sink(ContextConfig::default(), &gate, Arc::new(sink.clone()));
        (gate, ctx)
    }

    #[test]
    fn first_error_wins() {
        let (_gate, ctx) = context_with(&MemorySink::new());
        assert!(!ctx.has_error());
        ctx.set_error(PlaybackError::SourceRead(Arc::new(io::Error::other("first"))));
        ctx.set_error(PlaybackError::AlreadyClosed);
        assert!(ctx.has_error());
        match ctx.error() {
            Some(PlaybackError::SourceRead(e)) => assert_eq!(e.to_string(), "first"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn ready_is_sticky() {
        let (_gate, ctx) = context_with(&MemorySink::new());
        assert!(!ctx.is_ready());
        ctx.set_ready();
        ctx.set_ready();
        assert!(ctx.is_ready());
    }

    #[test]
    fn frame_gate_initializes_once() {
        let (gate, ctx) = context_with(&MemorySink::new());
        assert!(!ctx.is_initialized());
        gate.run_before_update().unwrap();
        assert!(ctx.is_initialized());
        gate.run_before_update().unwrap();
        assert!(ctx.is_initialized());
    }

    #[test]
    fn sink_is_opened_once() {
        let opened = Arc::new(AtomicUsize::new(0));
        let gate = FrameGate::new();
        let sink = MemorySink::new();
        let ctx = {
            let opened = opened.clone();
            let sink = sink.clone();
            Context::new(ContextConfig::default(), &gate, move |_| {
                opened.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(sink) as Arc<dyn DeviceSink>)
            })
        };
        gate.run_before_update().unwrap();
        let mut a = ctx.new_writer().unwrap();
        let mut b = ctx.new_writer().unwrap();
        a.close().unwrap();
        b.close().unwrap();
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert_eq!(sink.writers_opened(), 2);
    }

    #[test]
    fn sink_open_failure_is_reported_to_every_caller() {
        let gate = FrameGate::new();
        let ctx = Context::new(ContextConfig::default(), &gate, |_| {
            Err(anyhow::anyhow!("no device"))
        });
        gate.run_before_update().unwrap();
        for _ in 0..2 {
            let err = ctx.new_writer().err().unwrap();
            assert!(err.to_string().contains("no device"), "{err}");
        }
    }

    #[test]
    fn close_without_players_closes_opened_sink() {
        let sink = MemorySink::new();
        let (gate, ctx) = context_with(&sink);
        gate.run_before_update().unwrap();
        let mut w = ctx.new_writer().unwrap();
        w.close().unwrap();

        ctx.close().unwrap();
        assert!(sink.is_closed());
        assert!(ctx.is_closed());
        assert!(matches!(ctx.close(), Err(PlaybackError::ContextClosed)));
    }

    #[test]
    fn close_skips_sink_that_was_never_opened() {
        let sink = MemorySink::new();
        let (_gate, ctx) = context_with(&sink);
        ctx.close().unwrap();
        assert!(!sink.is_closed());
        assert!(ctx.is_initialized());
    }
}
