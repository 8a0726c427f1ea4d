//! Player state machine and streaming pipeline.
//!
//! `play` spawns one pipeline thread per player. The pipeline reads a chunk from the source
//! (holding an admission slot), scales it by the volume and hands it over a rendezvous
//! channel to a forwarding thread that performs the blocking device write. The two stages run
//! concurrently, so one chunk can be transformed while the previous one is still being
//! written.
//!
//! Stopping is cooperative: pause, close and context errors are observed at the next chunk
//! boundary. Teardown always runs in the same order: stop producing, close the handoff,
//! drain the forwarder, close the device writer, clear the active flags, deregister.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::context::Context;
use crate::error::{PlaybackError, Result};
use crate::pcm;
use crate::sink::SinkWriter;
use crate::source::Source;

pub(crate) type PlayerId = u64;

/// Logical playback state of a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Constructed and never played, or its stream ended.
    Idle,
    Playing,
    Paused,
    /// Explicitly closed; terminal.
    Closed,
}

/// Why a pipeline stopped producing chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    EndOfStream,
    Paused,
    Closed,
    ContextError,
    ContextClosed,
    WriterStopped,
}

enum ReadOutcome {
    Chunk(Vec<u8>),
    Stop(StreamEnd),
}

/// A handle to one streaming source. Clones refer to the same player.
#[derive(Clone)]
pub struct Player {
    shared: Arc<PlayerShared>,
}

struct PlayerShared {
    id: PlayerId,
    context: Context,
    state: Mutex<PlayerInner>,
}

struct PlayerInner {
    source: Source,
    state: PlaybackState,
    /// A pipeline currently owns the source. Distinct from `state == Playing`.
    loop_active: bool,
    /// Trailing bytes of an incomplete frame, carried into the next chunk.
    pending: Vec<u8>,
    read_buf: Vec<u8>,
    /// Byte offset into the source of the next emitted chunk.
    pos: u64,
    volume: f64,
}

impl Player {
    pub(crate) fn new(id: PlayerId, context: Context, source: Source) -> Self {
        Self {
            shared: Arc::new(PlayerShared {
                id,
                context,
                state: Mutex::new(PlayerInner {
                    source,
                    state: PlaybackState::Idle,
                    loop_active: false,
                    pending: Vec::new(),
                    read_buf: Vec::new(),
                    pos: 0,
                    volume: 1.0,
                }),
            }),
        }
    }

    pub(crate) fn id(&self) -> PlayerId {
        self.shared.id
    }

    /// Start or resume streaming.
    ///
    /// Calling `play` while a pipeline is already running only flips the state back to
    /// playing; it never starts a second pipeline.
    pub fn play(&self) -> Result<()> {
        let ctx = &self.shared.context;
        let mut inner = self.shared.state.lock();
        if inner.state == PlaybackState::Closed {
            return Err(PlaybackError::AlreadyClosed);
        }
        if ctx.is_closed() {
            return Err(PlaybackError::ContextClosed);
        }

        inner.state = PlaybackState::Playing;
        if inner.loop_active {
            return Ok(());
        }

        // Claimed under the same lock as the check above, so racing `play` calls cannot both
        // spawn a pipeline.
        inner.loop_active = true;
        ctx.add_player(self);

        let player = self.clone();
        let spawned = thread::Builder::new()
            .name(format!("pcm-player-{}", self.shared.id))
            .spawn(move || player.run_pipeline());
        if let Err(err) = spawned {
            inner.loop_active = false;
            inner.state = PlaybackState::Idle;
            ctx.remove_player(self.shared.id);
            return Err(PlaybackError::Spawn(Arc::new(err)));
        }
        tracing::debug!(player = self.shared.id, "streaming pipeline started");
        Ok(())
    }

    /// Pause playback. The pipeline winds down at its next chunk boundary.
    pub fn pause(&self) {
        let mut inner = self.shared.state.lock();
        if inner.state == PlaybackState::Playing {
            inner.state = PlaybackState::Paused;
        }
    }

    /// Close the player. A running pipeline finishes its in-flight write, closes its device
    /// writer and exits on its own.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.shared.state.lock();
        if inner.state == PlaybackState::Closed {
            return Err(PlaybackError::AlreadyClosed);
        }
        inner.state = PlaybackState::Closed;
        Ok(())
    }

    /// Move playback to `offset` from the start of the source.
    ///
    /// The target is rounded down to a whole frame. Pending partial-frame bytes are dropped.
    ///
    /// # Panics
    ///
    /// Panics if the source is not seekable.
    pub fn seek(&self, offset: Duration) -> Result<()> {
        let config = self.shared.context.config();
        let mut inner = self.shared.state.lock();
        assert!(
            inner.source.is_seekable(),
            "audio: the source must be seekable when seeking"
        );

        let target = pcm::duration_to_offset(offset, config.frame_bytes(), config.sample_rate);
        let pos = inner
            .source
            .seek_to(target)
            .map_err(|e| PlaybackError::Seek(Arc::new(e)))?;
        inner.pending.clear();
        inner.pos = pos;
        Ok(())
    }

    /// Seek back to the start.
    ///
    /// # Panics
    ///
    /// Panics if the source is not seekable.
    pub fn rewind(&self) -> Result<()> {
        self.seek(Duration::ZERO)
    }

    pub fn is_playing(&self) -> bool {
        self.shared.state.lock().state == PlaybackState::Playing
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.state.lock().state
    }

    /// Whether a pipeline is currently running for this player.
    pub fn is_streaming(&self) -> bool {
        self.shared.state.lock().loop_active
    }

    pub fn is_seekable(&self) -> bool {
        self.shared.state.lock().source.is_seekable()
    }

    /// Elapsed playback position.
    pub fn current(&self) -> Duration {
        let config = self.shared.context.config();
        let pos = self.shared.state.lock().pos;
        pcm::bytes_to_duration(pos, config.frame_bytes(), config.sample_rate)
    }

    pub fn volume(&self) -> f64 {
        self.shared.state.lock().volume
    }

    /// Set the volume factor applied to subsequent chunks.
    ///
    /// # Panics
    ///
    /// Panics unless `0.0 <= volume <= 1.0`; NaN is rejected.
    pub fn set_volume(&self, volume: f64) {
        // `contains` is false for NaN.
        assert!(
            (0.0..=1.0).contains(&volume),
            "audio: volume must be in between 0 and 1"
        );
        self.shared.state.lock().volume = volume;
    }

    fn run_pipeline(self) {
        let ctx = self.shared.context.clone();
        ctx.wait_initialized();

        let end = if let Some(end) = self.stop_reason() {
            end
        } else {
            match ctx.new_writer() {
                Ok(writer) => self.stream_to(writer),
                Err(err) => {
                    ctx.set_error(err);
                    StreamEnd::ContextError
                }
            }
        };

        let mut inner = self.shared.state.lock();
        inner.loop_active = false;
        if inner.state == PlaybackState::Playing {
            inner.state = PlaybackState::Idle;
        }
        ctx.remove_player(self.shared.id);
        tracing::debug!(
            player = self.shared.id,
            reason = ?end,
            position = inner.pos,
            "streaming pipeline stopped"
        );
    }

    fn stream_to(&self, writer: Box<dyn SinkWriter>) -> StreamEnd {
        let ctx = self.shared.context.clone();
        let (tx, rx) = crossbeam_channel::bounded::<Vec<u8>>(0);

        let writer = Arc::new(Mutex::new(writer));

        let forwarder = {
            let ctx = ctx.clone();
            let writer = writer.clone();
            thread::Builder::new()
                .name(format!("pcm-writer-{}", self.shared.id))
                .spawn(move || {
                    let mut guard = writer.lock();
                    for chunk in rx.iter() {
                        // Zero-length chunks still go through; the writer must accept them.
                        if let Err(err) = guard.write(&chunk) {
                            ctx.set_error(PlaybackError::device(err.context("device write")));
                            break;
                        }
                        ctx.set_ready();
                    }
                    // Dropping the receiver unblocks a producer waiting on the handoff.
                    drop(rx);
                })
        };
        let end = match forwarder {
            Ok(handle) => {
                let end = self.produce(&tx);
                drop(tx);
                if handle.join().is_err() {
                    tracing::error!(player = self.shared.id, "forwarding thread panicked");
                    ctx.set_error(PlaybackError::device(anyhow::anyhow!(
                        "forwarding thread panicked"
                    )));
                }
                end
            }
            Err(err) => {
                ctx.set_error(PlaybackError::Spawn(Arc::new(err)));
                StreamEnd::ContextError
            }
        };

        if let Err(err) = writer.lock().close() {
            tracing::warn!(
                player = self.shared.id,
                "device writer close failed: {err:#}"
            );
        }
        end
    }

    fn produce(&self, tx: &Sender<Vec<u8>>) -> StreamEnd {
        loop {
            match self.read_chunk() {
                ReadOutcome::Chunk(chunk) => {
                    if tx.send(chunk).is_err() {
                        return StreamEnd::WriterStopped;
                    }
                }
                ReadOutcome::Stop(end) => return end,
            }
        }
    }

    /// Why the pipeline must stop now, if it must.
    fn stop_reason(&self) -> Option<StreamEnd> {
        let state = self.shared.state.lock().state;
        self.stop_reason_for(state)
    }

    fn stop_reason_for(&self, state: PlaybackState) -> Option<StreamEnd> {
        let ctx = &self.shared.context;
        if ctx.has_error() {
            return Some(StreamEnd::ContextError);
        }
        if ctx.is_closed() {
            return Some(StreamEnd::ContextClosed);
        }
        match state {
            PlaybackState::Playing => None,
            PlaybackState::Closed => Some(StreamEnd::Closed),
            PlaybackState::Idle | PlaybackState::Paused => Some(StreamEnd::Paused),
        }
    }

    /// Read, align and volume-scale one chunk, holding the player lock throughout.
    fn read_chunk(&self) -> ReadOutcome {
        let ctx = &self.shared.context;
        let config = ctx.config();
        let mut guard = self.shared.state.lock();
        if let Some(end) = self.stop_reason_for(guard.state) {
            return ReadOutcome::Stop(end);
        }

        let inner = &mut *guard;
        let want = config.chunk_bytes - inner.pending.len();
        inner.read_buf.resize(config.chunk_bytes, 0);

        let read = {
            let _permit = ctx.semaphore().acquire();
            inner.source.read_retrying(&mut inner.read_buf[..want])
        };
        let n = match read {
            Ok(0) => return ReadOutcome::Stop(StreamEnd::EndOfStream),
            Ok(n) => n,
            Err(err) => {
                ctx.set_error(PlaybackError::SourceRead(Arc::new(err)));
                return ReadOutcome::Stop(StreamEnd::ContextError);
            }
        };

        let mut chunk = pcm::take_aligned(
            &mut inner.pending,
            &inner.read_buf[..n],
            config.frame_bytes(),
        );
        pcm::scale_volume(&mut chunk, inner.volume);
        inner.pos += chunk.len() as u64;
        ReadOutcome::Chunk(chunk)
    }
}

impl fmt::Debug for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.state.lock();
        f.debug_struct("Player")
            .field("id", &self.shared.id)
            .field("state", &inner.state)
            .field("loop_active", &inner.loop_active)
            .field("pos", &inner.pos)
            .field("volume", &inner.volume)
            .finish()
    }
}
