//! Streaming playback core for raw little-endian 16-bit PCM.
//!
//! A [`Context`] owns the device sink, an admission semaphore shared by its players and the
//! sticky ready/error latches. Each [`Player`] streams one [`Source`] through a two-stage
//! pipeline (read + volume scale, then blocking device write) on its own threads.

pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod frame_gate;
pub mod pcm;
pub mod player;
pub mod playback;
pub mod queue;
pub mod semaphore;
pub mod sink;
pub mod source;

pub use config::ContextConfig;
pub use context::Context;
pub use error::{PlaybackError, Result};
pub use frame_gate::FrameGate;
pub use player::{PlaybackState, Player};
pub use sink::{DeviceSink, SinkWriter};
pub use source::Source;
