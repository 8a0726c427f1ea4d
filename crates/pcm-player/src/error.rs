//! Error types for the playback core.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Errors reported by players and contexts.
///
/// The type is `Clone` because one sticky context error is observed by every player sharing
/// that context; payloads are reference counted for that reason.
#[derive(Debug, Clone, Error)]
pub enum PlaybackError {
    /// The player was explicitly closed before this call.
    #[error("audio: the player is already closed")]
    AlreadyClosed,
    /// The owning context was torn down.
    #[error("audio: the context is closed")]
    ContextClosed,
    /// Reading the source failed for a reason other than end of stream.
    #[error("audio: source read failed: {0}")]
    SourceRead(Arc<io::Error>),
    /// The source rejected a reposition request.
    #[error("audio: seek failed: {0}")]
    Seek(Arc<io::Error>),
    /// Opening, writing to or closing the device sink failed.
    #[error("audio: device error: {0:#}")]
    Device(Arc<anyhow::Error>),
    /// A pipeline thread could not be started.
    #[error("audio: failed to start streaming thread: {0}")]
    Spawn(Arc<io::Error>),
}

impl PlaybackError {
    pub(crate) fn device(err: anyhow::Error) -> Self {
        Self::Device(Arc::new(err))
    }

    /// Whether this is the idempotency report for a closed player.
    pub fn is_already_closed(&self) -> bool {
        matches!(self, Self::AlreadyClosed)
    }
}

/// A specialized Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;
