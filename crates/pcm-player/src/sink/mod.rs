//! Device sink boundary.
//!
//! The playback core only needs two things from an audio device: a way to create a writer
//! that accepts PCM byte chunks with a blocking `write`, and a way to release the device.
//! Blocking writes are how device backpressure reaches the player pipelines.

mod memory;
mod output;

pub use memory::{MemorySink, MemorySinkOptions, RecordedWrite};
pub use output::{OutputSink, OutputSinkConfig};

use anyhow::Result;

/// An opened audio device.
pub trait DeviceSink: Send + Sync {
    /// Create a writer for one player stream.
    fn new_writer(&self) -> Result<Box<dyn SinkWriter>>;

    /// Release the device. Calling it more than once must be harmless.
    fn close(&self) -> Result<()>;
}

/// One player's stream into a device.
pub trait SinkWriter: Send {
    /// Write one chunk of interleaved s16le bytes, blocking while the device is saturated.
    fn write(&mut self, chunk: &[u8]) -> Result<()>;

    /// Flush and release the stream.
    fn close(&mut self) -> Result<()>;
}
