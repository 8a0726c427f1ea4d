use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Result, bail};
use parking_lot::Mutex;

use super::{DeviceSink, SinkWriter};

/// Behaviour knobs for [`MemorySink`].
#[derive(Clone, Debug, Default)]
pub struct MemorySinkOptions {
    /// Sleep this long inside every write, modelling a slow device.
    pub write_delay: Option<Duration>,
    /// Fail every write after this many successful ones (across all writers).
    pub fail_after_writes: Option<usize>,
}

/// One chunk accepted by a [`MemorySink`] writer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedWrite {
    pub writer: u64,
    pub bytes: Vec<u8>,
}

/// In-memory device sink that records every write in arrival order.
#[derive(Clone, Default)]
pub struct MemorySink {
    shared: Arc<MemoryShared>,
}

#[derive(Default)]
struct MemoryShared {
    options: MemorySinkOptions,
    writes: Mutex<Vec<RecordedWrite>>,
    attempts: AtomicUsize,
    next_writer: AtomicU64,
    writers_closed: AtomicUsize,
    closed: AtomicBool,
}

struct MemoryWriter {
    id: u64,
    shared: Arc<MemoryShared>,
    closed: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: MemorySinkOptions) -> Self {
        Self {
            shared: Arc::new(MemoryShared {
                options,
                ..MemoryShared::default()
            }),
        }
    }

    /// Snapshot of all writes so far.
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.shared.writes.lock().clone()
    }

    /// Chunks written by one writer, in order.
    pub fn chunks_for(&self, writer: u64) -> Vec<Vec<u8>> {
        self.shared
            .writes
            .lock()
            .iter()
            .filter(|w| w.writer == writer)
            .map(|w| w.bytes.clone())
            .collect()
    }

    pub fn write_count(&self) -> usize {
        self.shared.writes.lock().len()
    }

    pub fn total_bytes(&self) -> usize {
        self.shared.writes.lock().iter().map(|w| w.bytes.len()).sum()
    }

    pub fn writers_opened(&self) -> u64 {
        self.shared.next_writer.load(Ordering::SeqCst)
    }

    pub fn writers_closed(&self) -> usize {
        self.shared.writers_closed.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

impl DeviceSink for MemorySink {
    fn new_writer(&self) -> Result<Box<dyn SinkWriter>> {
        if self.is_closed() {
            bail!("memory sink is closed");
        }
        let id = self.shared.next_writer.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryWriter {
            id,
            shared: self.shared.clone(),
            closed: false,
        }))
    }

    fn close(&self) -> Result<()> {
        self.shared.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl SinkWriter for MemoryWriter {
    fn write(&mut self, chunk: &[u8]) -> Result<()> {
        if self.closed || self.shared.closed.load(Ordering::SeqCst) {
            bail!("write to closed memory writer {}", self.id);
        }
        if let Some(delay) = self.shared.options.write_delay {
            thread::sleep(delay);
        }
        let attempt = self.shared.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.shared.options.fail_after_writes {
            if attempt >= limit {
                bail!("injected device failure after {limit} writes");
            }
        }
        self.shared.writes.lock().push(RecordedWrite {
            writer: self.id,
            bytes: chunk.to_vec(),
        });
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.shared.writers_closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_writes_per_writer() {
        let sink = MemorySink::new();
        let mut a = sink.new_writer().unwrap();
        let mut b = sink.new_writer().unwrap();
        a.write(&[1, 2]).unwrap();
        b.write(&[3, 4]).unwrap();
        a.write(&[5, 6]).unwrap();

        assert_eq!(sink.writers_opened(), 2);
        assert_eq!(sink.chunks_for(0), vec![vec![1, 2], vec![5, 6]]);
        assert_eq!(sink.chunks_for(1), vec![vec![3, 4]]);
        assert_eq!(sink.total_bytes(), 6);
    }

    #[test]
    fn injected_failure_trips_after_limit() {
        let sink = MemorySink::with_options(MemorySinkOptions {
            fail_after_writes: Some(1),
            ..MemorySinkOptions::default()
        });
        let mut w = sink.new_writer().unwrap();
        w.write(&[0, 0]).unwrap();
        assert!(w.write(&[0, 0]).is_err());
        assert_eq!(sink.write_count(), 1);
    }

    #[test]
    fn writer_close_is_counted_once() {
        let sink = MemorySink::new();
        let mut w = sink.new_writer().unwrap();
        w.close().unwrap();
        w.close().unwrap();
        assert_eq!(sink.writers_closed(), 1);
        assert!(w.write(&[0, 0]).is_err());
    }

    #[test]
    fn closed_sink_rejects_writers() {
        let sink = MemorySink::new();
        sink.close().unwrap();
        sink.close().unwrap();
        assert!(sink.is_closed());
        assert!(sink.new_writer().is_err());
    }
}
