//! Real audio device sink backed by CPAL.
//!
//! Every writer owns a bounded sample queue and an output thread. The thread opens the
//! device, builds the CPAL stream and keeps it alive until the writer closes, so no CPAL
//! handle ever crosses a thread boundary.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow, bail};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::Sender;

use super::{DeviceSink, SinkWriter};
use crate::config::ContextConfig;
use crate::pcm::BYTES_PER_SAMPLE;
use crate::playback::{self, CallbackConfig};
use crate::queue::{self, SampleQueue};
use crate::device;

/// Device selection and buffering for [`OutputSink`].
#[derive(Clone, Debug)]
pub struct OutputSinkConfig {
    /// Substring of the output device name; host default when `None`.
    pub device: Option<String>,
    /// Per-writer queue size, in seconds of audio.
    pub buffer_seconds: f32,
    /// Max frames pulled per output callback refill.
    pub refill_max_frames: usize,
}

impl Default for OutputSinkConfig {
    fn default() -> Self {
        Self {
            device: None,
            buffer_seconds: 0.5,
            refill_max_frames: 4096,
        }
    }
}

/// Audio device sink playing through the host's output device.
pub struct OutputSink {
    config: OutputSinkConfig,
    sample_rate: u32,
    channels: usize,
    closed: AtomicBool,
}

impl OutputSink {
    /// Validate that the selected device can run at the context rate and prepare the sink.
    pub fn open(config: OutputSinkConfig, ctx: &ContextConfig) -> Result<Self> {
        let host = cpal::default_host();
        let device = device::pick_device(&host, config.device.as_deref())?;
        let stream_cfg = device::pick_output_config(&device, ctx.sample_rate)?;
        tracing::info!(
            device = %device.description()?,
            rate_hz = ctx.sample_rate,
            channels = stream_cfg.channels(),
            format = ?stream_cfg.sample_format(),
            "output device"
        );
        Ok(Self {
            config,
            sample_rate: ctx.sample_rate,
            channels: usize::from(ctx.channels.max(1)),
            closed: AtomicBool::new(false),
        })
    }
}

impl DeviceSink for OutputSink {
    fn new_writer(&self) -> Result<Box<dyn SinkWriter>> {
        if self.closed.load(Ordering::SeqCst) {
            bail!("output sink is closed");
        }
        let writer = OutputWriter::start(&self.config, self.sample_rate, self.channels)?;
        Ok(Box::new(writer))
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct OutputWriter {
    queue: Arc<SampleQueue>,
    played_frames: Arc<AtomicU64>,
    underrun_frames: Arc<AtomicU64>,
    failed: Arc<AtomicBool>,
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
    scratch: Vec<i16>,
}

impl OutputWriter {
    fn start(config: &OutputSinkConfig, sample_rate: u32, channels: usize) -> Result<Self> {
        let capacity =
            queue::calc_max_buffered_samples(sample_rate, channels, config.buffer_seconds);
        let queue = Arc::new(SampleQueue::new(channels, capacity));
        let cb = CallbackConfig {
            refill_max_frames: config.refill_max_frames,
            played_frames: Arc::new(AtomicU64::new(0)),
            underrun_frames: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicBool::new(false)),
        };
        let played_frames = cb.played_frames.clone();
        let underrun_frames = cb.underrun_frames.clone();
        let failed = cb.failed.clone();

        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<()>>(1);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let needle = config.device.clone();
        let queue_thread = queue.clone();

        let thread = thread::Builder::new()
            .name("pcm-output".to_string())
            .spawn(move || {
                let stream = match open_stream(needle.as_deref(), sample_rate, &queue_thread, cb) {
                    Ok(stream) => stream,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Returns once the writer drops `stop_tx`.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .context("spawn output thread")?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let _ = thread.join();
                return Err(err);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(anyhow!("output thread exited before the stream started"));
            }
        }

        Ok(Self {
            queue,
            played_frames,
            underrun_frames,
            failed,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
            scratch: Vec::new(),
        })
    }
}

fn open_stream(
    needle: Option<&str>,
    sample_rate: u32,
    queue: &Arc<SampleQueue>,
    cb: CallbackConfig,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = device::pick_device(&host, needle)?;
    let config = device::pick_output_config(&device, sample_rate)?;
    let mut stream_config: cpal::StreamConfig = config.clone().into();
    if let Some(buf) = device::pick_buffer_size(&config) {
        stream_config.buffer_size = buf;
    }
    let stream =
        playback::build_output_stream(&device, &stream_config, config.sample_format(), queue, cb)?;
    stream.play()?;
    Ok(stream)
}

impl SinkWriter for OutputWriter {
    fn write(&mut self, chunk: &[u8]) -> Result<()> {
        if self.failed.load(Ordering::Relaxed) {
            bail!("output stream failed");
        }
        self.scratch.clear();
        self.scratch.extend(
            chunk
                .chunks_exact(BYTES_PER_SAMPLE)
                .map(|b| i16::from_le_bytes([b[0], b[1]])),
        );
        if !self.queue.push_interleaved_blocking(&self.scratch) {
            if self.failed.load(Ordering::Relaxed) {
                bail!("output stream failed");
            }
            bail!("output queue closed");
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let Some(stop_tx) = self.stop_tx.take() else {
            return Ok(());
        };
        let drained = self.queue.wait_until_drained_or_cancel(&self.failed);
        self.queue.close();
        drop(stop_tx);
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| anyhow!("output thread panicked"))?;
        }
        tracing::debug!(
            played_frames = self.played_frames.load(Ordering::Relaxed),
            underrun_frames = self.underrun_frames.load(Ordering::Relaxed),
            drained,
            "output writer closed"
        );
        Ok(())
    }
}

impl Drop for OutputWriter {
    fn drop(&mut self) {
        self.failed.store(true, Ordering::Relaxed);
        let _ = SinkWriter::close(self);
    }
}
