//! CPAL output stream fed from a [`SampleQueue`].
//!
//! The callback:
//! - refills a small local buffer from the shared queue without blocking
//! - applies basic channel mapping (mono↔stereo, best-effort otherwise)
//! - converts `i16` samples to the device sample format

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;
use parking_lot::Mutex;

use crate::queue::{PopStrategy, SampleQueue};

/// Configuration for the output callback.
#[derive(Clone, Debug)]
pub struct CallbackConfig {
    /// Maximum number of frames to pull from the queue per refill.
    pub refill_max_frames: usize,
    /// Incremented by the number of frames taken from the queue.
    pub played_frames: Arc<AtomicU64>,
    /// Incremented by the number of frames filled with silence.
    pub underrun_frames: Arc<AtomicU64>,
    /// Set when the stream reports an error; writers stop waiting for a drain.
    pub failed: Arc<AtomicBool>,
}

/// Build a CPAL output stream that plays interleaved `i16` audio from `queue`.
pub fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    queue: &Arc<SampleQueue>,
    cfg: CallbackConfig,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, queue, cfg),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, queue, cfg),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, queue, cfg),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, queue, cfg),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: &Arc<SampleQueue>,
    cfg: CallbackConfig,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<i16>,
{
    let channels_out = usize::from(config.channels).max(1);
    let refill_max_frames = cfg.refill_max_frames.max(1);

    let state = Arc::new(Mutex::new(CallbackState {
        pos: 0,
        src_channels: queue.channels(),
        src: Vec::new(),
    }));

    let queue_cb = queue.clone();
    let played_frames = cfg.played_frames.clone();
    let underrun_frames = cfg.underrun_frames.clone();
    let failed = cfg.failed.clone();
    let queue_err = queue.clone();

    let err_fn = move |err| {
        tracing::warn!("stream error: {err}");
        mark_failed(&queue_err, &failed);
    };

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let mut st = state.lock();

            let frames = data.len() / channels_out;
            let mut filled_frames = 0u64;

            for frame in 0..frames {
                if st.pos >= st.src.len() {
                    st.pos = 0;
                    st.src.clear();
                    match queue_cb.pop(PopStrategy::NonBlocking {
                        max_frames: refill_max_frames,
                    }) {
                        Some(v) => st.src = v,
                        None => {
                            let remaining = frames.saturating_sub(frame);
                            underrun_frames.fetch_add(remaining as u64, Ordering::Relaxed);
                            data[frame * channels_out..].fill(T::EQUILIBRIUM);
                            break;
                        }
                    }
                }
                for ch in 0..channels_out {
                    let sample = next_sample_mapped(&mut st, channels_out, ch);
                    data[frame * channels_out + ch] = T::from_sample(sample);
                }
                filled_frames += 1;
            }

            if filled_frames > 0 {
                played_frames.fetch_add(filled_frames, Ordering::Relaxed);
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

/// Flag the stream as failed and close its queue.
///
/// The callback may never drain again, so a writer blocked on a full queue has to be woken.
fn mark_failed(queue: &SampleQueue, failed: &AtomicBool) {
    failed.store(true, Ordering::Relaxed);
    queue.close();
}

/// Local buffer state for the CPAL callback.
struct CallbackState {
    pos: usize,
    src_channels: usize,
    src: Vec<i16>,
}

/// Read one output sample for `dst_ch`, applying a simple channel mapping.
///
/// - mono → stereo: duplicate channel 0
/// - stereo → mono: average L/R
/// - other layouts: clamp to the available source channels
///
/// `st.pos` advances once per destination frame (after the last channel).
fn next_sample_mapped(st: &mut CallbackState, dst_channels: usize, dst_ch: usize) -> i16 {
    if st.pos >= st.src.len() {
        return 0;
    }

    let frame_start = st.pos;
    let get_src = |ch: usize, st: &CallbackState| -> i16 {
        if ch < st.src_channels && frame_start + ch < st.src.len() {
            st.src[frame_start + ch]
        } else {
            0
        }
    };

    let out = match (st.src_channels, dst_channels) {
        (2, 1) => ((i32::from(get_src(0, st)) + i32::from(get_src(1, st))) / 2) as i16,
        (1, _) => get_src(0, st),
        _ => get_src(dst_ch.min(st.src_channels.saturating_sub(1)), st),
    };

    if dst_ch + 1 == dst_channels {
        st.pos += st.src_channels;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(src_channels: usize, src: Vec<i16>) -> CallbackState {
        CallbackState {
            pos: 0,
            src_channels,
            src,
        }
    }

    #[test]
    fn mono_is_duplicated_to_stereo() {
        let mut st = state(1, vec![10, 20]);
        let out: Vec<i16> = (0..4).map(|i| next_sample_mapped(&mut st, 2, i % 2)).collect();
        assert_eq!(out, vec![10, 10, 20, 20]);
    }

    #[test]
    fn stereo_is_averaged_to_mono() {
        let mut st = state(2, vec![100, 300, i16::MAX, i16::MAX]);
        assert_eq!(next_sample_mapped(&mut st, 1, 0), 200);
        assert_eq!(next_sample_mapped(&mut st, 1, 0), i16::MAX);
        assert_eq!(next_sample_mapped(&mut st, 1, 0), 0);
    }

    #[test]
    fn stereo_passes_through() {
        let mut st = state(2, vec![1, 2, 3, 4]);
        let out: Vec<i16> = (0..4).map(|i| next_sample_mapped(&mut st, 2, i % 2)).collect();
        assert_eq!(out, vec![1, 2, 3, 4]);
    }

    #[test]
    fn extra_output_channels_clamp_to_last_source_channel() {
        let mut st = state(2, vec![5, 6]);
        let out: Vec<i16> = (0..4).map(|i| next_sample_mapped(&mut st, 4, i)).collect();
        assert_eq!(out, vec![5, 6, 6, 6]);
    }

    #[test]
    fn stream_failure_releases_a_writer_blocked_on_a_full_queue() {
        let queue = Arc::new(SampleQueue::new(1, 4));
        let failed = AtomicBool::new(false);
        assert!(queue.push_interleaved_blocking(&[1, 2, 3, 4]));

        let writer = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.push_interleaved_blocking(&[5, 6]))
        };
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!writer.is_finished());

        mark_failed(&queue, &failed);
        assert!(!writer.join().unwrap());
        assert!(failed.load(Ordering::Relaxed));
        assert!(queue.is_done());
    }
}
