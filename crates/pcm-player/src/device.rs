//! Output device discovery and selection.
//!
//! Thin wrappers around CPAL for:
//! - listing available output devices
//! - selecting either the default device or a device by substring match
//! - choosing a stream config that runs at exactly the context sample rate

use anyhow::{Context, Result, anyhow, bail};
use cpal::traits::{DeviceTrait, HostTrait};

/// Pick the first output device whose name contains `needle` (case-insensitive), or the
/// host default device when `needle` is `None`.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    if let Some(needle) = needle {
        let mut devices = host.output_devices().context("No output devices")?;
        return devices
            .find(|d| {
                d.description()
                    .ok()
                    .map(|n| matches_device_name(&n.name(), needle))
                    .unwrap_or(false)
            })
            .ok_or_else(|| anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Choose an output config running at exactly `rate_hz`.
///
/// Among the ranges containing the rate, the best sample format wins. No resampling is
/// performed, so a device that cannot run at `rate_hz` is an error.
pub fn pick_output_config(
    device: &cpal::Device,
    rate_hz: u32,
) -> Result<cpal::SupportedStreamConfig> {
    let mut best: Option<(u8, cpal::SupportedStreamConfig)> = None;
    let mut nearest: Option<u32> = None;

    for range in device.supported_output_configs()? {
        let rate = pick_rate_for_range(range.min_sample_rate(), range.max_sample_rate(), rate_hz);
        if rate != rate_hz {
            if is_closer(rate, nearest, rate_hz) {
                nearest = Some(rate);
            }
            continue;
        }
        let rank = sample_format_rank(range.sample_format());
        let replace = best.as_ref().map(|(r, _)| rank < *r).unwrap_or(true);
        if replace {
            best = Some((rank, range.with_sample_rate(rate)));
        }
    }

    match (best, nearest) {
        (Some((_, cfg)), _) => Ok(cfg),
        (None, Some(nearest)) => {
            bail!("Output device cannot run at {rate_hz} Hz (nearest supported: {nearest} Hz)")
        }
        (None, None) => Err(anyhow!("No supported output configs")),
    }
}

/// Prefer a fixed buffer size if the device advertises a range.
///
/// Returns `None` when the device only supports the default buffer size.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            const MAX_FRAMES: u32 = 16_384;
            let chosen = if *max > MAX_FRAMES {
                if *min > MAX_FRAMES { *min } else { MAX_FRAMES }
            } else {
                *max
            };
            Some(cpal::BufferSize::Fixed(chosen))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Print available output devices to stdout.
pub fn list_devices(host: &cpal::Host) -> Result<()> {
    let devices = host.output_devices().context("No output devices")?;
    for (i, d) in devices.enumerate() {
        println!("#{i}: {}", d.description()?);
    }
    Ok(())
}

fn pick_rate_for_range(min: u32, max: u32, target: u32) -> u32 {
    target.clamp(min, max.max(min))
}

fn is_closer(rate: u32, current: Option<u32>, target: u32) -> bool {
    match current {
        None => true,
        Some(c) => rate.abs_diff(target) < c.abs_diff(target),
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::I16 => 0,
        cpal::SampleFormat::F32 => 1,
        cpal::SampleFormat::I32 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}
