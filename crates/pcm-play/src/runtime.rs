//! Host runtime: opens the output device lazily, drives the frame hooks and supervises one
//! player per input file.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};

use crate::cli::Args;
use pcm_player::sink::{OutputSink, OutputSinkConfig};
use pcm_player::{Context, ContextConfig, DeviceSink, FrameGate, PlaybackState, Player, Source};

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Everything `run_play` needs, resolved from the command line.
#[derive(Clone, Debug)]
pub struct PlayRequest {
    pub paths: Vec<PathBuf>,
    pub volume: f64,
    pub seek_ms: Option<u64>,
    pub loop_count: u32,
    pub context: ContextConfig,
    pub output: OutputSinkConfig,
    pub frame_interval: Duration,
}

struct Track {
    path: PathBuf,
    player: Player,
    plays_left: u32,
}

impl Track {
    /// The last started run reached the end of its source.
    fn run_finished(&self) -> bool {
        self.player.state() == PlaybackState::Idle && !self.player.is_streaming()
    }
}

pub fn context_config(args: &Args) -> ContextConfig {
    ContextConfig {
        sample_rate: args.sample_rate,
        channels: args.channels,
        max_in_flight_reads: args.max_in_flight,
        chunk_bytes: args.chunk_bytes,
    }
}

pub fn output_config(args: &Args) -> OutputSinkConfig {
    OutputSinkConfig {
        device: normalize_device_name(args.device.clone()),
        buffer_seconds: args.buffer_seconds,
        ..OutputSinkConfig::default()
    }
}

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    pcm_player::device::list_devices(&host)
}

/// Play every requested file on the output device until all finish or Ctrl-C.
pub fn run_play(req: PlayRequest) -> Result<()> {
    let gate = FrameGate::new();
    let output = req.output.clone();
    let ctx = Context::new(req.context.clone(), &gate, move |cfg| {
        let sink = OutputSink::open(output, cfg)?;
        Ok(Arc::new(sink) as Arc<dyn DeviceSink>)
    });

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        let _ = ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst));
    }

    let result = open_tracks(&ctx, &req)
        .and_then(|mut tracks| drive(&ctx, &gate, &mut tracks, &stop, req.frame_interval));
    let closed = ctx.close().context("close audio context");
    result?;
    closed?;
    Ok(())
}

fn open_tracks(ctx: &Context, req: &PlayRequest) -> Result<Vec<Track>> {
    let mut tracks = Vec::with_capacity(req.paths.len());
    for path in &req.paths {
        let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
        let player = ctx.create_player(Source::from(file));
        player.set_volume(req.volume);
        if let Some(ms) = req.seek_ms {
            player
                .seek(Duration::from_millis(ms))
                .with_context(|| format!("seek {} to {ms} ms", path.display()))?;
        }
        tracks.push(Track {
            path: path.clone(),
            player,
            plays_left: req.loop_count.max(1),
        });
    }
    Ok(tracks)
}

/// Host frame loop. Returns once every track has played `loop_count` times, on the first
/// context error, or when `stop` is raised.
fn drive(
    ctx: &Context,
    gate: &FrameGate,
    tracks: &mut [Track],
    stop: &AtomicBool,
    frame_interval: Duration,
) -> Result<()> {
    for track in tracks.iter_mut() {
        track.player.play()?;
        track.plays_left -= 1;
        tracing::info!(path = %track.path.display(), "playing");
    }

    let mut last_report = Instant::now();
    loop {
        gate.run_before_update().context("frame hook")?;
        if let Some(err) = ctx.error() {
            return Err(err).context("playback failed");
        }
        if stop.load(Ordering::SeqCst) {
            tracing::info!("interrupted");
            return Ok(());
        }

        for track in tracks.iter_mut() {
            if track.plays_left > 0 && track.run_finished() {
                track.player.rewind()?;
                track.player.play()?;
                track.plays_left -= 1;
                tracing::info!(
                    path = %track.path.display(),
                    plays_left = track.plays_left,
                    "looping"
                );
            }
        }
        if tracks.iter().all(|t| t.plays_left == 0 && t.run_finished()) {
            tracing::info!(ready = ctx.is_ready(), "all tracks finished");
            return Ok(());
        }

        if last_report.elapsed() >= REPORT_INTERVAL {
            for track in tracks.iter() {
                tracing::info!(
                    path = %track.path.display(),
                    elapsed_ms = track.player.current().as_millis() as u64,
                    "progress"
                );
            }
            last_report = Instant::now();
        }
        thread::sleep(frame_interval);
    }
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
