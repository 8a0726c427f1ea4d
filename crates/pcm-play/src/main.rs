//! pcm-play: plays raw s16le PCM files through the streaming playback core.
//!
//! The binary plays the host role: it owns the frame loop that drives the frame hooks, creates
//! one context with a real output device sink, and runs one player per input file.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pcm_play::{cli, runtime};

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,pcm_play=info,pcm_player=info")
        }))
        .init();

    match &args.cmd {
        cli::Command::Devices => runtime::list_devices(),
        cli::Command::Play {
            paths,
            volume,
            seek_ms,
            loop_count,
        } => runtime::run_play(runtime::PlayRequest {
            paths: paths.clone(),
            volume: *volume,
            seek_ms: *seek_ms,
            loop_count: *loop_count,
            context: runtime::context_config(&args),
            output: runtime::output_config(&args),
            frame_interval: std::time::Duration::from_millis(args.frame_interval_ms.max(1)),
        }),
    }
}
