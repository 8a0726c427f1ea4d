use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "pcm-play", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Sample rate of the raw input files, in Hz
    #[arg(long, default_value_t = 44_100)]
    pub sample_rate: u32,

    /// Interleaved channel count of the raw input files
    #[arg(long, default_value_t = 2)]
    pub channels: u16,

    /// Source reads allowed in flight across all players
    #[arg(long, default_value_t = 8)]
    pub max_in_flight: usize,

    /// Bytes moved from the read stage to the device writer per chunk
    #[arg(long, default_value_t = 2048)]
    pub chunk_bytes: usize,

    /// Device queue per player, in seconds (higher => more latency, fewer underruns)
    #[arg(long, default_value_t = 0.5)]
    pub buffer_seconds: f32,

    /// Host frame interval driving the frame hooks, in milliseconds
    #[arg(long, default_value_t = 16)]
    pub frame_interval_ms: u64,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play raw s16le PCM files, all at once
    Play {
        /// Paths to raw little-endian 16-bit PCM files
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Volume factor between 0 and 1
        #[arg(long, default_value_t = 1.0, value_parser = parse_volume)]
        volume: f64,

        /// Start position in milliseconds
        #[arg(long)]
        seek_ms: Option<u64>,

        /// Play every file this many times, rewinding in between
        #[arg(long, default_value_t = 1)]
        loop_count: u32,
    },

    /// List output devices and exit
    Devices,
}

/// Reject volumes outside [0, 1] (including NaN) before they reach the player.
pub fn parse_volume(s: &str) -> Result<f64, String> {
    let v: f64 = s.parse().map_err(|e| format!("invalid volume {s:?}: {e}"))?;
    if (0.0..=1.0).contains(&v) {
        Ok(v)
    } else {
        Err(format!("volume must be between 0 and 1, got {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_volume_accepts_inclusive_range() {
        assert_eq!(parse_volume("0"), Ok(0.0));
        assert_eq!(parse_volume("0.25"), Ok(0.25));
        assert_eq!(parse_volume("1"), Ok(1.0));
    }

    #[test]
    fn parse_volume_rejects_out_of_range_and_nan() {
        assert!(parse_volume("1.5").is_err());
        assert!(parse_volume("-0.1").is_err());
        assert!(parse_volume("NaN").is_err());
        assert!(parse_volume("loud").is_err());
    }

    #[test]
    fn play_defaults() {
        let args = Args::try_parse_from(["pcm-play", "play", "a.raw"]).expect("parse args");
        assert_eq!(args.sample_rate, 44_100);
        assert_eq!(args.chunk_bytes, 2048);
        match args.cmd {
            Command::Play {
                paths,
                volume,
                seek_ms,
                loop_count,
            } => {
                assert_eq!(paths, vec![PathBuf::from("a.raw")]);
                assert_eq!(volume, 1.0);
                assert_eq!(seek_ms, None);
                assert_eq!(loop_count, 1);
            }
            Command::Devices => panic!("expected play"),
        }
    }

    #[test]
    fn play_requires_a_path() {
        assert!(Args::try_parse_from(["pcm-play", "play"]).is_err());
    }
}
