use crate::pcm::BYTES_PER_SAMPLE;

/// Default size of one chunk handed from the read stage to the device writer.
pub const DEFAULT_CHUNK_BYTES: usize = 2048;

/// Playback parameters shared by every player of a context.
#[derive(Clone, Debug)]
pub struct ContextConfig {
    /// Fixed sample rate of every source, in Hz.
    pub sample_rate: u32,
    /// Interleaved channel count; one frame is `channels * 2` bytes.
    pub channels: u16,
    /// Admission semaphore capacity: reads allowed in flight across all players.
    pub max_in_flight_reads: usize,
    /// Upper bound on the bytes emitted per chunk.
    pub chunk_bytes: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 1,
            max_in_flight_reads: 8,
            chunk_bytes: DEFAULT_CHUNK_BYTES,
        }
    }
}

impl ContextConfig {
    pub fn new(sample_rate: u32, max_in_flight_reads: usize) -> Self {
        Self {
            sample_rate,
            max_in_flight_reads,
            ..Self::default()
        }
    }

    /// Bytes per interleaved frame.
    pub fn frame_bytes(&self) -> usize {
        usize::from(self.channels.max(1)) * BYTES_PER_SAMPLE
    }

    /// Clamp degenerate values so the pipeline arithmetic stays well defined.
    ///
    /// `chunk_bytes` is rounded down to whole frames and never drops below one frame.
    pub(crate) fn normalized(mut self) -> Self {
        self.sample_rate = self.sample_rate.max(1);
        self.channels = self.channels.max(1);
        self.max_in_flight_reads = self.max_in_flight_reads.max(1);
        let frame = self.frame_bytes();
        self.chunk_bytes = (self.chunk_bytes - self.chunk_bytes % frame).max(frame);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_chunking() {
        let cfg = ContextConfig::default();
        assert_eq!(cfg.sample_rate, 44_100);
        assert_eq!(cfg.chunk_bytes, 2048);
        assert_eq!(cfg.frame_bytes(), 2);
    }

    #[test]
    fn normalized_rounds_chunk_to_whole_frames() {
        let cfg = ContextConfig {
            channels: 2,
            chunk_bytes: 1030,
            ..ContextConfig::default()
        }
        .normalized();
        assert_eq!(cfg.frame_bytes(), 4);
        assert_eq!(cfg.chunk_bytes, 1028);
    }

    #[test]
    fn normalized_replaces_zero_values() {
        let cfg = ContextConfig {
            sample_rate: 0,
            channels: 0,
            max_in_flight_reads: 0,
            chunk_bytes: 1,
        }
        .normalized();
        assert_eq!(cfg.sample_rate, 1);
        assert_eq!(cfg.channels, 1);
        assert_eq!(cfg.max_in_flight_reads, 1);
        assert_eq!(cfg.chunk_bytes, 2);
    }
}
