//! Byte-level arithmetic on interleaved little-endian `i16` PCM.
//!
//! Everything here is pure: frame alignment of a read stream, in-place volume scaling and the
//! conversions between byte offsets and playback time.

use std::time::Duration;

/// Size in bytes of one 16-bit sample.
pub const BYTES_PER_SAMPLE: usize = 2;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Append `fresh` to the carried-over `pending` bytes and split off the frame-aligned prefix.
///
/// On return `pending` holds the trailing `0..frame_bytes` bytes that did not complete a frame;
/// they are carried into the next call.
pub fn take_aligned(pending: &mut Vec<u8>, fresh: &[u8], frame_bytes: usize) -> Vec<u8> {
    let mut buf = std::mem::take(pending);
    buf.extend_from_slice(fresh);
    let aligned = buf.len() - buf.len() % frame_bytes;
    *pending = buf.split_off(aligned);
    buf
}

/// Scale every sample in `buf` by `volume`, in place.
///
/// The product is truncated toward zero. A trailing odd byte, if any, is left untouched.
pub fn scale_volume(buf: &mut [u8], volume: f64) {
    for sample in buf.chunks_exact_mut(BYTES_PER_SAMPLE) {
        let v = i16::from_le_bytes([sample[0], sample[1]]);
        let scaled = (f64::from(v) * volume) as i16;
        sample.copy_from_slice(&scaled.to_le_bytes());
    }
}

/// Playback time covered by `bytes` of audio.
pub fn bytes_to_duration(bytes: u64, frame_bytes: usize, sample_rate: u32) -> Duration {
    let frames = u128::from(bytes / frame_bytes as u64);
    let nanos = frames * NANOS_PER_SEC / u128::from(sample_rate);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// Byte offset of `offset`, rounded down to the nearest whole frame.
pub fn duration_to_offset(offset: Duration, frame_bytes: usize, sample_rate: u32) -> u64 {
    let frame = frame_bytes as u128;
    let bytes = offset
        .as_nanos()
        .checked_mul(frame)
        .and_then(|v| v.checked_mul(u128::from(sample_rate)))
        .map_or(u128::MAX, |v| v / NANOS_PER_SEC);
    let aligned = bytes - bytes % frame;
    u64::try_from(aligned).unwrap_or(u64::MAX - u64::MAX % frame_bytes as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(values: &[i16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn decode(buf: &[u8]) -> Vec<i16> {
        buf.chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    #[test]
    fn scale_volume_unity_keeps_samples() {
        let input = [i16::MIN, -1000, -1, 0, 1, 1000, i16::MAX];
        let mut buf = samples(&input);
        scale_volume(&mut buf, 1.0);
        assert_eq!(decode(&buf), input);
    }

    #[test]
    fn scale_volume_zero_silences() {
        let mut buf = samples(&[i16::MIN, -7, 7, i16::MAX]);
        scale_volume(&mut buf, 0.0);
        assert_eq!(decode(&buf), vec![0, 0, 0, 0]);
    }

    #[test]
    fn scale_volume_truncates_toward_zero() {
        let mut buf = samples(&[1000, 1001, -1001, 3]);
        scale_volume(&mut buf, 0.5);
        assert_eq!(decode(&buf), vec![500, 500, -500, 1]);
    }

    #[test]
    fn scale_volume_ignores_trailing_odd_byte() {
        let mut buf = samples(&[1000]);
        buf.push(0x7f);
        scale_volume(&mut buf, 0.5);
        assert_eq!(&buf[..2], &500i16.to_le_bytes());
        assert_eq!(buf[2], 0x7f);
    }

    #[test]
    fn take_aligned_carries_odd_bytes_across_reads() {
        let data: Vec<u8> = (0u8..=40).collect();
        let mut pending = Vec::new();
        let mut emitted = Vec::new();
        let mut offset = 0;
        for size in [1, 3, 2, 5, 7, 1, 1, 9, 4, 8] {
            let chunk = take_aligned(&mut pending, &data[offset..offset + size], 2);
            assert_eq!(chunk.len() % 2, 0);
            assert!(pending.len() < 2);
            emitted.extend_from_slice(&chunk);
            offset += size;
        }
        assert_eq!(offset, data.len());
        assert_eq!(emitted.len() + pending.len(), data.len());
        assert_eq!(emitted, &data[..emitted.len()]);
        assert_eq!(pending, &data[emitted.len()..]);
    }

    #[test]
    fn take_aligned_can_emit_empty_chunk() {
        let mut pending = Vec::new();
        let chunk = take_aligned(&mut pending, &[1, 2, 3], 4);
        assert!(chunk.is_empty());
        assert_eq!(pending, vec![1, 2, 3]);
        let chunk = take_aligned(&mut pending, &[4, 5], 4);
        assert_eq!(chunk, vec![1, 2, 3, 4]);
        assert_eq!(pending, vec![5]);
    }

    #[test]
    fn offset_for_one_second_mono() {
        assert_eq!(duration_to_offset(Duration::from_secs(1), 2, 44_100), 88_200);
        assert_eq!(
            bytes_to_duration(88_200, 2, 44_100),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn offset_rounds_down_to_frame() {
        // 1.5 frames at 48 kHz stereo.
        let offset = Duration::from_nanos(31_250);
        assert_eq!(duration_to_offset(offset, 4, 48_000), 4);
        assert_eq!(duration_to_offset(Duration::from_nanos(1), 4, 48_000), 0);
    }

    #[test]
    fn duration_ignores_partial_frames() {
        assert_eq!(bytes_to_duration(3, 4, 1), Duration::ZERO);
        assert_eq!(bytes_to_duration(8, 4, 1), Duration::from_secs(2));
    }

    #[test]
    fn huge_seek_offset_saturates_to_a_whole_frame() {
        let frame = 2 * usize::from(u16::MAX);
        let offset = duration_to_offset(Duration::MAX, frame, u32::MAX);
        assert_eq!(offset, u64::MAX - u64::MAX % frame as u64);
        assert_eq!(offset % frame as u64, 0);
    }
}
