//! PCM16LE helpers for the fixed inbound audio format.
//!
//! The speech service sends mono, 16-bit signed little-endian PCM at
//! 22 050 Hz for the whole session.

/// Inbound sample rate in Hz.
pub const SOURCE_SAMPLE_RATE: u32 = 22_050;

/// Bytes per mono PCM16 sample.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Convert PCM16LE bytes into normalised `f32` samples (`i16 / 32768`).
///
/// A trailing odd byte is ignored.
///
/// ```rust
/// use tts_sync::audio::pcm16le_to_f32;
///
/// let samples = pcm16le_to_f32(&[0x00, 0x40, 0x00, 0x80]);
/// assert_eq!(samples, vec![0.5, -1.0]);
/// ```
pub fn pcm16le_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32_768.0)
        .collect()
}

/// Playback duration in seconds of `byte_len` bytes of mono PCM16.
pub fn duration_secs(byte_len: usize, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    (byte_len / BYTES_PER_SAMPLE) as f64 / sample_rate as f64
}

/// Playback duration in whole milliseconds (truncated) of `byte_len` bytes
/// of mono PCM16.
pub fn duration_ms(byte_len: usize, sample_rate: u32) -> i64 {
    if sample_rate == 0 {
        return 0;
    }
    (byte_len as u64 * 1_000 / (BYTES_PER_SAMPLE as u64 * sample_rate as u64)) as i64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
