//! Sample-rate conversion for the output device.
//!
//! Inbound speech is 22 050 Hz; most output devices run at 44 100 or
//! 48 000 Hz.  [`resample`] converts with linear interpolation, which is
//! plenty for speech.

/// Resample mono `samples` from `from_rate` Hz to `to_rate` Hz using linear
/// interpolation.
///
/// * Equal rates return the input unchanged (cloned).
/// * Empty input or a zero rate returns an empty vector.
///
/// The output length is `ceil(samples.len() * to_rate / from_rate)`.
///
/// # Example
///
/// ```rust
/// use tts_sync::audio::resample;
///
/// // 10 ms @ 22.05 kHz → 10 ms @ 44.1 kHz
/// let out = resample(&vec![0.25_f32; 220], 22_050, 44_100);
/// assert_eq!(out.len(), 440);
/// ```
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return samples.to_vec();
    }

    if samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return Vec::new();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let output_len = (samples.len() as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_pos = i as f64 / ratio;
        let idx = src_pos as usize;
        let frac = (src_pos - idx as f64) as f32;

        let sample = if idx + 1 < samples.len() {
            samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
        } else if idx < samples.len() {
            samples[idx]
        } else {
            0.0
        };

        output.push(sample);
    }

    output
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
