//! Common Utilities
//!
//! Sample format conversion between device wire format (interleaved 16-bit
//! I/Q) and floating point, plus small numeric helpers.

use num_complex::Complex32;
use tracing::trace;

/// Convert interleaved 16-bit I/Q into complex floats.
///
/// Converts `min(output.len(), input.len() / 2)` samples and returns that count.
/// The floats keep the integer scale, so full scale is 32767.0.
pub fn convert_short_float(output: &mut [Complex32], input: &[i16]) -> usize {
    let count = output.len().min(input.len() / 2);

    for (out, iq) in output.iter_mut().zip(input.chunks_exact(2)) {
        *out = Complex32::new(iq[0] as f32, iq[1] as f32);
    }

    count
}

/// Convert complex floats into interleaved 16-bit I/Q, applying `scale`.
///
/// Values outside the 16-bit range saturate instead of wrapping.
pub fn convert_float_short(output: &mut [i16], input: &[Complex32], scale: f32) -> usize {
    let count = input.len().min(output.len() / 2);
    let mut clipped = 0usize;

    for (iq, sample) in output.chunks_exact_mut(2).zip(input.iter()) {
        let re = sample.re * scale;
        let im = sample.im * scale;
        if re.abs() > i16::MAX as f32 || im.abs() > i16::MAX as f32 {
            clipped += 1;
        }
        iq[0] = saturate(re);
        iq[1] = saturate(im);
    }

    if clipped > 0 {
        trace!("Clipped {} of {} samples during conversion", clipped, count);
    }

    count
}

fn saturate(value: f32) -> i16 {
    value.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Compare two frequencies within an absolute tolerance in Hz
pub fn freq_within(a: f64, b: f64, tolerance: f64) -> bool {
    (a - b).abs() < tolerance
}

/// Mean power of a block of samples
pub fn mean_power(samples: &[Complex32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    samples.iter().map(|s| s.norm_sqr()).sum::<f32>() / samples.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_short_float() {
        let input = [100i16, -200, i16::MAX, i16::MIN];
        let mut output = vec![Complex32::new(0.0, 0.0); 2];

        assert_eq!(convert_short_float(&mut output, &input), 2);
        assert_eq!(output[0], Complex32::new(100.0, -200.0));
        assert_eq!(output[1], Complex32::new(32767.0, -32768.0));
    }

    #[test]
    fn test_convert_float_short_scaling() {
        let input = [Complex32::new(1000.0, -3000.0)];
        let mut output = [0i16; 2];

        assert_eq!(convert_float_short(&mut output, &input, 0.5), 1);
        assert_eq!(output, [500, -1500]);
    }

    #[test]
    fn test_convert_float_short_saturates() {
        let input = [Complex32::new(1.0e6, -1.0e6)];
        let mut output = [0i16; 2];

        convert_float_short(&mut output, &input, 1.0);
        assert_eq!(output, [i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_freq_within() {
        assert!(freq_within(900.0e6, 900.0e6 + 9.0, 10.0));
        assert!(!freq_within(900.0e6, 900.0e6 + 10.0, 10.0));
    }

    #[test]
    fn test_mean_power() {
        assert_eq!(mean_power(&[]), 0.0);
        let block = vec![Complex32::new(3.0, 4.0); 8];
        assert!((mean_power(&block) - 25.0).abs() < 1e-6);
    }
}
