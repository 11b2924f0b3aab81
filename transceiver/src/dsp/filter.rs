//! Prototype Filter Design
//!
//! Windowed-sinc lowpass design and polyphase decomposition shared by the
//! resampler and the filterbanks.

use crate::TrxError;
use ndarray::Array2;
use std::f64::consts::PI;

/// Design a lowpass FIR filter using the windowed sinc method.
///
/// `cutoff` is in cycles per sample (0 < cutoff < 0.5). Taps are Hamming
/// windowed and normalized to unity DC gain.
pub fn design_lowpass_filter(num_taps: usize, cutoff: f64) -> Result<Vec<f32>, TrxError> {
    if num_taps < 2 {
        return Err(TrxError::InvalidConfiguration(format!(
            "Filter needs at least 2 taps, got {}",
            num_taps
        )));
    }
    if !(cutoff > 0.0 && cutoff < 0.5) {
        return Err(TrxError::InvalidConfiguration(format!(
            "Degenerate filter cutoff {}",
            cutoff
        )));
    }

    let center = (num_taps - 1) as f64 / 2.0;
    let omega_c = 2.0 * PI * cutoff;

    let taps: Vec<f64> = (0..num_taps)
        .map(|i| {
            let n = i as f64 - center;

            // Sinc function
            let sinc = if n.abs() < 1e-10 {
                omega_c / PI
            } else {
                (omega_c * n).sin() / (PI * n)
            };

            // Hamming window
            let window = 0.54 - 0.46 * (2.0 * PI * i as f64 / (num_taps - 1) as f64).cos();

            sinc * window
        })
        .collect();

    // Normalize filter
    let sum: f64 = taps.iter().sum();
    if sum.abs() < 1e-12 {
        return Err(TrxError::InvalidConfiguration("Filter has no DC response".to_string()));
    }

    Ok(taps.iter().map(|&t| (t / sum) as f32).collect())
}

/// Split `taps` into `branches` polyphase partitions.
///
/// Row `r` holds taps `r, r + branches, r + 2 * branches, ...`; the filter is
/// zero padded up to a whole number of taps per branch.
pub fn polyphase_partition(taps: &[f32], branches: usize) -> Array2<f32> {
    let per_branch = (taps.len() + branches - 1) / branches;
    let mut partitions = Array2::<f32>::zeros((branches, per_branch));

    for (i, &tap) in taps.iter().enumerate() {
        partitions[[i % branches, i / branches]] = tap;
    }

    partitions
}
