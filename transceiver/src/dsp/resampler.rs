//! Rational Sample Rate Resampler
//!
//! Converts between the filterbank sub-band rate and the per-carrier rate by
//! a rational factor `p/q` with a polyphase FIR.
//!
//! The resampler keeps no state between calls. Every input block is preceded
//! by `len()` samples of head-room holding the tail of the previous block, so
//! consecutive calls behave like one continuous filter as long as callers
//! carry that history forward.

use super::filter::{design_lowpass_filter, polyphase_partition};
use crate::TrxError;
use common::logging::DDSP;
use ndarray::Array2;
use num_complex::Complex32;
use num_traits::Zero;
use tracing::debug;

/// Polyphase FIR resampler producing `p` output samples per `q` input samples
#[derive(Debug, Clone)]
pub struct Resampler {
    /// Interpolation factor
    p: usize,
    /// Decimation factor
    q: usize,
    /// Taps per polyphase partition
    filter_len: usize,
    /// Polyphase filter coefficients [phase][tap]
    partitions: Option<Array2<f32>>,
}

impl Resampler {
    /// Create a resampler by `p/q`; filters are built by [`Resampler::init`]
    pub fn new(p: usize, q: usize, filter_len: usize) -> Self {
        Self {
            p,
            q,
            filter_len,
            partitions: None,
        }
    }

    /// Design the anti-aliasing filter.
    ///
    /// `cutoff` scales the passband edge relative to the narrower of the
    /// two Nyquist bands and must lie in `(0, 1]`.
    pub fn init(&mut self, cutoff: f32) -> Result<(), TrxError> {
        if self.p == 0 || self.q == 0 || self.filter_len == 0 {
            return Err(TrxError::InvalidConfiguration(format!(
                "Invalid resampling ratio {}/{} with {} taps",
                self.p, self.q, self.filter_len
            )));
        }
        if !(cutoff > 0.0 && cutoff <= 1.0) {
            return Err(TrxError::InvalidConfiguration(format!(
                "Degenerate resampler cutoff {}",
                cutoff
            )));
        }

        let num_taps = self.p * self.filter_len;
        let edge = cutoff as f64 * 0.5 / self.p.max(self.q) as f64;
        let taps = design_lowpass_filter(num_taps, edge)?;

        // Apply interpolation gain compensation
        let gain = self.p as f32;
        let taps: Vec<f32> = taps.iter().map(|&x| x * gain).collect();

        self.partitions = Some(polyphase_partition(&taps, self.p));

        debug!(target: DDSP, "Resampler initialized: P={}, Q={}, {} taps per phase",
               self.p, self.q, self.filter_len);
        Ok(())
    }

    /// Filter length, which is also the head-room every input block needs
    pub fn len(&self) -> usize {
        self.filter_len
    }

    /// Number of output samples for `input_len` new input samples, if whole
    pub fn output_len(&self, input_len: usize) -> Option<usize> {
        let scaled = input_len * self.p;
        (scaled % self.q == 0).then(|| scaled / self.q)
    }

    /// Resample one block.
    ///
    /// `input` starts with `len()` history samples followed by the new block;
    /// the new block length times `p` must equal `output.len()` times `q`.
    pub fn rotate(&self, input: &[Complex32], output: &mut [Complex32]) -> Result<(), TrxError> {
        let partitions = self.partitions.as_ref().ok_or(TrxError::NotInitialized)?;

        if input.len() < self.filter_len {
            return Err(TrxError::BufferLength {
                expected: self.filter_len,
                actual: input.len(),
            });
        }

        let in_len = input.len() - self.filter_len;
        if in_len * self.p != output.len() * self.q {
            return Err(TrxError::BufferLength {
                expected: in_len * self.p / self.q,
                actual: output.len(),
            });
        }

        for (i, out) in output.iter_mut().enumerate() {
            let k = i * self.q;
            let newest = self.filter_len + k / self.p;
            let taps = partitions.row(k % self.p);

            let mut acc = Complex32::zero();
            for (j, &coeff) in taps.iter().enumerate() {
                acc += input[newest - j] * coeff;
            }
            *out = acc;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn noise(len: usize) -> Vec<Complex32> {
        let mut rng = rand::thread_rng();
        (0..len)
            .map(|_| Complex32::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)))
            .collect()
    }

    #[test]
    fn test_resampler_output_size() {
        let resampler = Resampler::new(65, 48, 16);
        assert_eq!(resampler.output_len(192), Some(260));
        assert_eq!(resampler.output_len(100), None);
        assert_eq!(resampler.len(), 16);
    }

    #[test]
    fn test_resampler_dc_passthrough() {
        let mut resampler = Resampler::new(65, 48, 16);
        resampler.init(1.0).unwrap();

        // DC signal should pass through with minimal attenuation
        let input = vec![Complex32::new(1.0, 0.0); 16 + 192];
        let mut output = vec![Complex32::zero(); 260];
        resampler.rotate(&input, &mut output).unwrap();

        let avg_real: f32 = output.iter().map(|s| s.re).sum::<f32>() / output.len() as f32;
        assert!((avg_real - 1.0).abs() < 0.05, "DC not preserved: {}", avg_real);
    }

    #[test]
    fn test_resampler_rejects_bad_lengths() {
        let mut resampler = Resampler::new(48, 65, 16);
        resampler.init(1.0).unwrap();

        let input = vec![Complex32::zero(); 16 + 260];
        let mut output = vec![Complex32::zero(); 191];
        assert!(matches!(
            resampler.rotate(&input, &mut output),
            Err(TrxError::BufferLength { expected: 192, actual: 191 })
        ));

        let mut output = vec![Complex32::zero(); 192];
        assert!(resampler.rotate(&input[..8], &mut output).is_err());
        assert!(resampler.rotate(&input, &mut output).is_ok());
    }

    #[test]
    fn test_resampler_requires_init() {
        let resampler = Resampler::new(65, 48, 16);
        let input = vec![Complex32::zero(); 16 + 192];
        let mut output = vec![Complex32::zero(); 260];
        assert_eq!(resampler.rotate(&input, &mut output), Err(TrxError::NotInitialized));
    }

    #[test]
    fn test_resampler_degenerate_cutoff() {
        let mut resampler = Resampler::new(65, 48, 16);
        assert!(resampler.init(0.0).is_err());
        assert!(resampler.init(1.5).is_err());
        assert!(Resampler::new(0, 48, 16).init(1.0).is_err());
    }

    #[test]
    fn test_history_makes_blocks_continuous() {
        let mut resampler = Resampler::new(65, 48, 16);
        resampler.init(1.0).unwrap();
        let h = resampler.len();

        let signal = noise(2 * 192);

        // One unbroken block
        let mut whole_in = vec![Complex32::zero(); h];
        whole_in.extend_from_slice(&signal);
        let mut whole_out = vec![Complex32::zero(); 520];
        resampler.rotate(&whole_in, &mut whole_out).unwrap();

        // Two blocks with the tail of the first carried as history
        let mut first_in = vec![Complex32::zero(); h];
        first_in.extend_from_slice(&signal[..192]);
        let mut second_in = signal[192 - h..192].to_vec();
        second_in.extend_from_slice(&signal[192..]);

        let mut split_out = vec![Complex32::zero(); 520];
        resampler.rotate(&first_in, &mut split_out[..260]).unwrap();
        resampler.rotate(&second_in, &mut split_out[260..]).unwrap();

        for (a, b) in whole_out.iter().zip(split_out.iter()) {
            assert!((a - b).norm() < 1e-5);
        }
    }
}
