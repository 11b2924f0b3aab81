//! Polyphase Synthesis Filterbank
//!
//! Combines `M` sub-band inputs at `fs / M` into one wideband block at `fs`,
//! placing sub-band `k` at `-k * fs / M`. This is the transmit counterpart
//! of [`super::Channelizer`].

use super::filter::{design_lowpass_filter, polyphase_partition};
use crate::TrxError;
use common::logging::DDSP;
use ndarray::{s, Array2};
use num_complex::Complex32;
use num_traits::Zero;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;
use tracing::debug;

/// `M` sub-band to wideband synthesizer
pub struct Synthesis {
    m: usize,
    /// Input samples per sub-band per block
    block_len: usize,
    /// Interpolation prototype partitions [branch][tap]
    partitions: Option<Array2<f32>>,
    /// Per sub-band input for the next block
    inputs: Vec<Vec<Complex32>>,
    /// Branch spectra [branch][time], previous tail first
    spectra: Array2<Complex32>,
    fft: Option<Arc<dyn Fft<f32>>>,
    fft_buffer: Vec<Complex32>,
    fft_scratch: Vec<Complex32>,
}

impl Synthesis {
    pub fn new(m: usize, block_len: usize) -> Self {
        Self {
            m,
            block_len,
            partitions: None,
            inputs: Vec::new(),
            spectra: Array2::zeros((0, 0)),
            fft: None,
            fft_buffer: Vec::new(),
            fft_scratch: Vec::new(),
        }
    }

    /// Design the prototype with `branch_taps` taps per polyphase branch
    pub fn init(&mut self, branch_taps: usize) -> Result<(), TrxError> {
        if self.m < 2 || self.block_len == 0 || branch_taps == 0 {
            return Err(TrxError::InvalidConfiguration(format!(
                "Invalid synthesis geometry: {} bands, block {}, {} taps per branch",
                self.m, self.block_len, branch_taps
            )));
        }

        // Interpolation by M needs a gain of M
        let gain = self.m as f32;
        let prototype: Vec<f32> = design_lowpass_filter(self.m * branch_taps, 0.5 / self.m as f64)?
            .iter()
            .map(|&t| t * gain)
            .collect();

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(self.m);

        self.inputs = vec![vec![Complex32::zero(); self.block_len]; self.m];
        self.spectra = Array2::zeros((self.m, branch_taps - 1 + self.block_len));
        self.fft_buffer = vec![Complex32::zero(); self.m];
        self.fft_scratch = vec![Complex32::zero(); fft.get_inplace_scratch_len()];
        self.fft = Some(fft);
        self.partitions = Some(polyphase_partition(&prototype, self.m));

        debug!(target: DDSP, "Synthesis initialized: {} bands, {} taps per branch, block {}",
               self.m, branch_taps, self.block_len);
        Ok(())
    }

    /// Samples expected per sub-band input
    pub fn input_len(&self) -> usize {
        self.block_len
    }

    /// Wideband samples produced per call to [`Synthesis::rotate`]
    pub fn output_len(&self) -> usize {
        self.m * self.block_len
    }

    pub fn input_mut(&mut self, pchan: usize) -> Option<&mut [Complex32]> {
        self.inputs.get_mut(pchan).map(|v| v.as_mut_slice())
    }

    /// Silence sub-band `pchan` for the next block
    pub fn reset_buffer(&mut self, pchan: usize) {
        if let Some(input) = self.inputs.get_mut(pchan) {
            input.fill(Complex32::zero());
        }
    }

    /// Synthesize the current inputs into `output`
    pub fn rotate(&mut self, output: &mut [Complex32]) -> Result<(), TrxError> {
        let (partitions, fft) = match (&self.partitions, &self.fft) {
            (Some(p), Some(f)) => (p, f),
            _ => return Err(TrxError::NotInitialized),
        };

        if output.len() != self.output_len() {
            return Err(TrxError::BufferLength {
                expected: self.output_len(),
                actual: output.len(),
            });
        }

        let m = self.m;
        let past = partitions.ncols() - 1;

        for n in 0..self.block_len {
            for (slot, input) in self.fft_buffer.iter_mut().zip(self.inputs.iter()) {
                *slot = input[n];
            }
            fft.process_with_scratch(&mut self.fft_buffer, &mut self.fft_scratch);
            for (r, &value) in self.fft_buffer.iter().enumerate() {
                self.spectra[[r, past + n]] = value;
            }
        }

        for n in 0..self.block_len {
            let now = past + n;
            for r in 0..m {
                let taps = partitions.row(r);
                let mut acc = Complex32::zero();
                for (p, &coeff) in taps.iter().enumerate() {
                    acc += self.spectra[[r, now - p]] * coeff;
                }
                output[n * m + r] = acc;
            }
        }

        if past > 0 {
            let end = self.spectra.ncols();
            let tail = self.spectra.slice(s![.., end - past..]).to_owned();
            self.spectra.slice_mut(s![.., ..past]).assign(&tail);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::Channelizer;

    const M: usize = 4;
    const BLOCK: usize = 192;

    fn power(samples: &[Complex32]) -> f32 {
        samples.iter().map(|s| s.norm_sqr()).sum::<f32>() / samples.len() as f32
    }

    #[test]
    fn test_synthesis_sizes() {
        let mut synthesis = Synthesis::new(M, BLOCK);
        synthesis.init(16).unwrap();
        assert_eq!(synthesis.input_len(), 192);
        assert_eq!(synthesis.output_len(), 768);
        assert!(synthesis.input_mut(M).is_none());
    }

    #[test]
    fn test_synthesis_requires_init() {
        let mut synthesis = Synthesis::new(M, BLOCK);
        let mut output = vec![Complex32::zero(); M * BLOCK];
        assert_eq!(synthesis.rotate(&mut output), Err(TrxError::NotInitialized));
    }

    #[test]
    fn test_reset_gives_silence() {
        let mut synthesis = Synthesis::new(M, BLOCK);
        synthesis.init(16).unwrap();
        let mut output = vec![Complex32::zero(); M * BLOCK];

        synthesis.input_mut(1).unwrap().fill(Complex32::new(1.0, 0.0));
        synthesis.rotate(&mut output).unwrap();
        assert!(power(&output) > 0.1);

        // Flush the filter history, then nothing but silence remains
        synthesis.reset_buffer(1);
        synthesis.rotate(&mut output).unwrap();
        synthesis.rotate(&mut output).unwrap();
        assert!(output.iter().all(|s| s.norm() < 1e-6));
    }

    #[test]
    fn test_dc_input_becomes_band_tone() {
        let mut synthesis = Synthesis::new(M, BLOCK);
        synthesis.init(16).unwrap();
        synthesis.input_mut(3).unwrap().fill(Complex32::new(1.0, 0.0));

        let mut output = vec![Complex32::zero(); M * BLOCK];
        synthesis.rotate(&mut output).unwrap();

        // Band 3 sits at +fs/4: consecutive samples rotate by +90 degrees
        let tail = &output[M * BLOCK / 2..];
        assert!((power(tail) - 1.0).abs() < 0.05);
        for pair in tail.windows(2) {
            let step = pair[1] * pair[0].conj();
            assert!(step.re.abs() < 0.1 && step.im > 0.9);
        }
    }

    #[test]
    fn test_analysis_recovers_synthesized_bands() {
        let mut synthesis = Synthesis::new(M, BLOCK);
        synthesis.init(16).unwrap();
        let mut channelizer = Channelizer::new(M, BLOCK, 0);
        channelizer.init(16).unwrap();

        let levels = [1.0f32, 0.0, 0.5, 2.0];
        let mut wideband = vec![Complex32::zero(); M * BLOCK];
        for _ in 0..3 {
            for (pchan, &level) in levels.iter().enumerate() {
                synthesis.input_mut(pchan).unwrap().fill(Complex32::new(level, 0.0));
            }
            synthesis.rotate(&mut wideband).unwrap();
            channelizer.rotate(&wideband).unwrap();
        }

        for (pchan, &level) in levels.iter().enumerate() {
            let out = channelizer.output(pchan).unwrap();
            let p = power(out);
            let expected = level * level;
            assert!((p - expected).abs() < 0.05 * expected.max(0.01), "band {}: {} vs {}", pchan, p, expected);
        }
    }
}
