//! Polyphase Analysis Filterbank
//!
//! Splits one wideband block into `M` critically sampled sub-bands. Sub-band
//! `k` is centered at `-k * fs / M` and comes out at `fs / M`.
//!
//! For every output instant the newest `M` input samples are weighted by the
//! polyphase partitions of a lowpass prototype and combined with an
//! `M`-point inverse FFT. Input history is kept across calls so the outputs
//! of consecutive blocks form one continuous stream.

use super::filter::{design_lowpass_filter, polyphase_partition};
use crate::TrxError;
use common::logging::DDSP;
use ndarray::Array2;
use num_complex::Complex32;
use num_traits::Zero;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;
use tracing::debug;

/// Wideband to `M` sub-band channelizer
pub struct Channelizer {
    /// Number of sub-bands
    m: usize,
    /// Output samples per sub-band per block
    block_len: usize,
    /// Reserved samples ahead of every output block
    headroom: usize,
    /// Prototype partitions [branch][tap]
    partitions: Option<Array2<f32>>,
    /// Previous input tail followed by the current block
    history: Vec<Complex32>,
    /// Per sub-band output including head-room
    outputs: Vec<Vec<Complex32>>,
    /// Branch combiner
    ifft: Option<Arc<dyn Fft<f32>>>,
    fft_buffer: Vec<Complex32>,
    fft_scratch: Vec<Complex32>,
}

impl Channelizer {
    /// Create an `m` band channelizer producing `block_len` samples per band.
    ///
    /// Each output buffer starts with `headroom` samples that the channelizer
    /// never writes; callers use them to splice in their own history.
    pub fn new(m: usize, block_len: usize, headroom: usize) -> Self {
        Self {
            m,
            block_len,
            headroom,
            partitions: None,
            history: Vec::new(),
            outputs: Vec::new(),
            ifft: None,
            fft_buffer: Vec::new(),
            fft_scratch: Vec::new(),
        }
    }

    /// Design the prototype with `branch_taps` taps per polyphase branch
    pub fn init(&mut self, branch_taps: usize) -> Result<(), TrxError> {
        if self.m < 2 || self.block_len == 0 || branch_taps == 0 {
            return Err(TrxError::InvalidConfiguration(format!(
                "Invalid channelizer geometry: {} bands, block {}, {} taps per branch",
                self.m, self.block_len, branch_taps
            )));
        }

        let prototype = design_lowpass_filter(self.m * branch_taps, 0.5 / self.m as f64)?;
        let partitions = polyphase_partition(&prototype, self.m);

        let mut planner = FftPlanner::new();
        let ifft = planner.plan_fft_inverse(self.m);

        self.history = vec![Complex32::zero(); (branch_taps - 1) * self.m + self.input_len()];
        self.outputs = vec![vec![Complex32::zero(); self.headroom + self.block_len]; self.m];
        self.fft_buffer = vec![Complex32::zero(); self.m];
        self.fft_scratch = vec![Complex32::zero(); ifft.get_inplace_scratch_len()];
        self.ifft = Some(ifft);
        self.partitions = Some(partitions);

        debug!(target: DDSP, "Channelizer initialized: {} bands, {} taps per branch, block {}",
               self.m, branch_taps, self.block_len);
        Ok(())
    }

    /// Wideband samples consumed per call to [`Channelizer::rotate`]
    pub fn input_len(&self) -> usize {
        self.m * self.block_len
    }

    /// Samples produced per sub-band per call, excluding head-room
    pub fn output_len(&self) -> usize {
        self.block_len
    }

    pub fn headroom(&self) -> usize {
        self.headroom
    }

    /// Sub-band buffer for `pchan`, head-room included
    pub fn output(&self, pchan: usize) -> Option<&[Complex32]> {
        self.outputs.get(pchan).map(|v| v.as_slice())
    }

    /// Mutable sub-band buffer for `pchan`, head-room included
    pub fn output_mut(&mut self, pchan: usize) -> Option<&mut [Complex32]> {
        self.outputs.get_mut(pchan).map(|v| v.as_mut_slice())
    }

    /// Channelize one block of exactly `input_len()` wideband samples
    pub fn rotate(&mut self, input: &[Complex32]) -> Result<(), TrxError> {
        let (partitions, ifft) = match (&self.partitions, &self.ifft) {
            (Some(p), Some(f)) => (p, f),
            _ => return Err(TrxError::NotInitialized),
        };

        if input.len() != self.input_len() {
            return Err(TrxError::BufferLength {
                expected: self.input_len(),
                actual: input.len(),
            });
        }

        let m = self.m;
        let branch_taps = partitions.ncols();
        let past = (branch_taps - 1) * m;
        self.history[past..].copy_from_slice(input);

        for n in 0..self.block_len {
            let base = past + n * m;

            // Branch r sees input phase r and prototype branch M-1-r
            for r in 0..m {
                let taps = partitions.row(m - 1 - r);
                let mut acc = Complex32::zero();
                for (p, &coeff) in taps.iter().enumerate() {
                    acc += self.history[base + r - p * m] * coeff;
                }
                self.fft_buffer[r] = acc;
            }

            ifft.process_with_scratch(&mut self.fft_buffer, &mut self.fft_scratch);

            for (output, &value) in self.outputs.iter_mut().zip(self.fft_buffer.iter()) {
                output[self.headroom + n] = value;
            }
        }

        let len = self.history.len();
        self.history.copy_within(len - past..len, 0);

        Ok(())
    }
}
