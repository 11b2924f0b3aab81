//! Multi-Channel Radio Interface
//!
//! Bridges up to three logical carriers to one wideband device stream.
//!
//! Receive: device samples are channelized into `MCHANS` sub-bands, each
//! active sub-band is resampled to the carrier rate and written into the
//! receive buffer of its logical channel. Transmit: the send buffer of every
//! logical channel is resampled to the sub-band rate, the sub-bands are
//! synthesized into one wideband block and written to the device.
//!
//! The receive and transmit paths live behind separate locks so that one
//! driver thread per direction can run them concurrently.

use crate::channel_map::{
    active_slots, frequency_shift, is_reference_channel, logical_channel, MCHANS,
};
use crate::dsp::{Channelizer, Resampler, Synthesis};
use crate::radio_buffer::RadioBuffer;
use crate::TrxError;
use common::logging::{DDSP, DTRX};
use common::types::{StickyFaults, StreamFaults, Timestamp};
use common::utils::{convert_float_short, convert_short_float, freq_within};
use interfaces::RadioDevice;
use num_complex::Complex32;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

/// Smallest receive buffering accepted, two bursts worth of samples
const MIN_BUFFERED_SAMPLES: usize = 2 * 625;

/// Processing parameters of the multi-carrier interface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiRadioConfig {
    /// Carrier side of the resampling ratio
    pub resamp_inrate: usize,
    /// Sub-band side of the resampling ratio
    pub resamp_outrate: usize,
    /// Ratio periods per processing block
    pub chunk_mul: usize,
    /// Blocks held by each logical ring buffer
    pub num_chunks: usize,
    /// Resampler taps per polyphase branch
    pub resampler_len: usize,
    /// Filterbank taps per polyphase branch
    pub filterbank_taps: usize,
    /// Transmit resampler cutoff, relative to the sub-band Nyquist rate
    pub tx_cutoff: f32,
    /// Spacing between adjacent carriers in Hz
    pub spacing: f64,
    /// Frequency match tolerance in Hz
    pub freq_tolerance: f64,
}

impl Default for MultiRadioConfig {
    fn default() -> Self {
        Self {
            resamp_inrate: 65,
            resamp_outrate: 48,
            chunk_mul: 4,
            num_chunks: 24,
            resampler_len: 16,
            filterbank_taps: 16,
            tx_cutoff: 1.0,
            spacing: 800e3,
            freq_tolerance: 10.0,
        }
    }
}

impl MultiRadioConfig {
    /// Carrier rate samples per block
    pub fn inchunk(&self) -> usize {
        self.resamp_inrate * self.chunk_mul
    }

    /// Sub-band rate samples per block
    pub fn outchunk(&self) -> usize {
        self.resamp_outrate * self.chunk_mul
    }
}

/// Snapshot of the interface counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RadioStats {
    pub read_timestamp: Timestamp,
    pub write_timestamp: Timestamp,
    pub faults: StreamFaults,
    /// Samples waiting in each receive buffer
    pub rx_fill: Vec<usize>,
    /// Samples waiting in each send buffer
    pub tx_fill: Vec<usize>,
}

/// Receive side state
struct RxPath {
    resampler: Resampler,
    channelizer: Channelizer,
    buffers: Vec<Arc<RadioBuffer>>,
    /// Resampler history per logical channel
    history: Vec<Vec<Complex32>>,
    outer: Vec<Complex32>,
    convert: Vec<i16>,
    active: [bool; MCHANS],
}

/// Transmit side state
struct TxPath {
    resampler: Resampler,
    synthesis: Synthesis,
    buffers: Vec<Arc<RadioBuffer>>,
    outer: Vec<Complex32>,
    convert: Vec<i16>,
    active: [bool; MCHANS],
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Rx,
    Tx,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Multi-carrier radio interface
pub struct MultiRadioInterface {
    device: Arc<dyn RadioDevice>,
    chans: usize,
    config: MultiRadioConfig,
    rx: Mutex<Option<RxPath>>,
    tx: Mutex<Option<TxPath>>,
    read_timestamp: AtomicU64,
    write_timestamp: AtomicU64,
    faults: StickyFaults,
    /// Digital gain per logical channel. `chans` is at most `MCHANS - 1`
    /// whenever the interface is usable.
    power_scaling: Mutex<[f32; MCHANS]>,
    /// Buffers shared with the paths, reachable without `rx`/`tx`
    rx_buffers: Mutex<Vec<Arc<RadioBuffer>>>,
    tx_buffers: Mutex<Vec<Arc<RadioBuffer>>>,
}

impl MultiRadioInterface {
    /// Create an interface for `chans` carriers; nothing is allocated before
    /// [`MultiRadioInterface::init`]
    pub fn new(device: Arc<dyn RadioDevice>, chans: usize, config: MultiRadioConfig) -> Self {
        Self {
            device,
            chans,
            config,
            rx: Mutex::new(None),
            tx: Mutex::new(None),
            read_timestamp: AtomicU64::new(0),
            write_timestamp: AtomicU64::new(0),
            faults: StickyFaults::new(),
            power_scaling: Mutex::new([1.0; MCHANS]),
            rx_buffers: Mutex::new(Vec::new()),
            tx_buffers: Mutex::new(Vec::new()),
        }
    }

    /// Build filters and buffers for the configured channel count.
    ///
    /// Previous state is released first. On failure the interface is left
    /// closed and `init` may be called again.
    pub fn init(&self) -> Result<(), TrxError> {
        if self.chans > MCHANS - 1 {
            error!(target: DDSP, "FATAL: Invalid channel configuration {}", self.chans);
            return Err(TrxError::InvalidChannelCount(self.chans));
        }

        self.close();

        let config = &self.config;
        let inchunk = config.inchunk();
        let outchunk = config.outchunk();

        if inchunk * config.num_chunks < MIN_BUFFERED_SAMPLES {
            error!(target: DDSP, "FATAL: Invalid inner chunk size {}", inchunk);
            return Err(TrxError::InvalidConfiguration(format!(
                "inner chunk size {} too small",
                inchunk
            )));
        }

        let mut rx_resampler =
            Resampler::new(config.resamp_inrate, config.resamp_outrate, config.resampler_len);
        rx_resampler
            .init(1.0)
            .map_err(|e| init_failure("Rx resampler", e))?;

        let mut tx_resampler =
            Resampler::new(config.resamp_outrate, config.resamp_inrate, config.resampler_len);
        tx_resampler
            .init(config.tx_cutoff)
            .map_err(|e| init_failure("Tx resampler", e))?;

        let mut channelizer = Channelizer::new(MCHANS, outchunk, rx_resampler.len());
        channelizer
            .init(config.filterbank_taps)
            .map_err(|e| init_failure("Rx channelizer", e))?;

        let mut synthesis = Synthesis::new(MCHANS, outchunk);
        synthesis
            .init(config.filterbank_taps)
            .map_err(|e| init_failure("Tx synthesis", e))?;

        // Channelizer blocks must be able to hold the resampler history
        if channelizer.output_len() <= rx_resampler.len() {
            error!(target: DDSP, "FATAL: Channelizer block {} shorter than resampler history {}",
                   channelizer.output_len(), rx_resampler.len());
            return Err(TrxError::InvalidConfiguration(
                "channelizer block shorter than resampler filter".to_string(),
            ));
        }
        if inchunk <= tx_resampler.len() {
            error!(target: DDSP, "FATAL: Send chunk {} shorter than resampler history {}",
                   inchunk, tx_resampler.len());
            return Err(TrxError::InvalidConfiguration(
                "send chunk shorter than resampler filter".to_string(),
            ));
        }

        let mut rx_buffers = Vec::with_capacity(self.chans);
        let mut tx_buffers = Vec::with_capacity(self.chans);
        for _ in 0..self.chans {
            rx_buffers.push(Arc::new(RadioBuffer::new(config.num_chunks, inchunk, 0)?));
            tx_buffers.push(Arc::new(RadioBuffer::new(
                config.num_chunks,
                inchunk,
                tx_resampler.len(),
            )?));
        }
        let history = vec![vec![Complex32::zero(); rx_resampler.len()]; self.chans];

        let outer_recv = vec![Complex32::zero(); channelizer.input_len()];
        let outer_send = vec![Complex32::zero(); synthesis.output_len()];
        let convert_recv = vec![0i16; 2 * outer_recv.len()];
        let convert_send = vec![0i16; 2 * outer_send.len()];

        let active = active_slots(self.chans).ok_or_else(|| {
            error!(target: DDSP, "FATAL: Unsupported channel combination");
            TrxError::InvalidChannelCount(self.chans)
        })?;

        *lock(&self.rx_buffers) = rx_buffers.clone();
        *lock(&self.tx_buffers) = tx_buffers.clone();
        *lock(&self.rx) = Some(RxPath {
            resampler: rx_resampler,
            channelizer,
            buffers: rx_buffers,
            history,
            outer: outer_recv,
            convert: convert_recv,
            active,
        });
        *lock(&self.tx) = Some(TxPath {
            resampler: tx_resampler,
            synthesis,
            buffers: tx_buffers,
            outer: outer_send,
            convert: convert_send,
            active,
        });

        self.read_timestamp.store(0, Ordering::Release);
        self.write_timestamp.store(0, Ordering::Release);
        self.faults.clear();

        info!(target: DTRX, "Multi-carrier interface ready: {} channels, {} samples per block",
              self.chans, outchunk * MCHANS);
        Ok(())
    }

    /// Release all processing state. Safe to call at any time, repeatedly.
    pub fn close(&self) {
        lock(&self.rx_buffers).clear();
        lock(&self.tx_buffers).clear();
        let rx = lock(&self.rx).take();
        let tx = lock(&self.tx).take();
        if rx.is_some() || tx.is_some() {
            debug!(target: DTRX, "Multi-carrier interface closed");
        }
    }

    pub fn is_initialized(&self) -> bool {
        !lock(&self.rx_buffers).is_empty()
    }

    pub fn chans(&self) -> usize {
        self.chans
    }

    pub fn config(&self) -> &MultiRadioConfig {
        &self.config
    }

    /// Receive one wideband block from the device.
    ///
    /// Returns `false` without touching the device when the reference receive
    /// buffer is full, and `false` when the device delivers a short block.
    pub fn pull_buffer(&self) -> bool {
        let mut guard = lock(&self.rx);
        let Some(rx) = guard.as_mut() else {
            return false;
        };

        if rx.buffers[0].free_segments() == 0 {
            return false;
        }

        let count = rx.outer.len();
        let timestamp = self.read_timestamp.load(Ordering::Acquire);
        let transfer = self.device.read_samples(&mut rx.convert, count, timestamp);
        self.faults.raise(transfer.faults & StreamFaults::OVERRUN);

        if transfer.samples != count {
            error!(target: DDSP, "FATAL: Receive error: expected {} samples, but got {}",
                   count, transfer.samples);
            return false;
        }

        convert_short_float(&mut rx.outer, &rx.convert);
        self.faults.raise(transfer.faults & StreamFaults::UNDERRUN);
        self.read_timestamp.fetch_add(count as u64, Ordering::AcqRel);

        if let Err(e) = rx.channelizer.rotate(&rx.outer) {
            error!(target: DDSP, "FATAL: Channelizer failed: {}", e);
            return true;
        }

        let headroom = rx.resampler.len();
        let block_len = rx.channelizer.output_len();

        for pchan in 0..MCHANS {
            if !rx.active[pchan] {
                continue;
            }

            let Some(lchan) = logical_channel(pchan, self.chans) else {
                error!(target: DDSP, "FATAL: Invalid logical channel {}", pchan);
                continue;
            };
            let Some(block) = rx.channelizer.output_mut(pchan) else {
                continue;
            };

            // Previous tail goes in front, the new tail is kept for next time
            let history = &mut rx.history[lchan];
            block[..headroom].copy_from_slice(history);
            history.copy_from_slice(&block[block_len..block_len + headroom]);

            let resampler = &rx.resampler;
            match rx.buffers[lchan].with_write_segment(|segment| resampler.rotate(block, segment)) {
                Some(Ok(())) => {}
                Some(Err(e)) => {
                    error!(target: DDSP, "FATAL: Sample rate upsampling failed on channel {}: {}", lchan, e);
                }
                None => {
                    warn!(target: DDSP, "Receive buffer full on channel {}, dropping block", lchan);
                }
            }
        }

        true
    }

    /// Send one wideband block to the device.
    ///
    /// Returns `false` when the reference send buffer has no segment ready.
    pub fn push_buffer(&self) -> bool {
        let mut guard = lock(&self.tx);
        let Some(tx) = guard.as_mut() else {
            return false;
        };

        if tx.buffers[0].avail_segments() == 0 {
            return false;
        }

        let scaling = *lock(&self.power_scaling);

        for pchan in 0..MCHANS {
            if !tx.active[pchan] {
                tx.synthesis.reset_buffer(pchan);
                continue;
            }

            let Some(lchan) = logical_channel(pchan, self.chans) else {
                error!(target: DDSP, "FATAL: Invalid logical channel {}", pchan);
                continue;
            };
            let Some(input) = tx.synthesis.input_mut(pchan) else {
                continue;
            };

            let resampler = &tx.resampler;
            match tx.buffers[lchan].with_read_segment(|segment| resampler.rotate(segment, input)) {
                Some(Ok(())) => {
                    let scale = scaling[lchan];
                    if scale != 1.0 {
                        input.iter_mut().for_each(|s| *s *= scale);
                    }
                }
                Some(Err(e)) => {
                    error!(target: DDSP, "FATAL: Sample rate downsampling failed on channel {}: {}", lchan, e);
                }
                None => {
                    warn!(target: DDSP, "Send buffer empty on channel {}, transmitting silence", lchan);
                    input.fill(Complex32::zero());
                }
            }
        }

        if let Err(e) = tx.synthesis.rotate(&mut tx.outer) {
            error!(target: DDSP, "FATAL: Synthesis failed: {}", e);
            return false;
        }

        convert_float_short(&mut tx.convert, &tx.outer, 1.0 / self.chans as f32);

        let count = tx.outer.len();
        let timestamp = self.write_timestamp.load(Ordering::Acquire);
        let transfer = self.device.write_samples(&tx.convert, count, timestamp);
        self.faults.raise(transfer.faults);

        if transfer.samples != count {
            error!(target: DDSP, "FATAL: Transmit error: wrote {} of {} samples",
                   transfer.samples, count);
        }

        self.write_timestamp
            .fetch_add(transfer.samples as u64, Ordering::AcqRel);
        true
    }

    /// Tune the transmit side of logical channel `chan`
    pub fn tune_tx(&self, freq: f64, chan: usize) -> bool {
        self.tune(Direction::Tx, freq, chan)
    }

    /// Tune the receive side of logical channel `chan`
    pub fn tune_rx(&self, freq: f64, chan: usize) -> bool {
        self.tune(Direction::Rx, freq, chan)
    }

    /// Only the reference channel retunes the device. The others are fixed
    /// at their carrier offset and only get their requested frequency checked.
    fn tune(&self, direction: Direction, freq: f64, chan: usize) -> bool {
        if chan >= self.chans {
            return false;
        }
        let Some(shift) = frequency_shift(self.chans) else {
            return false;
        };
        let shift = shift as f64;

        if is_reference_channel(chan) {
            let center = freq + shift * self.config.spacing;
            return match direction {
                Direction::Tx => self.device.set_tx_freq(center),
                Direction::Rx => self.device.set_rx_freq(center),
            };
        }

        let center = match direction {
            Direction::Tx => self.device.tx_freq(),
            Direction::Rx => self.device.rx_freq(),
        };
        let expected = center + (chan as f64 - shift) * self.config.spacing;
        if !freq_within(freq, expected, self.config.freq_tolerance) {
            info!(target: DTRX, "Channel {} RF frequency offset is {:.6} MHz", chan, freq / 1e6);
        }

        true
    }

    /// Set receive gain. Only the reference channel reaches the device; every
    /// channel gets the gain actually in effect.
    pub fn set_rx_gain(&self, db: f64, chan: usize) -> f64 {
        if is_reference_channel(chan) {
            self.device.set_rx_gain(db)
        } else {
            self.device.rx_gain()
        }
    }

    /// Digital transmit attenuation of logical channel `chan` in dB
    pub fn set_power_attenuation(&self, db: f64, chan: usize) -> Result<f64, TrxError> {
        let mut scaling = lock(&self.power_scaling);
        let slot = match scaling.get_mut(chan) {
            Some(slot) if chan < self.chans => slot,
            _ => return Err(TrxError::InvalidChannel(chan)),
        };

        let db = db.max(0.0);
        *slot = 10f64.powf(-db / 20.0) as f32;
        debug!(target: DTRX, "Channel {} power attenuation {:.1} dB", chan, db);
        Ok(db)
    }

    /// Receive buffer of logical channel `lchan`
    pub fn rx_buffer(&self, lchan: usize) -> Option<Arc<RadioBuffer>> {
        lock(&self.rx_buffers).get(lchan).cloned()
    }

    /// Send buffer of logical channel `lchan`
    pub fn tx_buffer(&self, lchan: usize) -> Option<Arc<RadioBuffer>> {
        lock(&self.tx_buffers).get(lchan).cloned()
    }

    /// Device time of the next receive block
    pub fn read_timestamp(&self) -> Timestamp {
        self.read_timestamp.load(Ordering::Acquire)
    }

    /// Device time of the next transmit block
    pub fn write_timestamp(&self) -> Timestamp {
        self.write_timestamp.load(Ordering::Acquire)
    }

    pub fn overrun(&self) -> bool {
        self.faults.overrun()
    }

    pub fn underrun(&self) -> bool {
        self.faults.underrun()
    }

    /// Report and reset the underrun flag
    pub fn take_underrun(&self) -> bool {
        !self.faults.take(StreamFaults::UNDERRUN).is_empty()
    }

    pub fn clear_faults(&self) {
        self.faults.clear();
    }

    /// Counter snapshot; never waits on a device transfer in progress
    pub fn stats(&self) -> RadioStats {
        let rx_fill = lock(&self.rx_buffers).iter().map(|b| b.available()).collect();
        let tx_fill = lock(&self.tx_buffers).iter().map(|b| b.available()).collect();

        RadioStats {
            read_timestamp: self.read_timestamp(),
            write_timestamp: self.write_timestamp(),
            faults: self.faults.get(),
            rx_fill,
            tx_fill,
        }
    }
}

impl Drop for MultiRadioInterface {
    fn drop(&mut self) {
        self.close();
    }
}

fn init_failure(component: &str, e: TrxError) -> TrxError {
    error!(target: DDSP, "FATAL: {} initialization failed: {}", component, e);
    TrxError::InitializationFailed(format!("{}: {}", component, e))
}
