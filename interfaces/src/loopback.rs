//! In-Memory Loopback Device
//!
//! A [`RadioDevice`] without hardware. Receive samples come from an injection
//! queue, transmitted samples are captured and can optionally be looped back
//! into the receive queue. Faults, short writes and tuning refusals can be
//! injected to exercise the error paths of the radio interface.

use crate::device::{RadioDevice, Transfer};
use common::logging::DDEV;
use common::types::{StreamFaults, Timestamp};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace, warn};

/// Highest receive gain the loopback device accepts
pub const LOOPBACK_MAX_RX_GAIN: f64 = 60.0;

/// Complex samples the looped back receive queue holds before dropping
pub const LOOPBACK_RX_CAPACITY: usize = 1 << 16;

#[derive(Debug, Default)]
struct LoopbackState {
    rx_queue: VecDeque<i16>,
    tx_capture: Vec<i16>,
    loopback: bool,
    /// Receive queue limit in complex samples
    rx_capacity: Option<usize>,
    rx_faults: StreamFaults,
    tx_faults: StreamFaults,
    write_limit: Option<usize>,
    reject_tuning: bool,
    tx_freq: f64,
    rx_freq: f64,
    rx_gain: f64,
    tx_freq_requests: Vec<f64>,
    rx_freq_requests: Vec<f64>,
    last_rx_timestamp: Option<Timestamp>,
    last_tx_timestamp: Option<Timestamp>,
}

impl LoopbackState {
    fn enforce_rx_capacity(&mut self) {
        let Some(capacity) = self.rx_capacity else {
            return;
        };
        let excess = (self.rx_queue.len() / 2).saturating_sub(capacity);
        if excess > 0 {
            self.rx_queue.drain(..2 * excess);
            self.rx_faults |= StreamFaults::OVERRUN;
            warn!(target: DDEV, "Loopback receive queue full, dropped {} samples", excess);
        }
    }
}

/// Loopback radio device
#[derive(Debug, Default)]
pub struct LoopbackDevice {
    state: Mutex<LoopbackState>,
}

impl LoopbackDevice {
    /// Create a device whose receive side only returns injected samples
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a device that feeds every transmitted block back to receive
    pub fn with_loopback() -> Self {
        let device = Self::default();
        {
            let mut state = device.state();
            state.loopback = true;
            state.rx_capacity = Some(LOOPBACK_RX_CAPACITY);
        }
        device
    }

    fn state(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue interleaved I/Q samples for subsequent reads
    pub fn inject_rx(&self, samples: &[i16]) {
        let mut state = self.state();
        state.rx_queue.extend(samples.iter().copied());
        state.enforce_rx_capacity();
    }

    /// Number of complex samples waiting on the receive side
    pub fn pending_rx(&self) -> usize {
        self.state().rx_queue.len() / 2
    }

    /// Limit the receive queue to `capacity` complex samples, `None` for no
    /// limit. Samples beyond it drop the oldest and report an overrun.
    pub fn set_rx_capacity(&self, capacity: Option<usize>) {
        let mut state = self.state();
        state.rx_capacity = capacity;
        state.enforce_rx_capacity();
    }

    /// Report `faults` on the next read
    pub fn inject_rx_faults(&self, faults: StreamFaults) {
        self.state().rx_faults |= faults;
    }

    /// Report `faults` on the next write
    pub fn inject_tx_faults(&self, faults: StreamFaults) {
        self.state().tx_faults |= faults;
    }

    /// Accept at most `limit` samples per write, `None` for no limit
    pub fn set_write_limit(&self, limit: Option<usize>) {
        self.state().write_limit = limit;
    }

    /// Make frequency requests fail
    pub fn set_reject_tuning(&self, reject: bool) {
        self.state().reject_tuning = reject;
    }

    /// Take everything transmitted so far
    pub fn take_tx(&self) -> Vec<i16> {
        std::mem::take(&mut self.state().tx_capture)
    }

    /// Every transmit frequency requested, accepted or not
    pub fn tx_freq_requests(&self) -> Vec<f64> {
        self.state().tx_freq_requests.clone()
    }

    /// Every receive frequency requested, accepted or not
    pub fn rx_freq_requests(&self) -> Vec<f64> {
        self.state().rx_freq_requests.clone()
    }

    /// Timestamp passed with the latest read
    pub fn last_rx_timestamp(&self) -> Option<Timestamp> {
        self.state().last_rx_timestamp
    }

    /// Timestamp passed with the latest write
    pub fn last_tx_timestamp(&self) -> Option<Timestamp> {
        self.state().last_tx_timestamp
    }
}

impl RadioDevice for LoopbackDevice {
    fn read_samples(&self, buf: &mut [i16], count: usize, timestamp: Timestamp) -> Transfer {
        let mut state = self.state();
        state.last_rx_timestamp = Some(timestamp);

        let num = count.min(buf.len() / 2).min(state.rx_queue.len() / 2);
        for (dst, src) in buf.iter_mut().zip(state.rx_queue.drain(..2 * num)) {
            *dst = src;
        }

        let faults = std::mem::replace(&mut state.rx_faults, StreamFaults::empty());
        if num < count {
            trace!(target: DDEV, "Loopback read {} of {} samples at {}", num, count, timestamp);
        }

        Transfer::with_faults(num, faults)
    }

    fn write_samples(&self, buf: &[i16], count: usize, timestamp: Timestamp) -> Transfer {
        let mut state = self.state();
        state.last_tx_timestamp = Some(timestamp);

        let mut num = count.min(buf.len() / 2);
        if let Some(limit) = state.write_limit {
            num = num.min(limit);
        }

        let block = &buf[..2 * num];
        state.tx_capture.extend_from_slice(block);
        if state.loopback {
            state.rx_queue.extend(block.iter().copied());
            state.enforce_rx_capacity();
        }

        let faults = std::mem::replace(&mut state.tx_faults, StreamFaults::empty());
        Transfer::with_faults(num, faults)
    }

    fn set_tx_freq(&self, freq: f64) -> bool {
        let mut state = self.state();
        state.tx_freq_requests.push(freq);
        if state.reject_tuning {
            debug!(target: DDEV, "Rejecting TX frequency {:.3} MHz", freq / 1e6);
            return false;
        }
        state.tx_freq = freq;
        true
    }

    fn tx_freq(&self) -> f64 {
        self.state().tx_freq
    }

    fn set_rx_freq(&self, freq: f64) -> bool {
        let mut state = self.state();
        state.rx_freq_requests.push(freq);
        if state.reject_tuning {
            debug!(target: DDEV, "Rejecting RX frequency {:.3} MHz", freq / 1e6);
            return false;
        }
        state.rx_freq = freq;
        true
    }

    fn rx_freq(&self) -> f64 {
        self.state().rx_freq
    }

    fn set_rx_gain(&self, db: f64) -> f64 {
        let mut state = self.state();
        state.rx_gain = db.clamp(0.0, LOOPBACK_MAX_RX_GAIN);
        state.rx_gain
    }

    fn rx_gain(&self) -> f64 {
        self.state().rx_gain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_read_returns_available() {
        let device = LoopbackDevice::new();
        device.inject_rx(&[1, 2, 3, 4, 5, 6]);

        let mut buf = vec![0i16; 8];
        let transfer = device.read_samples(&mut buf, 4, 100);
        assert_eq!(transfer.samples, 3);
        assert_eq!(&buf[..6], &[1, 2, 3, 4, 5, 6]);
        assert_eq!(device.last_rx_timestamp(), Some(100));
        assert_eq!(device.pending_rx(), 0);
    }

    #[test]
    fn test_loopback_feeds_receive() {
        let device = LoopbackDevice::with_loopback();
        let transfer = device.write_samples(&[7, 8, 9, 10], 2, 0);
        assert_eq!(transfer, Transfer::complete(2));
        assert_eq!(device.pending_rx(), 2);
        assert_eq!(device.take_tx(), vec![7, 8, 9, 10]);
        assert!(device.take_tx().is_empty());
    }

    #[test]
    fn test_full_loopback_drops_oldest() {
        let device = LoopbackDevice::with_loopback();
        device.set_rx_capacity(Some(2));

        device.write_samples(&[1, 2, 3, 4], 2, 0);
        device.write_samples(&[5, 6], 1, 2);
        assert_eq!(device.pending_rx(), 2);

        let mut buf = vec![0i16; 4];
        let transfer = device.read_samples(&mut buf, 2, 0);
        assert_eq!(transfer, Transfer::with_faults(2, StreamFaults::OVERRUN));
        assert_eq!(buf, vec![3, 4, 5, 6]);
        assert_eq!(device.take_tx(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_loopback_capacity_default() {
        let device = LoopbackDevice::with_loopback();
        let block = vec![0i16; 2 * 1024];
        for timestamp in 0..80 {
            device.write_samples(&block, 1024, timestamp * 1024);
        }
        assert_eq!(device.pending_rx(), LOOPBACK_RX_CAPACITY);
        assert!(LoopbackDevice::new().read_samples(&mut [0i16; 2], 1, 0).faults.is_empty());
    }

    #[test]
    fn test_faults_reported_once() {
        let device = LoopbackDevice::new();
        device.inject_rx_faults(StreamFaults::OVERRUN);

        let mut buf = vec![0i16; 2];
        assert_eq!(device.read_samples(&mut buf, 1, 0).faults, StreamFaults::OVERRUN);
        assert!(device.read_samples(&mut buf, 1, 0).faults.is_empty());
    }

    #[test]
    fn test_write_limit() {
        let device = LoopbackDevice::new();
        device.set_write_limit(Some(1));
        assert_eq!(device.write_samples(&[1, 2, 3, 4], 2, 0).samples, 1);
    }

    #[test]
    fn test_tuning_and_gain() {
        let device = LoopbackDevice::new();
        assert!(device.set_tx_freq(935.2e6));
        assert_eq!(device.tx_freq(), 935.2e6);

        device.set_reject_tuning(true);
        assert!(!device.set_rx_freq(890.2e6));
        assert_eq!(device.rx_freq(), 0.0);
        assert_eq!(device.rx_freq_requests(), vec![890.2e6]);

        assert_eq!(device.set_rx_gain(80.0), LOOPBACK_MAX_RX_GAIN);
        assert_eq!(device.rx_gain(), LOOPBACK_MAX_RX_GAIN);
    }
}
