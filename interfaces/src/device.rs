//! Radio Device Abstraction
//!
//! Common interface for the hardware (or software radio) that moves
//! timestamped wideband samples and owns RF tuning and gain.

use common::types::{StreamFaults, Timestamp};

/// Outcome of one sample transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    /// Number of complex samples actually moved
    pub samples: usize,
    /// Buffer faults the device saw during the transfer
    pub faults: StreamFaults,
}

impl Transfer {
    /// A clean transfer of `samples` samples
    pub fn complete(samples: usize) -> Self {
        Self {
            samples,
            faults: StreamFaults::empty(),
        }
    }

    /// A transfer that also reports faults
    pub fn with_faults(samples: usize, faults: StreamFaults) -> Self {
        Self { samples, faults }
    }
}

/// Timestamped sample I/O and RF control.
///
/// Sample buffers are interleaved 16-bit I/Q, so a buffer for `count`
/// samples holds `2 * count` values. The receive and transmit directions are
/// driven from different threads, hence `&self` and `Sync`. Transfers block
/// until data or space is available, bounded by the device's own timeouts.
pub trait RadioDevice: Send + Sync {
    /// Read up to `count` samples starting at `timestamp`
    fn read_samples(&self, buf: &mut [i16], count: usize, timestamp: Timestamp) -> Transfer;

    /// Write `count` samples to be sent at `timestamp`
    fn write_samples(&self, buf: &[i16], count: usize, timestamp: Timestamp) -> Transfer;

    /// Tune the transmit synthesizer; returns whether the device accepted it
    fn set_tx_freq(&self, freq: f64) -> bool;

    /// Current transmit center frequency in Hz
    fn tx_freq(&self) -> f64;

    /// Tune the receive synthesizer; returns whether the device accepted it
    fn set_rx_freq(&self, freq: f64) -> bool;

    /// Current receive center frequency in Hz
    fn rx_freq(&self) -> f64;

    /// Set receive gain, returning the gain actually applied
    fn set_rx_gain(&self, db: f64) -> f64;

    /// Current receive gain
    fn rx_gain(&self) -> f64;
}
