//! Common Types for the Multi-Carrier Transceiver
//!
//! Defines stream fault indicators shared between the device layer and the
//! radio interface.

use bitflags::bitflags;
use std::sync::atomic::{AtomicU8, Ordering};

/// Sample clock value, counted in wideband samples
pub type Timestamp = u64;

bitflags! {
    /// Buffer faults reported by a radio device for one transfer
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StreamFaults: u8 {
        /// Receive samples were dropped by the device
        const OVERRUN = 0b0000_0001;
        /// The device ran out of transmit samples
        const UNDERRUN = 0b0000_0010;
    }
}

impl Default for StreamFaults {
    fn default() -> Self {
        Self::empty()
    }
}

/// Fault accumulator shared between the receive and transmit contexts.
///
/// Flags only ever go from clear to set through [`StickyFaults::raise`];
/// nothing but an explicit [`take`](StickyFaults::take) or
/// [`clear`](StickyFaults::clear) resets them.
#[derive(Debug, Default)]
pub struct StickyFaults {
    bits: AtomicU8,
}

impl StickyFaults {
    /// Create an accumulator with no faults recorded
    pub fn new() -> Self {
        Self::default()
    }

    /// OR the given faults into the accumulator
    pub fn raise(&self, faults: StreamFaults) {
        if !faults.is_empty() {
            self.bits.fetch_or(faults.bits(), Ordering::AcqRel);
        }
    }

    /// Current set of faults
    pub fn get(&self) -> StreamFaults {
        StreamFaults::from_bits_truncate(self.bits.load(Ordering::Acquire))
    }

    /// Whether an overrun was seen since the last reset
    pub fn overrun(&self) -> bool {
        self.get().contains(StreamFaults::OVERRUN)
    }

    /// Whether an underrun was seen since the last reset
    pub fn underrun(&self) -> bool {
        self.get().contains(StreamFaults::UNDERRUN)
    }

    /// Return and reset the given faults in one atomic step
    pub fn take(&self, faults: StreamFaults) -> StreamFaults {
        let prev = self.bits.fetch_and(!faults.bits(), Ordering::AcqRel);
        StreamFaults::from_bits_truncate(prev) & faults
    }

    /// Reset all faults
    pub fn clear(&self) {
        self.bits.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_faults_are_sticky() {
        let faults = StickyFaults::new();
        assert!(faults.get().is_empty());

        faults.raise(StreamFaults::OVERRUN);
        faults.raise(StreamFaults::empty());
        assert!(faults.overrun());
        assert!(!faults.underrun());

        faults.raise(StreamFaults::UNDERRUN);
        assert_eq!(faults.get(), StreamFaults::OVERRUN | StreamFaults::UNDERRUN);
    }

    #[test]
    fn test_take_resets_only_requested() {
        let faults = StickyFaults::new();
        faults.raise(StreamFaults::OVERRUN | StreamFaults::UNDERRUN);

        assert_eq!(faults.take(StreamFaults::UNDERRUN), StreamFaults::UNDERRUN);
        assert!(!faults.underrun());
        assert!(faults.overrun());
        assert!(faults.take(StreamFaults::UNDERRUN).is_empty());

        faults.clear();
        assert!(faults.get().is_empty());
    }
}
