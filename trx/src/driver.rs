//! Driver Loops
//!
//! Blocking loops that keep the radio interface and the per-carrier buffers
//! moving. Each loop runs on its own blocking task until the shared run flag
//! is cleared.

use common::logging::DTRX;
use common::utils::mean_power;
use num_complex::Complex32;
use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};
use transceiver::{MultiRadioInterface, RadioBuffer};

/// Samples per burst handed to or taken from a carrier buffer
pub const BURST_LEN: usize = 156;

/// Back-off when a loop has nothing to do
const IDLE_WAIT: Duration = Duration::from_millis(1);

/// Pull device blocks while `ready` allows it; returns the blocks received
pub fn run_receive(
    radio: Arc<MultiRadioInterface>,
    running: Arc<AtomicBool>,
    ready: impl Fn() -> bool,
) -> u64 {
    let mut blocks = 0;
    while running.load(Ordering::Acquire) {
        if ready() && radio.pull_buffer() {
            blocks += 1;
        } else {
            thread::sleep(IDLE_WAIT);
        }
    }
    debug!(target: DTRX, "Receive loop stopped after {} blocks", blocks);
    blocks
}

/// Push device blocks; returns the blocks sent
pub fn run_transmit(radio: Arc<MultiRadioInterface>, running: Arc<AtomicBool>) -> u64 {
    let mut blocks = 0;
    while running.load(Ordering::Acquire) {
        if radio.push_buffer() {
            blocks += 1;
        } else {
            thread::sleep(IDLE_WAIT);
        }
    }
    debug!(target: DTRX, "Transmit loop stopped after {} blocks", blocks);
    blocks
}

/// Constant envelope test signal for one carrier
pub struct BurstSource {
    buffer: Arc<RadioBuffer>,
    amplitude: f32,
    /// Tone frequency in cycles per sample
    freq: f32,
    phase: f32,
}

impl BurstSource {
    pub fn new(buffer: Arc<RadioBuffer>, amplitude: f32, freq: f32) -> Self {
        Self {
            buffer,
            amplitude,
            freq,
            phase: 0.0,
        }
    }

    /// Next burst of the tone
    pub fn next_burst(&mut self) -> Vec<Complex32> {
        let step = 2.0 * PI * self.freq;
        (0..BURST_LEN)
            .map(|i| Complex32::from_polar(self.amplitude, self.phase + step * i as f32))
            .collect()
    }

    /// Queue one burst; `false` when the buffer is full
    pub fn fill(&mut self) -> bool {
        let burst = self.next_burst();
        if !self.buffer.write(&burst) {
            return false;
        }
        self.phase = (self.phase + 2.0 * PI * self.freq * BURST_LEN as f32) % (2.0 * PI);
        true
    }

    /// Keep the buffer topped up; returns the bursts queued
    pub fn run(mut self, running: Arc<AtomicBool>) -> u64 {
        let mut bursts = 0;
        while running.load(Ordering::Acquire) {
            if self.fill() {
                bursts += 1;
            } else {
                thread::sleep(IDLE_WAIT);
            }
        }
        bursts
    }
}

/// Totals collected by a [`BurstSink`]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SinkStats {
    pub bursts: u64,
    /// Mean power of the latest burst
    pub last_power: f32,
}

/// Drains one carrier's receive buffer burst by burst
pub struct BurstSink {
    chan: usize,
    buffer: Arc<RadioBuffer>,
    stats: SinkStats,
}

impl BurstSink {
    pub fn new(chan: usize, buffer: Arc<RadioBuffer>) -> Self {
        Self {
            chan,
            buffer,
            stats: SinkStats::default(),
        }
    }

    /// Take one burst if available
    pub fn drain(&mut self) -> bool {
        let mut burst = vec![Complex32::new(0.0, 0.0); BURST_LEN];
        if !self.buffer.read(&mut burst) {
            return false;
        }
        self.stats.bursts += 1;
        self.stats.last_power = mean_power(&burst);
        true
    }

    pub fn stats(&self) -> SinkStats {
        self.stats
    }

    pub fn run(mut self, running: Arc<AtomicBool>) -> SinkStats {
        while running.load(Ordering::Acquire) {
            if !self.drain() {
                thread::sleep(IDLE_WAIT);
            }
        }
        info!(target: DTRX, "Channel {} received {} bursts, last power {:.1} dB",
              self.chan, self.stats.bursts, 10.0 * self.stats.last_power.max(1e-12).log10());
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interfaces::LoopbackDevice;
    use transceiver::MultiRadioConfig;

    #[test]
    fn test_source_respects_capacity() {
        let buffer = Arc::new(RadioBuffer::new(2, 260, 16).unwrap());
        let mut source = BurstSource::new(buffer.clone(), 1000.0, 0.01);

        let mut bursts = 0;
        while source.fill() {
            bursts += 1;
        }
        assert_eq!(bursts, 520 / BURST_LEN);
        assert_eq!(buffer.available(), bursts * BURST_LEN);
    }

    #[test]
    fn test_source_phase_is_continuous() {
        let buffer = Arc::new(RadioBuffer::new(4, 260, 0).unwrap());
        let mut source = BurstSource::new(buffer.clone(), 1.0, 0.05);
        assert!(source.fill());
        assert!(source.fill());

        let mut samples = vec![Complex32::new(0.0, 0.0); 2 * BURST_LEN];
        assert!(buffer.read(&mut samples));
        let expected = Complex32::from_polar(1.0, 2.0 * PI * 0.05);
        for pair in samples.windows(2) {
            assert!((pair[1] * pair[0].conj() - expected).norm() < 1e-3);
        }
    }

    #[test]
    fn test_sink_measures_power() {
        let buffer = Arc::new(RadioBuffer::new(2, 260, 0).unwrap());
        buffer.write(&vec![Complex32::new(3.0, 4.0); BURST_LEN]);

        let mut sink = BurstSink::new(0, buffer);
        assert!(sink.drain());
        assert!(!sink.drain());
        assert_eq!(sink.stats().bursts, 1);
        assert!((sink.stats().last_power - 25.0).abs() < 1e-3);
    }

    #[test]
    fn test_loops_stop_on_flag() {
        let device = Arc::new(LoopbackDevice::with_loopback());
        let radio = Arc::new(MultiRadioInterface::new(device.clone(), 1, MultiRadioConfig::default()));
        radio.init().unwrap();
        let running = Arc::new(AtomicBool::new(true));

        let source = BurstSource::new(radio.tx_buffer(0).unwrap(), 1000.0, 0.0);
        let sink = BurstSink::new(0, radio.rx_buffer(0).unwrap());

        let handles = {
            let (r1, r2, r3, r4) = (running.clone(), running.clone(), running.clone(), running.clone());
            let (tx_radio, rx_radio) = (radio.clone(), radio.clone());
            let dev = device.clone();
            (
                thread::spawn(move || source.run(r1)),
                thread::spawn(move || sink.run(r2)),
                thread::spawn(move || run_transmit(tx_radio, r3)),
                thread::spawn(move || run_receive(rx_radio, r4, move || dev.pending_rx() >= 768)),
            )
        };

        thread::sleep(Duration::from_millis(200));
        running.store(false, Ordering::Release);

        assert!(handles.0.join().unwrap() > 0);
        let sink_stats = handles.1.join().unwrap();
        assert!(handles.2.join().unwrap() > 0);
        assert!(handles.3.join().unwrap() > 0);
        assert!(sink_stats.bursts > 0);
        radio.close();
    }
}
