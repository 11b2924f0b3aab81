//! ZMQ Radio Device for IQ Sample Exchange
//!
//! This module implements a blocking [`RadioDevice`] on top of the
//! ZeroMQ REQ/REP sample exchange used by srsRAN-compatible software radios.
//! Samples travel as raw `cf_t` (little-endian f32 I/Q pairs); the wideband
//! stream is converted to and from the 16-bit wire format of the device trait.

use crate::device::{RadioDevice, Transfer};
use crate::InterfaceError;
use bytes::{Buf, BufMut, BytesMut};
use common::logging::DDEV;
use common::types::{StreamFaults, Timestamp};
use num_complex::Complex32;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, trace, warn};
use zmq::{Context, Socket};

/// Default ZMQ ports
pub const DEFAULT_TX_PORT: u16 = 2000;
pub const DEFAULT_RX_PORT: u16 = 2001;

/// Scale between 16-bit wire samples and unit-range floats
const FULL_SCALE: f32 = 32768.0;

/// ZMQ RF configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZmqRfConfig {
    /// TX binding address (REP socket, peer requests our samples)
    pub tx_address: String,
    /// RX connection address (REQ socket, we request peer samples)
    pub rx_address: String,
    /// Receive timeout in milliseconds
    pub rx_timeout_ms: i32,
    /// Transmit timeout in milliseconds
    pub tx_timeout_ms: i32,
    /// Highest receive gain accepted, in dB
    pub max_rx_gain: f64,
}

impl Default for ZmqRfConfig {
    fn default() -> Self {
        Self {
            tx_address: format!("tcp://*:{}", DEFAULT_TX_PORT),
            rx_address: format!("tcp://localhost:{}", DEFAULT_RX_PORT),
            rx_timeout_ms: 100,
            tx_timeout_ms: 100,
            max_rx_gain: 60.0,
        }
    }
}

impl ZmqRfConfig {
    /// Parse device arguments in srsRAN format
    /// Format: "key1=value1,key2=value2,..."
    pub fn from_device_args(args: &str) -> Result<Self, InterfaceError> {
        let mut config = Self::default();

        for pair in args.split(',') {
            let parts: Vec<&str> = pair.trim().split('=').collect();
            if parts.len() != 2 {
                continue;
            }

            let key = parts[0].trim();
            let value = parts[1].trim();

            match key {
                "tx_port" | "tx_port0" => config.tx_address = value.to_string(),
                "rx_port" | "rx_port0" => config.rx_address = value.to_string(),
                "rx_timeout" => {
                    config.rx_timeout_ms = value.parse::<i32>()
                        .map_err(|_| InterfaceError::InvalidConfig("Invalid rx_timeout".to_string()))?;
                }
                "tx_timeout" => {
                    config.tx_timeout_ms = value.parse::<i32>()
                        .map_err(|_| InterfaceError::InvalidConfig("Invalid tx_timeout".to_string()))?;
                }
                "max_rx_gain" => {
                    config.max_rx_gain = value.parse::<f64>()
                        .map_err(|_| InterfaceError::InvalidConfig("Invalid max_rx_gain".to_string()))?;
                }
                _ => {
                    debug!(target: DDEV, "Ignoring device argument {}", key);
                }
            }
        }

        Ok(config)
    }
}

/// Convert wire samples to raw bytes (srsRAN format)
fn wire_to_bytes(samples: &[i16]) -> BytesMut {
    let mut bytes = BytesMut::with_capacity(samples.len() * 4);

    // Each complex sample is 8 bytes (4 bytes real + 4 bytes imag)
    for &value in samples {
        bytes.put_f32_le(value as f32 / FULL_SCALE);
    }

    bytes
}

/// Convert raw bytes (srsRAN format) to complex samples
fn bytes_to_iq(mut bytes: &[u8]) -> Result<Vec<Complex32>, InterfaceError> {
    if bytes.len() % 8 != 0 {
        return Err(InterfaceError::InvalidMessage);
    }

    let mut samples = Vec::with_capacity(bytes.len() / 8);
    while bytes.has_remaining() {
        let re = bytes.get_f32_le();
        let im = bytes.get_f32_le();
        samples.push(Complex32::new(re, im));
    }

    Ok(samples)
}

fn to_wire(value: f32) -> i16 {
    (value * FULL_SCALE).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Device-side transfer counters
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RfStats {
    pub tx_samples: u64,
    pub rx_samples: u64,
    pub tx_timeouts: u64,
    pub rx_timeouts: u64,
}

#[derive(Debug, Default)]
struct RfState {
    tx_freq: f64,
    rx_freq: f64,
    rx_gain: f64,
    stats: RfStats,
}

/// Blocking ZMQ radio device
pub struct ZmqRadioDevice {
    config: ZmqRfConfig,
    _context: Context,
    tx_socket: Mutex<Socket>,
    rx_socket: Mutex<Socket>,
    /// Samples received beyond what the last read asked for
    rx_pending: Mutex<VecDeque<Complex32>>,
    state: Mutex<RfState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ZmqRadioDevice {
    /// Create the sockets and bind/connect them
    pub fn open(config: ZmqRfConfig) -> Result<Self, InterfaceError> {
        info!(target: DDEV, "Initializing ZMQ radio device");
        let context = Context::new();

        // TX uses REP socket and binds (waits for requests from the peer)
        let tx_socket = context.socket(zmq::REP)?;
        tx_socket.bind(&config.tx_address)?;
        tx_socket.set_rcvtimeo(config.tx_timeout_ms)?;
        tx_socket.set_sndtimeo(config.tx_timeout_ms)?;
        tx_socket.set_linger(0)?;
        info!(target: DDEV, "TX socket bound to {} (REP mode)", config.tx_address);

        // RX uses REQ socket and connects (sends requests to the peer)
        let rx_socket = context.socket(zmq::REQ)?;
        rx_socket.connect(&config.rx_address)?;
        rx_socket.set_rcvtimeo(config.rx_timeout_ms)?;
        rx_socket.set_sndtimeo(config.rx_timeout_ms)?;
        rx_socket.set_linger(0)?;
        // Allow a new request after a timed out reply
        rx_socket.set_req_relaxed(true)?;
        rx_socket.set_req_correlate(true)?;
        info!(target: DDEV, "RX socket connected to {} (REQ mode)", config.rx_address);

        Ok(Self {
            config,
            _context: context,
            tx_socket: Mutex::new(tx_socket),
            rx_socket: Mutex::new(rx_socket),
            rx_pending: Mutex::new(VecDeque::new()),
            state: Mutex::new(RfState::default()),
        })
    }

    /// Samples moved and peer timeouts so far
    pub fn stats(&self) -> RfStats {
        lock(&self.state).stats.clone()
    }

    /// Request one block from the peer, `Ok(None)` on timeout
    fn request_block(&self) -> Result<Option<Vec<Complex32>>, InterfaceError> {
        let rx_socket = lock(&self.rx_socket);

        match rx_socket.send(&[0u8][..], 0) {
            Ok(()) => {}
            Err(zmq::Error::EAGAIN) => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        match rx_socket.recv_bytes(0) {
            Ok(bytes) => bytes_to_iq(&bytes).map(Some),
            Err(zmq::Error::EAGAIN) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl RadioDevice for ZmqRadioDevice {
    fn read_samples(&self, buf: &mut [i16], count: usize, timestamp: Timestamp) -> Transfer {
        let count = count.min(buf.len() / 2);
        let mut pending = lock(&self.rx_pending);
        let mut faults = StreamFaults::empty();

        while pending.len() < count {
            match self.request_block() {
                Ok(Some(block)) => {
                    trace!(target: DDEV, "RX: received {} samples", block.len());
                    pending.extend(block);
                }
                Ok(None) => {
                    lock(&self.state).stats.rx_timeouts += 1;
                    debug!(target: DDEV, "RX: timeout waiting for samples at {}", timestamp);
                    break;
                }
                Err(e) => {
                    error!(target: DDEV, "RX: failed to receive samples: {}", e);
                    faults |= StreamFaults::OVERRUN;
                    break;
                }
            }
        }

        let num = count.min(pending.len());
        for (iq, sample) in buf.chunks_exact_mut(2).zip(pending.drain(..num)) {
            iq[0] = to_wire(sample.re);
            iq[1] = to_wire(sample.im);
        }

        lock(&self.state).stats.rx_samples += num as u64;
        Transfer::with_faults(num, faults)
    }

    fn write_samples(&self, buf: &[i16], count: usize, timestamp: Timestamp) -> Transfer {
        let count = count.min(buf.len() / 2);
        let tx_socket = lock(&self.tx_socket);

        // Wait for the peer's request byte (REQ-REP pattern)
        let mut request = [0u8; 1];
        match tx_socket.recv_into(&mut request, 0) {
            Ok(_) => {}
            Err(zmq::Error::EAGAIN) => {
                lock(&self.state).stats.tx_timeouts += 1;
                debug!(target: DDEV, "TX: no request from peer at {}", timestamp);
                return Transfer::with_faults(0, StreamFaults::UNDERRUN);
            }
            Err(e) => {
                error!(target: DDEV, "TX: error receiving request: {}", e);
                return Transfer::with_faults(0, StreamFaults::UNDERRUN);
            }
        }

        let bytes = wire_to_bytes(&buf[..2 * count]);
        match tx_socket.send(&bytes[..], 0) {
            Ok(()) => {
                lock(&self.state).stats.tx_samples += count as u64;
                Transfer::complete(count)
            }
            Err(e) => {
                warn!(target: DDEV, "TX: failed to send samples: {}", e);
                Transfer::with_faults(0, StreamFaults::UNDERRUN)
            }
        }
    }

    fn set_tx_freq(&self, freq: f64) -> bool {
        debug!(target: DDEV, "TX frequency {:.3} MHz", freq / 1e6);
        lock(&self.state).tx_freq = freq;
        true
    }

    fn tx_freq(&self) -> f64 {
        lock(&self.state).tx_freq
    }

    fn set_rx_freq(&self, freq: f64) -> bool {
        debug!(target: DDEV, "RX frequency {:.3} MHz", freq / 1e6);
        lock(&self.state).rx_freq = freq;
        true
    }

    fn rx_freq(&self) -> f64 {
        lock(&self.state).rx_freq
    }

    fn set_rx_gain(&self, db: f64) -> f64 {
        let mut state = lock(&self.state);
        state.rx_gain = db.clamp(0.0, self.config.max_rx_gain);
        state.rx_gain
    }

    fn rx_gain(&self) -> f64 {
        lock(&self.state).rx_gain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iq_serialization() {
        let wire = [16384i16, -16384, 0, 32767];
        let bytes = wire_to_bytes(&wire);
        assert_eq!(bytes.len(), 16);

        let samples = bytes_to_iq(&bytes).unwrap();
        assert_eq!(samples.len(), 2);
        assert!((samples[0].re - 0.5).abs() < 1e-6);
        assert!((samples[0].im + 0.5).abs() < 1e-6);
        assert_eq!(to_wire(samples[1].im), 32767);
    }

    #[test]
    fn test_bytes_to_iq_rejects_partial_sample() {
        assert!(matches!(bytes_to_iq(&[0u8; 12]), Err(InterfaceError::InvalidMessage)));
    }

    #[test]
    fn test_device_args() {
        let config = ZmqRfConfig::from_device_args(
            "tx_port=tcp://*:5000,rx_port=tcp://localhost:5001,rx_timeout=20",
        )
        .unwrap();
        assert_eq!(config.tx_address, "tcp://*:5000");
        assert_eq!(config.rx_address, "tcp://localhost:5001");
        assert_eq!(config.rx_timeout_ms, 20);

        assert!(ZmqRfConfig::from_device_args("max_rx_gain=loud").is_err());
    }

    #[test]
    fn test_timeouts_are_counted() {
        let config = ZmqRfConfig {
            tx_address: "inproc://trx-timeout-tx".to_string(),
            rx_address: "inproc://trx-timeout-rx".to_string(),
            rx_timeout_ms: 10,
            tx_timeout_ms: 10,
            ..Default::default()
        };
        let device = ZmqRadioDevice::open(config).unwrap();
        assert_eq!(device.stats(), RfStats::default());

        // No peer on either socket
        let mut buf = vec![0i16; 8];
        assert_eq!(device.read_samples(&mut buf, 4, 0).samples, 0);
        let transfer = device.write_samples(&buf, 4, 0);
        assert_eq!(transfer.samples, 0);
        assert_eq!(transfer.faults, StreamFaults::UNDERRUN);

        let stats = device.stats();
        assert_eq!(stats.rx_timeouts, 1);
        assert_eq!(stats.tx_timeouts, 1);
        assert_eq!(stats.rx_samples + stats.tx_samples, 0);
    }

    #[test]
    fn test_rf_config_default() {
        let config = ZmqRfConfig::default();
        assert_eq!(config.tx_address, "tcp://*:2000");
        assert_eq!(config.rx_timeout_ms, 100);
    }
}
