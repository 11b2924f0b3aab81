//! Radio Device Interfaces Library
//!
//! This crate defines the device abstraction the multi-carrier transceiver
//! exchanges timestamped wideband samples with, together with an in-memory
//! loopback device and a ZeroMQ IQ device for software radios.

pub mod device;
pub mod loopback;
pub mod zmq_rf;

pub use device::{RadioDevice, Transfer};
pub use loopback::LoopbackDevice;
pub use zmq_rf::{ZmqRadioDevice, ZmqRfConfig};

use thiserror::Error;

/// Interface errors
#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("ZMQ error: {0}")]
    ZmqError(#[from] zmq::Error),

    #[error("Invalid message format")]
    InvalidMessage,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
