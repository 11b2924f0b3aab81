//! Multi-Carrier Transceiver Library
//!
//! This crate bridges several narrowband logical carriers to one wideband
//! sample stream: polyphase channelization and synthesis, rational
//! resampling, per-carrier ring buffers and the radio interface that
//! orchestrates them against a [`interfaces::RadioDevice`].

pub mod channel_map;
pub mod dsp;
pub mod multi;
pub mod radio_buffer;

pub use channel_map::{MCHANS, REFERENCE_CHANNEL};
pub use multi::{MultiRadioConfig, MultiRadioInterface, RadioStats};
pub use radio_buffer::RadioBuffer;

use thiserror::Error;

/// Transceiver errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrxError {
    #[error("Invalid channel configuration: {0} channels")]
    InvalidChannelCount(usize),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Interface not initialized")]
    NotInitialized,

    #[error("Invalid channel: {0}")]
    InvalidChannel(usize),

    #[error("Buffer length mismatch: expected {expected}, got {actual}")]
    BufferLength { expected: usize, actual: usize },
}
