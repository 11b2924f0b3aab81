//! Common Utilities and Types Library
//!
//! This crate provides shared types, sample conversion and the logging
//! facility used across the multi-carrier transceiver.

pub mod logging;
pub mod types;
pub mod utils;

// Re-export commonly used items
pub use types::*;
pub use utils::*;
