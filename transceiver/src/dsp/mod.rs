//! Wideband Signal Processing
//!
//! Polyphase analysis/synthesis filterbanks and the rational resampler used
//! between the per-carrier rate and the filterbank sub-band rate.

pub mod channelizer;
pub mod filter;
pub mod resampler;
pub mod synthesis;

pub use channelizer::Channelizer;
pub use resampler::Resampler;
pub use synthesis::Synthesis;
