//! Transceiver Configuration
//!
//! Loaded from a YAML or TOML file; command line options override it.

use serde::{Deserialize, Serialize};
use std::path::Path;
use transceiver::{MultiRadioConfig, MCHANS};

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrxConfig {
    /// Radio device
    #[serde(default)]
    pub device: DeviceConfig,
    /// Logical carriers, reference channel first
    pub channels: Vec<ChannelConfig>,
    /// Multi-carrier processing parameters
    #[serde(default)]
    pub radio: MultiRadioConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
    /// Statistics report period in seconds
    #[serde(default = "default_stats_interval")]
    pub stats_interval_s: u64,
}

fn default_stats_interval() -> u64 {
    5
}

/// Radio device selection
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DeviceConfig {
    /// In-memory device looping transmit back to receive
    #[default]
    Loopback,
    /// ZeroMQ IQ exchange with a software radio
    Zmq {
        /// srsRAN style device arguments
        device_args: String,
    },
}

/// One logical carrier
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChannelConfig {
    /// Downlink frequency in Hz
    pub tx_freq: f64,
    /// Uplink frequency in Hz
    pub rx_freq: f64,
    /// Receive gain in dB, only applied on the reference channel
    #[serde(default)]
    pub rx_gain: f64,
    /// Digital transmit attenuation in dB
    #[serde(default)]
    pub power_attenuation: f64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Global level name or syslog number
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Per-category levels, e.g. "DDSP,3:DTRX,INFO"
    #[serde(default)]
    pub category_mask: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            category_mask: None,
        }
    }
}

fn default_log_level() -> String {
    "NOTICE".to_string()
}

impl TrxConfig {
    /// Configuration for `chans` carriers on a regular grid starting at
    /// `tx_freq`, uplink `duplex_offset` below the downlink
    pub fn carrier_grid(chans: usize, tx_freq: f64, duplex_offset: f64) -> Self {
        let radio = MultiRadioConfig::default();
        let channels = (0..chans)
            .map(|chan| {
                let tx = tx_freq + chan as f64 * radio.spacing;
                ChannelConfig {
                    tx_freq: tx,
                    rx_freq: tx - duplex_offset,
                    rx_gain: 0.0,
                    power_attenuation: 0.0,
                }
            })
            .collect();

        Self {
            device: DeviceConfig::default(),
            channels,
            radio,
            log: LogConfig::default(),
            stats_interval_s: default_stats_interval(),
        }
    }

    /// Load configuration, picking the format from the file extension
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yml") | Some("yaml") => Self::from_yaml_str(&contents),
            Some("toml") => Self::from_toml_str(&contents),
            _ => Err(anyhow::anyhow!("Unknown configuration format: {}", path.display())),
        }
    }

    pub fn from_yaml_str(contents: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Check what the radio interface cannot check for itself
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.channels.is_empty() || self.channels.len() > MCHANS - 1 {
            return Err(anyhow::anyhow!(
                "Invalid number of channels: {} (1 to {} supported)",
                self.channels.len(),
                MCHANS - 1
            ));
        }

        for (chan, channel) in self.channels.iter().enumerate() {
            if channel.tx_freq <= 0.0 || channel.rx_freq <= 0.0 {
                return Err(anyhow::anyhow!("Channel {} has no valid frequency", chan));
            }
            if channel.power_attenuation < 0.0 {
                return Err(anyhow::anyhow!("Channel {} has negative attenuation", chan));
            }
        }

        if self.stats_interval_s == 0 {
            return Err(anyhow::anyhow!("Statistics interval must be positive"));
        }

        Ok(())
    }
}
