//! Multi-Carrier Transceiver Application
//!
//! Runs the multi-carrier radio interface against a radio device, with a
//! test tone source and a burst sink on every logical carrier.

mod config;
mod driver;

use anyhow::Result;
use clap::Parser;
use common::logging::{init_logging, AlarmLog, DEFAULT_MAX_ALARMS};
use config::{DeviceConfig, TrxConfig};
use driver::{run_receive, run_transmit, BurstSink, BurstSource};
use interfaces::{LoopbackDevice, RadioDevice, ZmqRadioDevice, ZmqRfConfig};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use transceiver::{MultiRadioInterface, MCHANS};

/// Multi-carrier GSM-style transceiver
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a YAML or TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (EMERG..DEBUG or 0-7)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Per-category log levels, e.g. "DDSP,ERR:DTRX,INFO"
    #[arg(long)]
    log_mask: Option<String>,

    /// Number of carriers when no configuration file is given
    #[arg(long, default_value = "1")]
    channels: usize,

    /// First downlink carrier in MHz when no configuration file is given
    #[arg(long, default_value = "935.2")]
    tx_freq_mhz: f64,

    /// Downlink to uplink offset in MHz
    #[arg(long, default_value = "45")]
    duplex_offset_mhz: f64,

    /// ZMQ device arguments; selects the ZMQ device
    #[arg(long)]
    device_args: Option<String>,

    /// Test tone amplitude on every carrier, 0 disables the sources
    #[arg(long, default_value = "8000")]
    tone_amplitude: f32,
}

fn load_config(args: &Args) -> Result<TrxConfig> {
    let mut config = match &args.config {
        Some(path) => TrxConfig::from_file(path)?,
        None => TrxConfig::carrier_grid(
            args.channels,
            args.tx_freq_mhz * 1e6,
            args.duplex_offset_mhz * 1e6,
        ),
    };

    if let Some(level) = &args.log_level {
        config.log.level = level.clone();
    }
    if let Some(mask) = &args.log_mask {
        config.log.category_mask = Some(mask.clone());
    }
    if let Some(device_args) = &args.device_args {
        config.device = DeviceConfig::Zmq {
            device_args: device_args.clone(),
        };
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    let alarms = Arc::new(AlarmLog::new(DEFAULT_MAX_ALARMS));
    init_logging(&config.log.level, config.log.category_mask.as_deref(), alarms.clone())?;

    info!("Starting multi-carrier transceiver");
    let chans = config.channels.len();

    // Loopback needs a whole block queued before a read can succeed
    let block_len = config.radio.outchunk() * MCHANS;
    let mut zmq_device = None;
    let (device, rx_ready) = match &config.device {
        DeviceConfig::Loopback => {
            info!("Using loopback device");
            let loopback = Arc::new(LoopbackDevice::with_loopback());
            let queue = loopback.clone();
            let device: Arc<dyn RadioDevice> = loopback;
            let ready: Box<dyn Fn() -> bool + Send> =
                Box::new(move || queue.pending_rx() >= block_len);
            (device, ready)
        }
        DeviceConfig::Zmq { device_args } => {
            let zmq_config = ZmqRfConfig::from_device_args(device_args)?;
            info!("ZMQ configuration:");
            info!("  TX address: {}", zmq_config.tx_address);
            info!("  RX address: {}", zmq_config.rx_address);
            let zmq = Arc::new(ZmqRadioDevice::open(zmq_config)?);
            zmq_device = Some(zmq.clone());
            let device: Arc<dyn RadioDevice> = zmq;
            let ready: Box<dyn Fn() -> bool + Send> = Box::new(|| true);
            (device, ready)
        }
    };

    let radio = Arc::new(MultiRadioInterface::new(device, chans, config.radio.clone()));
    radio.init()?;

    for (chan, channel) in config.channels.iter().enumerate() {
        if !radio.tune_tx(channel.tx_freq, chan) {
            return Err(anyhow::anyhow!("Failed to tune TX of channel {}", chan));
        }
        if !radio.tune_rx(channel.rx_freq, chan) {
            return Err(anyhow::anyhow!("Failed to tune RX of channel {}", chan));
        }
        let gain = radio.set_rx_gain(channel.rx_gain, chan);
        radio.set_power_attenuation(channel.power_attenuation, chan)?;
        info!("Channel {}: TX {:.1} kHz, RX {:.1} kHz, RX gain {:.1} dB",
              chan, channel.tx_freq / 1e3, channel.rx_freq / 1e3, gain);
    }

    let running = Arc::new(AtomicBool::new(true));
    let mut workers = Vec::new();

    for chan in 0..chans {
        let (Some(send), Some(recv)) = (radio.tx_buffer(chan), radio.rx_buffer(chan)) else {
            return Err(anyhow::anyhow!("Channel {} has no buffers", chan));
        };

        if args.tone_amplitude > 0.0 {
            // Distinct offsets tell the carriers apart at the sink
            let source = BurstSource::new(send, args.tone_amplitude, 0.01 * (chan + 1) as f32);
            let flag = running.clone();
            workers.push(tokio::task::spawn_blocking(move || {
                source.run(flag);
            }));
        }

        let sink = BurstSink::new(chan, recv);
        let flag = running.clone();
        workers.push(tokio::task::spawn_blocking(move || {
            sink.run(flag);
        }));
    }

    let transmit = {
        let radio = radio.clone();
        let flag = running.clone();
        tokio::task::spawn_blocking(move || run_transmit(radio, flag))
    };
    let receive = {
        let radio = radio.clone();
        let flag = running.clone();
        tokio::task::spawn_blocking(move || run_receive(radio, flag, rx_ready))
    };

    let stats_handle = {
        let radio = radio.clone();
        let running = running.clone();
        let alarms = alarms.clone();
        let period = config.stats_interval_s;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(period));
            interval.tick().await;

            while running.load(Ordering::Acquire) {
                interval.tick().await;

                let report = {
                    let radio = radio.clone();
                    let zmq = zmq_device.clone();
                    tokio::task::spawn_blocking(move || {
                        (radio.stats(), radio.take_underrun(), zmq.map(|d| d.stats()))
                    })
                    .await
                };
                let (stats, underrun, rf_stats) = match report {
                    Ok(report) => report,
                    Err(e) => {
                        error!("Statistics task failed: {}", e);
                        continue;
                    }
                };

                info!("Radio Statistics:");
                info!("  Read timestamp: {}, write timestamp: {}",
                      stats.read_timestamp, stats.write_timestamp);
                info!("  RX fill: {:?}, TX fill: {:?}", stats.rx_fill, stats.tx_fill);
                if !stats.faults.is_empty() {
                    warn!("  Stream faults: {:?}", stats.faults);
                }
                if underrun {
                    warn!("  Transmit underrun since last report");
                }
                if let Some(rf) = rf_stats {
                    info!("  Device: TX {} samples, RX {} samples, timeouts TX {} RX {}",
                          rf.tx_samples, rf.rx_samples, rf.tx_timeouts, rf.rx_timeouts);
                }
                if !alarms.is_empty() {
                    warn!("  {} alarms, latest: {:?}", alarms.len(), alarms.snapshot().last());
                }
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");
    running.store(false, Ordering::Release);

    match transmit.await {
        Ok(blocks) => info!("Transmitted {} blocks", blocks),
        Err(e) => error!("Transmit loop failed: {}", e),
    }
    match receive.await {
        Ok(blocks) => info!("Received {} blocks", blocks),
        Err(e) => error!("Receive loop failed: {}", e),
    }
    for worker in workers {
        if let Err(e) = worker.await {
            error!("Carrier worker failed: {}", e);
        }
    }

    let _ = tokio::time::timeout(tokio::time::Duration::from_secs(5), stats_handle).await;

    radio.close();
    info!("Transceiver shutdown complete");
    Ok(())
}
