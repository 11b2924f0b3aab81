//! Logging and Alarm Facility
//!
//! Leveled diagnostics go through `tracing`. Three log targets stand in for
//! the transceiver log categories, and every error-level event is also kept
//! in a bounded rolling alarm list that operators can query at runtime.

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as tfmt, Layer};

/// Log target of the transceiver L1 (tuning, channel setup)
pub const DTRX: &str = "trx";
/// Log target of the device driver interface
pub const DDEV: &str = "dev";
/// Log target of the L1 DSP path (filterbanks, resamplers, buffers)
pub const DDSP: &str = "dsp";

/// Default number of alarms kept in the rolling list
pub const DEFAULT_MAX_ALARMS: usize = 20;

/// Logging errors
#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Unknown log level: {0}")]
    InvalidLevel(String),

    #[error("Invalid category mask: {0}")]
    InvalidMask(String),

    #[error("Failed to install subscriber: {0}")]
    Init(String),
}

/// Syslog-style severity levels, most severe first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, FromPrimitive, ToPrimitive)]
pub enum LogLevel {
    Emerg = 0,
    Alert = 1,
    Crit = 2,
    Err = 3,
    Warning = 4,
    Notice = 5,
    Info = 6,
    Debug = 7,
}

impl LogLevel {
    const NAMES: [&'static str; 8] = [
        "EMERG", "ALERT", "CRIT", "ERR", "WARNING", "NOTICE", "INFO", "DEBUG",
    ];

    /// Canonical level name
    pub fn name(&self) -> &'static str {
        Self::NAMES[*self as usize]
    }

    /// Parse a level name or syslog number.
    ///
    /// Accepts the canonical names plus INFORMATION, WARN, ERROR, CRITICAL
    /// and EMERGENCY, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        let upper = name.trim().to_ascii_uppercase();

        if let Ok(num) = upper.parse::<u8>() {
            return Self::from_u8(num);
        }

        // Reverse search, the verbose levels are the common ones
        if let Some(idx) = Self::NAMES.iter().rposition(|n| *n == upper) {
            return Self::from_usize(idx);
        }

        match upper.as_str() {
            "INFORMATION" => Some(Self::Info),
            "WARN" => Some(Self::Warning),
            "ERROR" => Some(Self::Err),
            "CRITICAL" => Some(Self::Crit),
            "EMERGENCY" => Some(Self::Emerg),
            _ => None,
        }
    }

    /// Closest `tracing` filter for this level
    pub fn to_filter(&self) -> LevelFilter {
        match self {
            Self::Emerg | Self::Alert | Self::Crit | Self::Err => LevelFilter::ERROR,
            Self::Warning => LevelFilter::WARN,
            Self::Notice | Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
        }
    }

    fn directive(&self) -> &'static str {
        match self {
            Self::Emerg | Self::Alert | Self::Crit | Self::Err => "error",
            Self::Warning => "warn",
            Self::Notice | Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Map a category name onto its log target
fn category_target(name: &str) -> Option<&'static str> {
    match name {
        "DTRX" => Some(DTRX),
        "DDEV" => Some(DDEV),
        "DDSP" => Some(DDSP),
        _ => None,
    }
}

/// Translate a category mask into `EnvFilter` directives.
///
/// The mask is a `:`-separated list of `CATEGORY[,LEVEL]` entries, e.g.
/// `"DDSP,3:DTRX,INFO"` becomes `"dsp=error,trx=info"`. A category without a
/// level is enabled at INFO.
pub fn parse_category_mask(mask: &str) -> Result<String, LoggingError> {
    let mut directives = Vec::new();

    for entry in mask.split(':').map(str::trim).filter(|e| !e.is_empty()) {
        let mut parts = entry.splitn(2, ',');
        let name = parts.next().unwrap_or_default().trim();
        let target = category_target(name)
            .ok_or_else(|| LoggingError::InvalidMask(format!("unknown category {}", name)))?;

        let level = match parts.next() {
            Some(level) => LogLevel::parse(level)
                .ok_or_else(|| LoggingError::InvalidMask(format!("bad level in {}", entry)))?,
            None => LogLevel::Info,
        };

        directives.push(format!("{}={}", target, level.directive()));
    }

    Ok(directives.join(","))
}

/// Bounded rolling list of error-and-above messages
#[derive(Debug)]
pub struct AlarmLog {
    max: usize,
    alarms: Mutex<VecDeque<String>>,
}

impl Default for AlarmLog {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ALARMS)
    }
}

impl AlarmLog {
    /// Create an alarm list keeping at most `max` entries
    pub fn new(max: usize) -> Self {
        Self {
            max: max.max(1),
            alarms: Mutex::new(VecDeque::with_capacity(max)),
        }
    }

    /// Append an alarm, dropping the oldest ones beyond the limit
    pub fn push(&self, alarm: String) {
        let mut alarms = self.alarms.lock().unwrap_or_else(PoisonError::into_inner);
        alarms.push_back(alarm);
        while alarms.len() > self.max {
            alarms.pop_front();
        }
    }

    /// Copy of the current alarms, oldest first
    pub fn snapshot(&self) -> Vec<String> {
        self.alarms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.alarms.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}

/// `tracing` layer that copies error events into an [`AlarmLog`]
pub struct AlarmLayer {
    alarms: Arc<AlarmLog>,
}

impl AlarmLayer {
    pub fn new(alarms: Arc<AlarmLog>) -> Self {
        Self { alarms }
    }
}

impl<S: Subscriber> Layer<S> for AlarmLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() != Level::ERROR {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let mut alarm = format!("{} [{}] {}", LogLevel::Err, metadata.target(), visitor.message);
        if !visitor.fields.is_empty() {
            alarm.push(' ');
            alarm.push_str(&visitor.fields.join(" "));
        }
        self.alarms.push(alarm);
    }
}

/// Install the global subscriber: formatted console output filtered by
/// `level` and the optional category mask (`RUST_LOG` wins when set), plus
/// the alarm layer which sees every error regardless of the filter.
pub fn init_logging(
    level: &str,
    category_mask: Option<&str>,
    alarms: Arc<AlarmLog>,
) -> Result<(), LoggingError> {
    let level = LogLevel::parse(level).ok_or_else(|| LoggingError::InvalidLevel(level.to_string()))?;

    let mut directives = level.directive().to_string();
    if let Some(mask) = category_mask {
        let categories = parse_category_mask(mask)?;
        if !categories.is_empty() {
            directives.push(',');
            directives.push_str(&categories);
        }
    }

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&directives));

    let console = tfmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(console)
        .with(AlarmLayer::new(alarms))
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{error, info};

    #[test]
    fn test_level_parsing() {
        assert_eq!(LogLevel::parse("DEBUG"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("notice"), Some(LogLevel::Notice));
        assert_eq!(LogLevel::parse("WARN"), Some(LogLevel::Warning));
        assert_eq!(LogLevel::parse("ERROR"), Some(LogLevel::Err));
        assert_eq!(LogLevel::parse("EMERGENCY"), Some(LogLevel::Emerg));
        assert_eq!(LogLevel::parse("3"), Some(LogLevel::Err));
        assert_eq!(LogLevel::parse("8"), None);
        assert_eq!(LogLevel::parse("LOUD"), None);
    }

    #[test]
    fn test_level_filters() {
        assert_eq!(LogLevel::Crit.to_filter(), LevelFilter::ERROR);
        assert_eq!(LogLevel::Notice.to_filter(), LevelFilter::INFO);
        assert_eq!(LogLevel::Debug.to_filter(), LevelFilter::DEBUG);
        assert_eq!(LogLevel::Warning.to_string(), "WARNING");
    }

    #[test]
    fn test_category_mask() {
        assert_eq!(parse_category_mask("DDSP,3:DTRX,INFO").unwrap(), "dsp=error,trx=info");
        assert_eq!(parse_category_mask("DDEV").unwrap(), "dev=info");
        assert!(parse_category_mask("DFOO,3").is_err());
        assert!(parse_category_mask("DDSP,LOUD").is_err());
    }

    #[test]
    fn test_alarm_log_is_bounded() {
        let alarms = AlarmLog::new(3);
        for i in 0..5 {
            alarms.push(format!("alarm {}", i));
        }

        assert_eq!(alarms.snapshot(), vec!["alarm 2", "alarm 3", "alarm 4"]);
    }

    #[test]
    fn test_alarm_layer_captures_errors_only() {
        let alarms = Arc::new(AlarmLog::default());
        let subscriber = tracing_subscriber::registry().with(AlarmLayer::new(alarms.clone()));

        tracing::subscriber::with_default(subscriber, || {
            info!(target: "dsp", "not an alarm");
            error!(target: "dsp", "Receive error: expected {} samples", 768);
        });

        let snapshot = alarms.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].contains("[dsp]"));
        assert!(snapshot[0].contains("expected 768 samples"));
    }
}
