/// Structured logging for the feed cache service
///
/// Provides context-rich logging with channel and source labels,
/// timestamps, and severity levels. Supports both console output
/// and file-based logging for long-running dashboard operation.

use crate::model::{FetchError, TransportError};
use chrono::Utc;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl LogLevel {
    /// Parses the level names accepted in `.env` / TOML (`debug`, `info`,
    /// `warn`, `error`). Unknown names yield `None`.
    pub fn parse(name: &str) -> Option<LogLevel> {
        match name.trim().to_ascii_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warning),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// Which part of the service emitted a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Per-source fetch-and-parse cycles.
    Feed,
    /// Cache records and cached files.
    Cache,
    /// History buffers and their persistence.
    History,
    /// Composite ranking.
    Rank,
    /// Transport layer.
    Net,
    System,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Feed => write!(f, "FEED"),
            Channel::Cache => write!(f, "CACHE"),
            Channel::History => write!(f, "HIST"),
            Channel::Rank => write!(f, "RANK"),
            Channel::Net => write!(f, "NET"),
            Channel::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - the provider has not published enough data yet
    Expected,
    /// Unexpected failure - indicates a provider format change or service degradation
    Unexpected,
    /// Unknown - transient network trouble or an unclassified condition
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger Configuration
// ---------------------------------------------------------------------------

/// Global logger instance
static LOGGER: Mutex<Option<Logger>> = Mutex::new(None);

pub struct Logger {
    /// Minimum log level to display
    min_level: LogLevel,
    /// Optional file path for logging
    log_file: Option<String>,
    /// Whether to include timestamps in console output
    console_timestamps: bool,
}

impl Logger {
    /// Initialize the global logger
    pub fn init(min_level: LogLevel, log_file: Option<String>, console_timestamps: bool) {
        let logger = Logger {
            min_level,
            log_file,
            console_timestamps,
        };

        if let Ok(mut guard) = LOGGER.lock() {
            *guard = Some(logger);
        }
    }

    fn log(&self, level: LogLevel, channel: Channel, label: Option<&str>, message: &str) {
        if level < self.min_level {
            return;
        }

        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");

        let label_part = label.map(|s| format!(" [{}]", s)).unwrap_or_default();
        let log_entry = format!(
            "{} {} {}{}: {}",
            timestamp, level, channel, label_part, message
        );

        // Console output
        if self.console_timestamps {
            match level {
                LogLevel::Error => eprintln!("{}", log_entry),
                LogLevel::Warning => eprintln!("   {}", log_entry),
                LogLevel::Info => println!("   {}", log_entry),
                LogLevel::Debug => println!("   [DEBUG] {}", log_entry),
            }
        } else {
            match level {
                LogLevel::Error => eprintln!("   ✗ {}{}: {}", channel, label_part, message),
                LogLevel::Warning => eprintln!("   ⚠ {}{}: {}", channel, label_part, message),
                LogLevel::Info => println!("   {}{}: {}", channel, label_part, message),
                LogLevel::Debug => println!("   [DEBUG] {}{}: {}", channel, label_part, message),
            }
        }

        // File output
        if let Some(ref path) = self.log_file {
            if let Err(e) = Self::append_to_file(path, &log_entry) {
                eprintln!("Failed to write to log file {}: {}", path, e);
            }
        }
    }

    fn append_to_file(path: &str, entry: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", entry)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Initialize the global logger
pub fn init_logger(min_level: LogLevel, log_file: Option<&str>, console_timestamps: bool) {
    Logger::init(min_level, log_file.map(String::from), console_timestamps);
}

fn emit(level: LogLevel, channel: Channel, label: Option<&str>, message: &str) {
    if let Ok(guard) = LOGGER.lock() {
        if let Some(logger) = guard.as_ref() {
            logger.log(level, channel, label, message);
        }
    }
}

/// Log a general informational message
pub fn info(channel: Channel, label: Option<&str>, message: &str) {
    emit(LogLevel::Info, channel, label, message);
}

/// Log a warning message
pub fn warn(channel: Channel, label: Option<&str>, message: &str) {
    emit(LogLevel::Warning, channel, label, message);
}

/// Log an error message
pub fn error(channel: Channel, label: Option<&str>, message: &str) {
    emit(LogLevel::Error, channel, label, message);
}

/// Log a debug message
pub fn debug(channel: Channel, label: Option<&str>, message: &str) {
    emit(LogLevel::Debug, channel, label, message);
}

// ---------------------------------------------------------------------------
// Failure Classification Helpers
// ---------------------------------------------------------------------------

/// Classify a fetch failure by what it says about the provider.
pub fn classify_fetch_failure(err: &FetchError) -> FailureType {
    match err {
        // Providers publish sparse series around their own update boundaries;
        // the next retry usually succeeds.
        FetchError::InsufficientData { .. } => FailureType::Expected,
        // A payload we cannot parse usually means the provider changed format
        FetchError::MalformedPayload(_) => FailureType::Unexpected,
        FetchError::ResourceExhausted(_) => FailureType::Unexpected,
        FetchError::Transport(TransportError::Status(code)) if *code >= 400 => {
            FailureType::Unexpected
        }
        FetchError::Transport(_) => FailureType::Unknown,
    }
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Log a source fetch failure with automatic classification
pub fn log_fetch_failure(label: &str, operation: &str, err: &FetchError) {
    let failure_type = classify_fetch_failure(err);

    let message = format!("{} failed [{}]: {}", operation, failure_type, err);

    match failure_type {
        FailureType::Expected => info(Channel::Feed, Some(label), &message),
        FailureType::Unexpected => error(Channel::Feed, Some(label), &message),
        FailureType::Unknown => warn(Channel::Feed, Some(label), &message),
    }
}

// ---------------------------------------------------------------------------
// Poll Summary Logging
// ---------------------------------------------------------------------------

/// Log a summary of one poll cycle across all sources
pub fn log_poll_summary(attempted: usize, successful: usize, failed: usize) {
    if attempted == 0 {
        return;
    }

    let message = format!(
        "Poll complete: {}/{} refreshed, {} failed",
        successful, attempted, failed
    );

    if failed == 0 {
        info(Channel::System, None, &message);
    } else if successful == 0 {
        error(Channel::System, None, &message);
    } else {
        warn(Channel::System, None, &message);
    }
}
