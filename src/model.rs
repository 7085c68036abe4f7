/// Core data types for the space-weather feed cache.
///
/// This module defines the shared domain model imported by all other modules:
/// samples, plotted series points, consumer readings and the error taxonomy.
/// It contains no I/O.

use chrono::{DateTime, TimeZone, Utc};

// ---------------------------------------------------------------------------
// Sentinels
// ---------------------------------------------------------------------------

/// Value held by buckets that have never seen an observation.
///
/// Far outside the physical range of every index we plot, so it can never be
/// mistaken for a real zero.
pub const NO_DATA: f64 = -999_999.0;

// ---------------------------------------------------------------------------
// Sample types
// ---------------------------------------------------------------------------

/// One normalized observation produced by an adapter.
///
/// Always carries absolute time; ages are derived against a `now` only when
/// the sample is bucketed or plotted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub at: DateTime<Utc>,
    pub value: f64,
}

impl Sample {
    pub fn new(at: DateTime<Utc>, value: f64) -> Self {
        Self { at, value }
    }

    /// Builds a sample from unix seconds. Returns `None` for timestamps chrono
    /// cannot represent.
    pub fn from_unix(secs: i64, value: f64) -> Option<Self> {
        Utc.timestamp_opt(secs, 0).single().map(|at| Self { at, value })
    }
}

/// One point of a plotted series.
///
/// `age_hours` is zero or negative (hours before the read time). `valid` is
/// false for gap-filled and sentinel points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesPoint {
    pub age_hours: f64,
    pub value: f64,
    pub valid: bool,
}

/// What a history-backed source hands to its consumer after a refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSnapshot {
    pub points: Vec<SeriesPoint>,
    /// Newest observed value, the one shown in summary tables.
    pub latest: f64,
}

/// Sources whose value can be reduced to one number for ranking and summary
/// display.
pub trait Scalar {
    fn scalar(&self) -> f64;
}

impl Scalar for f64 {
    fn scalar(&self) -> f64 {
        *self
    }
}

impl Scalar for SeriesSnapshot {
    fn scalar(&self) -> f64 {
        self.latest
    }
}

// ---------------------------------------------------------------------------
// Consumer view
// ---------------------------------------------------------------------------

/// What a consumer receives from a retrieval: the last known value (possibly
/// stale), whether the latest attempt produced trustworthy data, and why not.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading<T> {
    pub value: Option<T>,
    pub ok: bool,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Network-level failures. All are recoverable.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The fetch exceeded its timeout.
    Timeout(String),
    /// Connection refused, DNS failure, TLS failure.
    Connect(String),
    /// Non-2xx HTTP response.
    Status(u16),
    /// The response header ended before a blank line was seen.
    HeaderShort,
    /// Local read/write failure while receiving the payload.
    Io(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Timeout(msg) => write!(f, "timeout: {}", msg),
            TransportError::Connect(msg) => write!(f, "connection failed: {}", msg),
            TransportError::Status(code) => write!(f, "HTTP error: {}", code),
            TransportError::HeaderShort => write!(f, "header short"),
            TransportError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

/// Errors that can arise during one fetch-and-parse cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchError {
    /// Transport failed; retried after backoff.
    Transport(TransportError),
    /// Payload arrived but did not match the expected shape.
    MalformedPayload(String),
    /// Payload parsed but carried too few usable points to trust.
    InsufficientData { have: usize, need: usize },
    /// A payload buffer could not be allocated. Never recovered from.
    ResourceExhausted(String),
}

impl FetchError {
    /// Whether this error must stop the process rather than be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FetchError::ResourceExhausted(_))
    }
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Transport(e) => write!(f, "Transport error: {}", e),
            FetchError::MalformedPayload(msg) => write!(f, "Parse error: {}", msg),
            FetchError::InsufficientData { have, need } => {
                write!(f, "Insufficient data: {} of {} required points", have, need)
            }
            FetchError::ResourceExhausted(msg) => write!(f, "Resource exhausted: {}", msg),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<TransportError> for FetchError {
    fn from(e: TransportError) -> Self {
        FetchError::Transport(e)
    }
}

impl From<std::io::Error> for FetchError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                FetchError::Transport(TransportError::Timeout(e.to_string()))
            }
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected => {
                FetchError::Transport(TransportError::Connect(e.to_string()))
            }
            std::io::ErrorKind::OutOfMemory => FetchError::ResourceExhausted(e.to_string()),
            _ => FetchError::Transport(TransportError::Io(e.to_string())),
        }
    }
}

/// A failure that leaves a source in a state that must not be served.
#[derive(Debug, Clone, PartialEq)]
pub struct FatalError {
    pub source_label: String,
    pub detail: String,
}

impl std::fmt::Display for FatalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fatal error in {}: {}", self.source_label, self.detail)
    }
}

impl std::error::Error for FatalError {}

/// Errors raised while loading or validating configuration files.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "config I/O error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "config parse error: {}", msg),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
