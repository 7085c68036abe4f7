/// Service configuration.
///
/// Three layers, later ones winning:
///
/// 1. Built-in defaults from `sources::SOURCE_REGISTRY`.
/// 2. An optional TOML file with a `[service]` table and `[[source]]` entries
///    that override the tunables of a built-in source by label.
/// 3. Environment variables (usually from `.env`): `HAMWX_CONFIG`,
///    `HAMWX_CACHE_DIR`, `HAMWX_LOG_LEVEL`, `HAMWX_LOG_FILE`.
///
/// ```toml
/// [service]
/// cache_dir = "/var/cache/hamwx"
/// exponential_backoff = true
///
/// [[source]]
/// label = "KP"
/// refresh_secs = 900
/// merge_policy = "max"
/// ```

use crate::cache::BackoffPolicy;
use crate::history::{HistoryConfig, MergePolicy};
use crate::logging::LogLevel;
use crate::model::ConfigError;
use crate::rank::{Coefficients, DEFAULT_MAX_FIELDS};
use crate::sources::{self, Endpoint, SourceKind, SOURCE_REGISTRY};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Upper bound on any configured interval or history span (ten years).
pub const MAX_INTERVAL_SECS: i64 = 10 * 366 * 86_400;

/// Upper bound on history buckets per source.
pub const MAX_BUCKETS: usize = 100_000;

// ============================================================================
// File Structures
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceSettings {
    /// Where history files and cached downloads live.
    pub cache_dir: PathBuf,
    /// Read-only directories searched for seed copies of cached files.
    pub bundle_dirs: Vec<PathBuf>,
    pub swpc_base_url: String,
    pub backend_host: String,
    pub backend_port: u16,
    pub timeout_secs: u64,
    /// Sleep between poll cycles of the main loop.
    pub poll_interval_secs: u64,
    /// Entries shown in the summary table.
    pub max_fields: usize,
    pub exponential_backoff: bool,
    pub max_backoff_secs: i64,
    /// How long a downloaded coefficient file is trusted.
    pub rank_coeffs_max_age_secs: i64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("cache"),
            bundle_dirs: vec![
                PathBuf::from("data"),
                PathBuf::from("/usr/local/share/hamwx"),
            ],
            swpc_base_url: sources::SWPC_BASE_URL.to_string(),
            backend_host: "clearskyinstitute.com".to_string(),
            backend_port: 80,
            timeout_secs: 15,
            poll_interval_secs: 5,
            max_fields: DEFAULT_MAX_FIELDS,
            exponential_backoff: false,
            max_backoff_secs: 900,
            rank_coeffs_max_age_secs: 86_400,
        }
    }
}

/// Overrides for one built-in source. Absent fields keep the default.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceOverride {
    pub label: String,
    pub enabled: Option<bool>,
    pub refresh_secs: Option<i64>,
    pub backoff_secs: Option<i64>,
    pub bucket_count: Option<usize>,
    pub bucket_secs: Option<i64>,
    pub min_valid_fraction: Option<f64>,
    pub require_recent_secs: Option<i64>,
    pub merge_policy: Option<MergePolicy>,
    pub coefficients: Option<Coefficients>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    service: ServiceSettings,
    #[serde(default, rename = "source")]
    sources: Vec<SourceOverride>,
}

// ============================================================================
// Resolved Configuration
// ============================================================================

/// Effective settings for one source after overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSettings {
    pub label: String,
    pub kind: SourceKind,
    pub endpoint: Endpoint,
    pub enabled: bool,
    pub backoff: BackoffPolicy,
    pub history: Option<HistoryConfig>,
    pub coefficients: Coefficients,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub service: ServiceSettings,
    pub sources: Vec<SourceSettings>,
}

impl Config {
    /// Built-in sources with default service settings.
    pub fn defaults() -> Result<Self, ConfigError> {
        Self::resolve(ServiceSettings::default(), &[])
    }

    fn resolve(service: ServiceSettings, overrides: &[SourceOverride]) -> Result<Self, ConfigError> {
        for o in overrides {
            if sources::find_source(&o.label).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "unknown source label '{}'",
                    o.label
                )));
            }
        }

        let resolved = SOURCE_REGISTRY
            .iter()
            .map(|def| {
                let o = overrides.iter().rev().find(|o| o.label == def.label);

                let refresh_secs = o.and_then(|o| o.refresh_secs).unwrap_or(def.refresh_secs);
                let backoff_secs = o.and_then(|o| o.backoff_secs).unwrap_or(def.backoff_secs);
                let mut backoff = BackoffPolicy::fixed(refresh_secs, backoff_secs);
                if service.exponential_backoff {
                    backoff = backoff.with_exponential(service.max_backoff_secs);
                }

                let history = def.history.map(|spec| {
                    let mut h = spec.to_config();
                    if let Some(o) = o {
                        h.bucket_count = o.bucket_count.unwrap_or(h.bucket_count);
                        h.bucket_secs = o.bucket_secs.unwrap_or(h.bucket_secs);
                        h.min_valid_fraction = o.min_valid_fraction.unwrap_or(h.min_valid_fraction);
                        h.merge_policy = o.merge_policy.unwrap_or(h.merge_policy);
                        if o.require_recent_secs.is_some() {
                            h.require_recent_secs = o.require_recent_secs;
                        }
                    }
                    h
                });

                SourceSettings {
                    label: def.label.to_string(),
                    kind: def.kind,
                    endpoint: def.endpoint,
                    enabled: o.and_then(|o| o.enabled).unwrap_or(true),
                    backoff,
                    history,
                    coefficients: o.and_then(|o| o.coefficients).unwrap_or(def.coefficients),
                }
            })
            .collect();

        let config = Self {
            service,
            sources: resolved,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile =
            toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::resolve(file.service, &file.sources)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Loads the file named by the environment, if any, and applies the
    /// environment overrides.
    pub fn from_env(env: &EnvSettings) -> Result<Self, ConfigError> {
        let mut config = match &env.config_path {
            Some(path) => Self::load(path)?,
            None => Self::defaults()?,
        };
        if let Some(dir) = &env.cache_dir {
            config.service.cache_dir = dir.clone();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.service;
        if s.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout_secs must be positive".into()));
        }
        if s.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid("poll_interval_secs must be positive".into()));
        }
        if s.max_fields == 0 {
            return Err(ConfigError::Invalid("max_fields must be positive".into()));
        }
        if s.backend_host.trim().is_empty() {
            return Err(ConfigError::Invalid("backend_host is empty".into()));
        }
        if s.max_backoff_secs <= 0 || s.max_backoff_secs > MAX_INTERVAL_SECS {
            return Err(ConfigError::Invalid(format!(
                "max_backoff_secs must be in 1..={}",
                MAX_INTERVAL_SECS
            )));
        }
        if s.rank_coeffs_max_age_secs <= 0 {
            return Err(ConfigError::Invalid("rank_coeffs_max_age_secs must be positive".into()));
        }
        if !s.swpc_base_url.starts_with("http://") && !s.swpc_base_url.starts_with("https://") {
            return Err(ConfigError::Invalid(format!(
                "swpc_base_url '{}' is not an http(s) URL",
                s.swpc_base_url
            )));
        }

        for src in &self.sources {
            let label = &src.label;
            let b = &src.backoff;
            if b.refresh_secs <= 0 || b.refresh_secs > MAX_INTERVAL_SECS {
                return Err(ConfigError::Invalid(format!(
                    "{}: refresh_secs {} outside 1..={}",
                    label, b.refresh_secs, MAX_INTERVAL_SECS
                )));
            }
            if b.backoff_secs <= 0 || b.backoff_secs >= b.refresh_secs {
                return Err(ConfigError::Invalid(format!(
                    "{}: backoff_secs must be positive and below refresh_secs ({} >= {})",
                    label, b.backoff_secs, b.refresh_secs
                )));
            }
            if let Some(h) = &src.history {
                if h.bucket_count == 0 || h.bucket_secs <= 0 {
                    return Err(ConfigError::Invalid(format!(
                        "{}: bucket_count and bucket_secs must be positive",
                        label
                    )));
                }
                if h.bucket_count > MAX_BUCKETS {
                    return Err(ConfigError::Invalid(format!(
                        "{}: bucket_count {} exceeds {}",
                        label, h.bucket_count, MAX_BUCKETS
                    )));
                }
                if !h.horizon_secs().is_some_and(|secs| secs <= MAX_INTERVAL_SECS) {
                    return Err(ConfigError::Invalid(format!(
                        "{}: history horizon of {} x {}s exceeds {}s",
                        label, h.bucket_count, h.bucket_secs, MAX_INTERVAL_SECS
                    )));
                }
                if !(0.0..=1.0).contains(&h.min_valid_fraction) {
                    return Err(ConfigError::Invalid(format!(
                        "{}: min_valid_fraction {} outside [0, 1]",
                        label, h.min_valid_fraction
                    )));
                }
                if h.require_recent_secs.is_some_and(|r| r <= 0 || r > MAX_INTERVAL_SECS) {
                    return Err(ConfigError::Invalid(format!(
                        "{}: require_recent_secs must be in 1..={}",
                        label, MAX_INTERVAL_SECS
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn source(&self, label: &str) -> Option<&SourceSettings> {
        self.sources.iter().find(|s| s.label == label)
    }

    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceSettings> {
        self.sources.iter().filter(|s| s.enabled)
    }

    /// Full URL of a path on the SWPC services host.
    pub fn swpc_url(&self, path: &str) -> String {
        format!("{}{}", self.service.swpc_base_url.trim_end_matches('/'), path)
    }

    /// Full URL of a page on the backend host.
    pub fn backend_url(&self, path: &str) -> String {
        format!(
            "http://{}:{}{}",
            self.service.backend_host, self.service.backend_port, path
        )
    }

    /// History file for a source.
    pub fn history_path(&self, label: &str) -> PathBuf {
        self.service
            .cache_dir
            .join(format!("{}-history.txt", label.to_ascii_lowercase()))
    }
}

// ============================================================================
// Environment
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct EnvSettings {
    pub config_path: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub log_level: LogLevel,
    pub log_file: Option<String>,
}

impl EnvSettings {
    /// Reads the process environment. Call `dotenv::dotenv()` first to pick
    /// up a `.env` file.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            config_path: non_empty("HAMWX_CONFIG").map(PathBuf::from),
            cache_dir: non_empty("HAMWX_CACHE_DIR").map(PathBuf::from),
            log_level: non_empty("HAMWX_LOG_LEVEL")
                .and_then(|v| LogLevel::parse(&v))
                .unwrap_or(LogLevel::Info),
            log_file: non_empty("HAMWX_LOG_FILE"),
        }
    }
}
