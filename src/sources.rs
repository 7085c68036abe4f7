/// Built-in source registry.
///
/// Defines the canonical list of space-weather sources this service polls,
/// with their endpoints, cadence, history shape and default ranking
/// coefficients. This is the single source of truth for source labels; the
/// TOML configuration may override the tunables of an entry by label but
/// cannot invent new sources.

use crate::history::{HistoryConfig, MergePolicy};
use crate::rank::Coefficients;

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// NOAA Space Weather Prediction Center services host.
pub const SWPC_BASE_URL: &str = "https://services.swpc.noaa.gov";

/// Backend page carrying ranking coefficients.
pub const RANK_COEFFS_PAGE: &str = "/NOAASpaceWX/rank2_coeffs.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Path under `SWPC_BASE_URL`, fetched whole over HTTPS.
    Swpc(&'static str),
    /// Page on the backend host, read line by line.
    Backend(&'static str),
}

/// Which adapter parses a source's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    SunspotNumber,
    PlanetaryKp,
    XRay,
    Aurora,
    Drap,
    NoaaScales,
}

/// Shape of a source's history buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistorySpec {
    pub bucket_count: usize,
    pub bucket_secs: i64,
    pub merge_policy: MergePolicy,
    pub min_valid_fraction: f64,
    pub require_recent_secs: Option<i64>,
}

impl HistorySpec {
    pub fn to_config(self) -> HistoryConfig {
        HistoryConfig {
            bucket_count: self.bucket_count,
            bucket_secs: self.bucket_secs,
            merge_policy: self.merge_policy,
            min_valid_fraction: self.min_valid_fraction,
            require_recent_secs: self.require_recent_secs,
        }
    }
}

// ---------------------------------------------------------------------------
// Source metadata
// ---------------------------------------------------------------------------

pub struct SourceDefinition {
    /// Short label used in logs, config overrides and the rank file.
    pub label: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub kind: SourceKind,
    pub endpoint: Endpoint,
    pub refresh_secs: i64,
    pub backoff_secs: i64,
    /// `None` for sources that only report a latest value.
    pub history: Option<HistorySpec>,
    pub coefficients: Coefficients,
}

pub static SOURCE_REGISTRY: &[SourceDefinition] = &[
    SourceDefinition {
        label: "SSN",
        name: "Sunspot number",
        description: "Daily sunspot number from the SWPC daily solar indices, \
                      one bucket per day over the last month.",
        kind: SourceKind::SunspotNumber,
        endpoint: Endpoint::Swpc("/text/daily-solar-indices.txt"),
        refresh_secs: 3600,
        backoff_secs: 120,
        history: Some(HistorySpec {
            bucket_count: 31,
            bucket_secs: 86_400,
            merge_policy: MergePolicy::Latest,
            min_valid_fraction: 0.5,
            require_recent_secs: None,
        }),
        coefficients: Coefficients::new(0.0, 0.1, 0.0),
    },
    SourceDefinition {
        label: "KP",
        name: "Planetary Kp",
        description: "3-hourly planetary K index over the last week.",
        kind: SourceKind::PlanetaryKp,
        endpoint: Endpoint::Swpc("/products/noaa-planetary-k-index.json"),
        refresh_secs: 1800,
        backoff_secs: 120,
        history: Some(HistorySpec {
            bucket_count: 56,
            bucket_secs: 10_800,
            merge_policy: MergePolicy::Latest,
            min_valid_fraction: 0.5,
            require_recent_secs: None,
        }),
        coefficients: Coefficients::new(0.0, 10.0, 0.0),
    },
    SourceDefinition {
        label: "XRAY",
        name: "GOES X-ray flux",
        description: "Long-channel (0.1-0.8 nm) X-ray flux as log10 W/m2, strongest \
                      reading per 10 minutes over the last day.",
        kind: SourceKind::XRay,
        endpoint: Endpoint::Swpc("/json/goes/primary/xrays-1-day.json"),
        refresh_secs: 600,
        backoff_secs: 60,
        history: Some(HistorySpec {
            bucket_count: 144,
            bucket_secs: 600,
            merge_policy: MergePolicy::Max,
            min_valid_fraction: 0.5,
            require_recent_secs: Some(3600),
        }),
        coefficients: Coefficients::new(0.0, 20.0, 160.0),
    },
    SourceDefinition {
        label: "AURORA",
        name: "Aurora hemispheric power",
        description: "Larger of the north and south hemispheric power nowcasts, \
                      half-hourly over the last day.",
        kind: SourceKind::Aurora,
        endpoint: Endpoint::Swpc("/text/aurora-nowcast-hemi-power.txt"),
        refresh_secs: 3600,
        backoff_secs: 300,
        history: Some(HistorySpec {
            bucket_count: 48,
            bucket_secs: 1800,
            merge_policy: MergePolicy::Latest,
            min_valid_fraction: 0.1,
            require_recent_secs: None,
        }),
        coefficients: Coefficients::new(0.0, 1.0, 0.0),
    },
    SourceDefinition {
        label: "DRAP",
        name: "D-region absorption",
        description: "Highest D-region absorption frequency per 10 minutes from the \
                      backend DRAP statistics page.",
        kind: SourceKind::Drap,
        endpoint: Endpoint::Backend("/drap/stats.txt"),
        refresh_secs: 600,
        backoff_secs: 60,
        history: Some(HistorySpec {
            bucket_count: 144,
            bucket_secs: 600,
            merge_policy: MergePolicy::Max,
            min_valid_fraction: 0.9,
            require_recent_secs: Some(3600),
        }),
        coefficients: Coefficients::new(0.0, 2.0, 0.0),
    },
    SourceDefinition {
        label: "NOAASPW",
        name: "NOAA space weather scales",
        description: "Largest current or forecast R, S or G scale value.",
        kind: SourceKind::NoaaScales,
        endpoint: Endpoint::Backend("/NOAASpaceWX/noaaswx.txt"),
        refresh_secs: 3600,
        backoff_secs: 120,
        history: None,
        coefficients: Coefficients::new(0.0, 20.0, 0.0),
    },
];

/// Looks up a source by label. Returns `None` if not found.
pub fn find_source(label: &str) -> Option<&'static SourceDefinition> {
    SOURCE_REGISTRY.iter().find(|s| s.label == label)
}

pub fn all_labels() -> Vec<&'static str> {
    SOURCE_REGISTRY.iter().map(|s| s.label).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
