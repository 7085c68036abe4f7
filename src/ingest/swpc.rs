/// NOAA SWPC (Space Weather Prediction Center) feed adapters.
///
/// Each feed is fetched whole over HTTPS and reduced to timestamped samples
/// for the source's history buffer. Parsing is lenient about individual rows
/// (a row that does not parse is skipped) but a payload with the wrong overall
/// shape is a `MalformedPayload`.
///
/// Feeds: https://services.swpc.noaa.gov/

use crate::cache::SampleAdapter;
use crate::logging::{self, Channel};
use crate::model::{FetchError, Sample};
use crate::sources::SourceKind;
use crate::transport::{Fetcher, KeepAlive};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use std::rc::Rc;

/// Floor applied to X-ray flux before taking log10, in W/m2.
pub const XRAY_FLUX_FLOOR: f64 = 1e-9;

/// Long-wavelength GOES channel.
pub const XRAY_LONG_CHANNEL: &str = "0.1-0.8nm";

// ============================================================================
// Adapter
// ============================================================================

/// Parser from payload text to samples. Horizon filtering is left to the
/// history buffer.
pub type SwpcParser = fn(&str) -> Result<Vec<Sample>, FetchError>;

/// Parser for a source kind, `None` for kinds not served by SWPC.
pub fn parser_for(kind: SourceKind) -> Option<SwpcParser> {
    let parser: SwpcParser = match kind {
        SourceKind::SunspotNumber => parse_daily_solar_indices,
        SourceKind::PlanetaryKp => parse_kp_json,
        SourceKind::XRay => parse_xray_json,
        SourceKind::Aurora => parse_aurora_text,
        SourceKind::Drap | SourceKind::NoaaScales => return None,
    };
    Some(parser)
}

pub struct SwpcFeed {
    label: String,
    url: String,
    fetcher: Rc<dyn Fetcher>,
    parse: SwpcParser,
}

impl SwpcFeed {
    pub fn new(label: &str, url: &str, fetcher: Rc<dyn Fetcher>, parse: SwpcParser) -> Self {
        Self {
            label: label.to_string(),
            url: url.to_string(),
            fetcher,
            parse,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl SampleAdapter for SwpcFeed {
    fn label(&self) -> &str {
        &self.label
    }

    fn fetch_samples(
        &mut self,
        _now: DateTime<Utc>,
        hook: &mut dyn KeepAlive,
    ) -> Result<Vec<Sample>, FetchError> {
        logging::debug(Channel::Net, Some(&self.label), &format!("GET {}", self.url));
        let body = self.fetcher.fetch_text(&self.url, hook)?;
        hook.keep_alive();
        let samples = (self.parse)(&body)?;
        logging::debug(
            Channel::Feed,
            Some(&self.label),
            &format!("parsed {} sample(s) from {} bytes", samples.len(), body.len()),
        );
        Ok(samples)
    }
}

// ============================================================================
// Time Parsing
// ============================================================================

/// Parses the timestamp spellings SWPC products use, all UTC:
/// `2026-01-31 12:00:00.000`, `2026-01-31T12:00:00`, `2026-01-31T12:00:00Z`
/// and `2026-01-31_12:00`.
pub fn parse_swpc_time(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim().trim_end_matches('Z');
    const FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d_%H:%M",
    ];
    FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok())
        .map(|dt| dt.and_utc())
}

fn json_number(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ============================================================================
// Sunspot Number
// ============================================================================

/// `daily-solar-indices.txt`: header lines start with `:` or `#`, data lines
/// are `Y M D flux SSN ...`. Each SSN is stamped at 00:00 UTC of its day.
pub fn parse_daily_solar_indices(text: &str) -> Result<Vec<Sample>, FetchError> {
    let mut samples = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(':') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 5 {
            continue;
        }
        let parsed = (
            fields[0].parse::<i32>(),
            fields[1].parse::<u32>(),
            fields[2].parse::<u32>(),
            fields[4].parse::<f64>(),
        );
        if let (Ok(y), Ok(m), Ok(d), Ok(ssn)) = parsed {
            if let Some(day) = NaiveDate::from_ymd_opt(y, m, d).and_then(|d| d.and_hms_opt(0, 0, 0)) {
                // SWPC writes -1 for a missing value
                if ssn >= 0.0 {
                    samples.push(Sample::new(day.and_utc(), ssn));
                }
            }
        }
    }

    if samples.is_empty() {
        return Err(FetchError::MalformedPayload(
            "no sunspot rows in daily solar indices".into(),
        ));
    }
    Ok(samples)
}

// ============================================================================
// Planetary Kp
// ============================================================================

/// `noaa-planetary-k-index.json`. Accepts both published shapes: an array of
/// arrays whose first row is a header naming the columns, and an array of
/// objects with `time_tag` and `Kp` keys.
pub fn parse_kp_json(text: &str) -> Result<Vec<Sample>, FetchError> {
    let doc: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| FetchError::MalformedPayload(format!("Kp JSON: {}", e)))?;
    let rows = doc
        .as_array()
        .ok_or_else(|| FetchError::MalformedPayload("Kp JSON is not an array".into()))?;

    let mut samples = Vec::new();

    match rows.first() {
        Some(serde_json::Value::Array(header)) => {
            let column = |name: &str| {
                header
                    .iter()
                    .position(|h| h.as_str().is_some_and(|s| s.eq_ignore_ascii_case(name)))
            };
            let (Some(t_col), Some(kp_col)) = (column("time_tag"), column("kp")) else {
                return Err(FetchError::MalformedPayload("Kp JSON header lacks time_tag/Kp".into()));
            };
            for row in rows.iter().skip(1).filter_map(|r| r.as_array()) {
                let at = row.get(t_col).and_then(|v| v.as_str()).and_then(parse_swpc_time);
                let kp = row.get(kp_col).and_then(json_number);
                if let (Some(at), Some(kp)) = (at, kp) {
                    samples.push(Sample::new(at, kp));
                }
            }
        }
        Some(serde_json::Value::Object(_)) => {
            for row in rows.iter().filter_map(|r| r.as_object()) {
                let at = row.get("time_tag").and_then(|v| v.as_str()).and_then(parse_swpc_time);
                let kp = row.get("Kp").or_else(|| row.get("kp")).and_then(json_number);
                if let (Some(at), Some(kp)) = (at, kp) {
                    samples.push(Sample::new(at, kp));
                }
            }
        }
        Some(_) => {
            return Err(FetchError::MalformedPayload("Kp JSON rows are neither arrays nor objects".into()));
        }
        None => {}
    }

    Ok(samples)
}

// ============================================================================
// GOES X-ray
// ============================================================================

#[derive(Debug, Deserialize)]
struct XrayRow {
    time_tag: String,
    flux: Option<f64>,
    energy: String,
}

/// `xrays-1-day.json`: keeps the long channel only and converts flux to
/// log10, flooring non-positive flux at `XRAY_FLUX_FLOOR`.
pub fn parse_xray_json(text: &str) -> Result<Vec<Sample>, FetchError> {
    let rows: Vec<XrayRow> = serde_json::from_str(text)
        .map_err(|e| FetchError::MalformedPayload(format!("X-ray JSON: {}", e)))?;

    let samples = rows
        .iter()
        .filter(|r| r.energy == XRAY_LONG_CHANNEL)
        .filter_map(|r| {
            let at = parse_swpc_time(&r.time_tag)?;
            let flux = r.flux?.max(XRAY_FLUX_FLOOR);
            Some(Sample::new(at, flux.log10()))
        })
        .collect();

    Ok(samples)
}

// ============================================================================
// Aurora
// ============================================================================

/// `aurora-nowcast-hemi-power.txt`: `<obs time> <forecast time> <north> <south>`
/// with times as `YYYY-MM-DD_HH:MM`. Value is the larger hemisphere, stamped
/// at the observation time.
pub fn parse_aurora_text(text: &str) -> Result<Vec<Sample>, FetchError> {
    let mut samples = Vec::new();
    let mut data_lines = 0;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        data_lines += 1;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        let at = parse_swpc_time(fields[0]);
        let north = fields[2].parse::<f64>();
        let south = fields[3].parse::<f64>();
        if let (Some(at), Ok(n), Ok(s)) = (at, north, south) {
            samples.push(Sample::new(at, n.max(s)));
        }
    }

    if data_lines > 0 && samples.is_empty() {
        return Err(FetchError::MalformedPayload(
            "no parseable aurora rows".into(),
        ));
    }
    Ok(samples)
}
