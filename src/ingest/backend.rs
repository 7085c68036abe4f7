/// Backend proxy page adapters.
///
/// These pages are plain HTTP text served by the dashboard backend and are
/// read line by line through a `LineStream`, yielding between lines.

use crate::cache::{Adapter, SampleAdapter};
use crate::logging::{self, Channel};
use crate::model::{FetchError, Sample};
use crate::transport::{read_page, KeepAlive, LineStream};
use chrono::{DateTime, Utc};

/// NOAA scale categories, in the order the page lists them.
pub const NOAA_SCALE_CATEGORIES: [char; 3] = ['R', 'S', 'G'];

/// One page on the backend host.
pub struct BackendPage {
    host: String,
    port: u16,
    path: String,
    stream: Box<dyn LineStream>,
}

impl BackendPage {
    pub fn new(host: &str, port: u16, path: &str, stream: Box<dyn LineStream>) -> Self {
        Self {
            host: host.to_string(),
            port,
            path: path.to_string(),
            stream,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn read(&mut self, label: &str, hook: &mut dyn KeepAlive) -> Result<Vec<String>, FetchError> {
        logging::debug(
            Channel::Net,
            Some(label),
            &format!("GET {}:{}{}", self.host, self.port, self.path),
        );
        let lines = read_page(self.stream.as_mut(), &self.host, self.port, &self.path, hook)?;
        logging::debug(Channel::Net, Some(label), &format!("read {} line(s)", lines.len()));
        Ok(lines)
    }
}

// ============================================================================
// DRAP
// ============================================================================

/// Parses `<utime> : <min> <max> <mean>` lines, keeping `max`. Any garbled
/// line rejects the whole page.
pub fn parse_drap_lines(lines: &[String]) -> Result<Vec<Sample>, FetchError> {
    let mut samples = Vec::with_capacity(lines.len());

    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        let garbled = || FetchError::MalformedPayload(format!("DRAP garbled: {}", line));

        let (time_part, stats_part) = line.split_once(':').ok_or_else(garbled)?;
        let utime: i64 = time_part.trim().parse().map_err(|_| garbled())?;
        let stats: Vec<f64> = stats_part
            .split_whitespace()
            .map(|f| f.parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|_| garbled())?;
        if stats.len() != 3 {
            return Err(garbled());
        }

        let sample = Sample::from_unix(utime, stats[1]).ok_or_else(garbled)?;
        samples.push(sample);
    }

    Ok(samples)
}

pub struct DrapAdapter {
    label: String,
    page: BackendPage,
}

impl DrapAdapter {
    pub fn new(label: &str, page: BackendPage) -> Self {
        Self {
            label: label.to_string(),
            page,
        }
    }
}

impl SampleAdapter for DrapAdapter {
    fn label(&self) -> &str {
        &self.label
    }

    fn fetch_samples(
        &mut self,
        _now: DateTime<Utc>,
        hook: &mut dyn KeepAlive,
    ) -> Result<Vec<Sample>, FetchError> {
        let lines = self.page.read(&self.label, hook)?;
        parse_drap_lines(&lines)
    }
}

// ============================================================================
// NOAA Scales
// ============================================================================

/// Parses the R, S and G lines (`R 0 0 1 0`) and returns the largest value
/// over all of them.
pub fn parse_noaa_scales(lines: &[String]) -> Result<f64, FetchError> {
    let mut data = lines.iter().map(|l| l.trim()).filter(|l| !l.is_empty());
    let mut max_value: Option<i64> = None;

    for category in NOAA_SCALE_CATEGORIES {
        let line = data
            .next()
            .ok_or_else(|| FetchError::MalformedPayload("NOAA scales: missing data".into()))?;

        let mut fields = line.split_whitespace();
        if fields.next() != Some(category.to_string().as_str()) {
            return Err(FetchError::MalformedPayload(format!(
                "NOAA scales: invalid class: {}",
                line
            )));
        }

        let values: Vec<i64> = fields
            .map(|f| f.parse::<i64>())
            .collect::<Result<_, _>>()
            .map_err(|_| FetchError::MalformedPayload(format!("NOAA scales: invalid line: {}", line)))?;
        if values.is_empty() {
            return Err(FetchError::MalformedPayload(format!(
                "NOAA scales: no values: {}",
                line
            )));
        }

        let line_max = values.iter().copied().max();
        max_value = max_value.max(line_max);
    }

    max_value
        .map(|v| v as f64)
        .ok_or_else(|| FetchError::MalformedPayload("NOAA scales: no values".into()))
}

pub struct NoaaScalesAdapter {
    label: String,
    page: BackendPage,
}

impl NoaaScalesAdapter {
    pub fn new(label: &str, page: BackendPage) -> Self {
        Self {
            label: label.to_string(),
            page,
        }
    }
}

impl Adapter for NoaaScalesAdapter {
    type Output = f64;

    fn label(&self) -> &str {
        &self.label
    }

    fn fetch(
        &mut self,
        _now: DateTime<Utc>,
        _query: Option<&str>,
        hook: &mut dyn KeepAlive,
    ) -> Result<f64, FetchError> {
        let lines = self.page.read(&self.label, hook)?;
        parse_noaa_scales(&lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TransportError;
    use std::collections::VecDeque;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    /// Serves canned body lines after a good header.
    struct CannedStream {
        lines: VecDeque<String>,
        header_ok: bool,
    }

    impl LineStream for CannedStream {
        fn connect(&mut self, _: &str, _: u16, _: &mut dyn KeepAlive) -> Result<(), FetchError> {
            Ok(())
        }
        fn send_request(&mut self, _: &str, _: &str) -> Result<(), FetchError> {
            Ok(())
        }
        fn skip_response_header(&mut self, _: &mut dyn KeepAlive) -> Result<(), FetchError> {
            if self.header_ok {
                Ok(())
            } else {
                Err(TransportError::HeaderShort.into())
            }
        }
        fn read_line(&mut self, hook: &mut dyn KeepAlive) -> Result<Option<String>, FetchError> {
            hook.keep_alive();
            Ok(self.lines.pop_front())
        }
        fn close(&mut self) {}
    }

    fn page(body: &str, header_ok: bool) -> BackendPage {
        let stream = CannedStream {
            lines: lines(body).into(),
            header_ok,
        };
        BackendPage::new("backend.test", 80, "/page.txt", Box::new(stream))
    }

    #[test]
    fn test_drap_keeps_max_column() {
        let samples = parse_drap_lines(&lines(
            "1769860800 : 0.0 7.5 1.2\n\n1769861400 : 0 12 2.5\n",
        ))
        .unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].value, 7.5);
        assert_eq!(samples[1].at.timestamp(), 1_769_861_400);
    }

    #[test]
    fn test_drap_garbled_line_rejects_page() {
        let err = parse_drap_lines(&lines("1769860800 : 0 7.5 1.2\n1769861400 0 12 2.5\n"))
            .unwrap_err();
        assert_eq!(
            err,
            FetchError::MalformedPayload("DRAP garbled: 1769861400 0 12 2.5".into())
        );
        assert!(parse_drap_lines(&lines("1769860800 : 0 7.5\n")).is_err());
    }

    #[test]
    fn test_noaa_scales_takes_max() {
        let value = parse_noaa_scales(&lines("R 0 1 0 0\nS 0 0 0 0\nG 2 3 1 0\n")).unwrap();
        assert_eq!(value, 3.0);
    }

    #[test]
    fn test_noaa_scales_rejects_wrong_order_and_short_page() {
        assert!(parse_noaa_scales(&lines("S 0 0 0 0\nR 0 0 0 0\nG 0 0 0 0\n")).is_err());
        assert!(parse_noaa_scales(&lines("R 0 0 0 0\nS 0 0 0 0\n")).is_err());
        assert!(parse_noaa_scales(&lines("R 0 x 0 0\nS 0 0 0 0\nG 0 0 0 0\n")).is_err());
    }

    #[test]
    fn test_noaa_adapter_reads_page() {
        let mut adapter = NoaaScalesAdapter::new("NOAASPW", page("R 1 1 1 1\nS 0 0 0 0\nG 4 2 1 1\n", true));
        let mut hook = || {};
        let value = adapter.fetch(Utc::now(), None, &mut hook).unwrap();
        assert_eq!(value, 4.0);
    }

    #[test]
    fn test_drap_adapter_propagates_short_header() {
        let mut adapter = DrapAdapter::new("DRAP", page("", false));
        let mut hook = || {};
        let result = adapter.fetch_samples(Utc::now(), &mut hook);
        assert_eq!(
            result,
            Err(FetchError::Transport(TransportError::HeaderShort))
        );
    }
}
