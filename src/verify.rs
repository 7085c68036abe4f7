//! Source Verification Module
//!
//! Checks every configured source once against the live providers and
//! reports which are reachable and returning data that parses.
//!
//! Use this after changing endpoints or the backend host.

use crate::config::{Config, SourceSettings};
use crate::ingest::{backend, swpc};
use crate::model::FetchError;
use crate::sources::{self, Endpoint, SourceKind};
use crate::transport::{self, Fetcher, HttpFetcher, LineStream, HttpLineStream};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Verification Results
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub timestamp: String,
    pub results: Vec<SourceVerification>,
    pub summary: VerificationSummary,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationSummary {
    pub total: usize,
    pub working: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceVerification {
    pub label: String,
    pub name: String,
    pub url: String,
    pub status: VerificationStatus,
    pub reachable: bool,
    /// Payload size in bytes (lines for backend pages).
    pub payload_size: usize,
    pub sample_count: usize,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum VerificationStatus {
    Success,
    /// Reachable, but the payload did not parse.
    PartialSuccess,
    Failed,
}

// ============================================================================
// Single Source
// ============================================================================

/// Fetches one source once and parses the payload without touching any
/// history or cache state.
pub fn verify_source(
    config: &Config,
    settings: &SourceSettings,
    fetcher: &dyn Fetcher,
    stream: &mut dyn LineStream,
) -> SourceVerification {
    let name = sources::find_source(&settings.label)
        .map(|d| d.name)
        .unwrap_or_default();
    let url = match settings.endpoint {
        Endpoint::Swpc(path) => config.swpc_url(path),
        Endpoint::Backend(path) => config.backend_url(path),
    };

    let mut result = SourceVerification {
        label: settings.label.clone(),
        name: name.to_string(),
        url,
        status: VerificationStatus::Failed,
        reachable: false,
        payload_size: 0,
        sample_count: 0,
        error_message: None,
    };

    let mut hook = || {};
    let parsed: Result<usize, FetchError> = match settings.endpoint {
        Endpoint::Swpc(_) => match fetcher.fetch_text(&result.url, &mut hook) {
            Ok(body) => {
                result.reachable = true;
                result.payload_size = body.len();
                match swpc::parser_for(settings.kind) {
                    Some(parse) => parse(&body).map(|s| s.len()),
                    None => Err(FetchError::MalformedPayload(format!(
                        "no SWPC parser for {:?}",
                        settings.kind
                    ))),
                }
            }
            Err(e) => {
                result.error_message = Some(format!("request failed: {}", e));
                return result;
            }
        },
        Endpoint::Backend(path) => {
            let host = &config.service.backend_host;
            match transport::read_page(stream, host, config.service.backend_port, path, &mut hook) {
                Ok(lines) => {
                    result.reachable = true;
                    result.payload_size = lines.len();
                    match settings.kind {
                        SourceKind::Drap => backend::parse_drap_lines(&lines).map(|s| s.len()),
                        _ => backend::parse_noaa_scales(&lines).map(|_| 1),
                    }
                }
                Err(e) => {
                    result.error_message = Some(format!("request failed: {}", e));
                    return result;
                }
            }
        }
    };

    match parsed {
        Ok(count) if count > 0 => {
            result.sample_count = count;
            result.status = VerificationStatus::Success;
        }
        Ok(_) => {
            result.status = VerificationStatus::PartialSuccess;
            result.error_message = Some("payload parsed but held no samples".to_string());
        }
        Err(e) => {
            result.status = VerificationStatus::PartialSuccess;
            result.error_message = Some(format!("parse failed: {}", e));
        }
    }

    result
}

// ============================================================================
// Full Verification Runner
// ============================================================================

pub fn run_full_verification(config: &Config) -> Result<VerificationReport, FetchError> {
    let timeout = Duration::from_secs(config.service.timeout_secs);
    let fetcher = HttpFetcher::new(transport::USER_AGENT, timeout)?;

    let mut report = VerificationReport {
        timestamp: Utc::now().to_rfc3339(),
        results: Vec::new(),
        summary: VerificationSummary::default(),
    };

    println!("🔍 Verifying sources...");
    for settings in config.enabled_sources() {
        print!("  {} ... ", settings.label);
        let mut stream = HttpLineStream::new(timeout);
        let result = verify_source(config, settings, &fetcher, &mut stream);

        match result.status {
            VerificationStatus::Success => {
                println!("✓ OK ({} samples)", result.sample_count);
                report.summary.working += 1;
            }
            VerificationStatus::PartialSuccess => {
                println!(
                    "⚠ Reachable but unusable: {}",
                    result.error_message.as_deref().unwrap_or("Unknown")
                );
                report.summary.failed += 1;
            }
            VerificationStatus::Failed => {
                println!("✗ FAILED: {}", result.error_message.as_deref().unwrap_or("Unknown"));
                report.summary.failed += 1;
            }
        }

        report.summary.total += 1;
        report.results.push(result);
    }

    Ok(report)
}

pub fn print_summary(report: &VerificationReport) {
    println!("\n═══════════════════════════════════════════════════════════");
    println!("📊 VERIFICATION SUMMARY");
    println!("═══════════════════════════════════════════════════════════");
    println!();
    for r in &report.results {
        println!("{:<8} {:<28} {:?}", r.label, r.name, r.status);
    }
    println!();

    let success_rate = if report.summary.total > 0 {
        (report.summary.working as f64 / report.summary.total as f64) * 100.0
    } else {
        0.0
    };

    println!(
        "Overall Success Rate: {:.1}% ({}/{})",
        success_rate, report.summary.working, report.summary.total
    );
    println!("═══════════════════════════════════════════════════════════");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TransportError;
    use crate::transport::KeepAlive;

    struct Canned(Result<String, FetchError>);

    impl Fetcher for Canned {
        fn fetch_text(&self, _url: &str, _hook: &mut dyn KeepAlive) -> Result<String, FetchError> {
            self.0.clone()
        }
    }

    struct NoStream;

    impl LineStream for NoStream {
        fn connect(&mut self, _: &str, _: u16, _: &mut dyn KeepAlive) -> Result<(), FetchError> {
            Err(TransportError::Connect("refused".into()).into())
        }
        fn send_request(&mut self, _: &str, _: &str) -> Result<(), FetchError> {
            Ok(())
        }
        fn skip_response_header(&mut self, _: &mut dyn KeepAlive) -> Result<(), FetchError> {
            Ok(())
        }
        fn read_line(&mut self, _: &mut dyn KeepAlive) -> Result<Option<String>, FetchError> {
            Ok(None)
        }
        fn close(&mut self) {}
    }

    #[test]
    fn test_verify_swpc_success() {
        let config = Config::defaults().unwrap();
        let kp = config.source("KP").unwrap();
        let body = r#"[["time_tag","Kp"],["2026-01-31 09:00:00.000","2.33"]]"#;
        let result = verify_source(&config, kp, &Canned(Ok(body.to_string())), &mut NoStream);

        assert_eq!(result.status, VerificationStatus::Success);
        assert_eq!(result.sample_count, 1);
        assert!(result.url.ends_with("/products/noaa-planetary-k-index.json"));
    }

    #[test]
    fn test_verify_swpc_garbage_is_partial() {
        let config = Config::defaults().unwrap();
        let xray = config.source("XRAY").unwrap();
        let result = verify_source(&config, xray, &Canned(Ok("<html>".into())), &mut NoStream);
        assert!(result.reachable);
        assert_eq!(result.status, VerificationStatus::PartialSuccess);
    }

    #[test]
    fn test_verify_backend_unreachable() {
        let config = Config::defaults().unwrap();
        let drap = config.source("DRAP").unwrap();
        let result = verify_source(&config, drap, &Canned(Ok(String::new())), &mut NoStream);
        assert_eq!(result.status, VerificationStatus::Failed);
        assert!(!result.reachable);
        assert!(result.error_message.unwrap().contains("refused"));
    }

    #[test]
    fn test_report_serializes() {
        let report = VerificationReport {
            timestamp: "2026-01-31T12:00:00+00:00".into(),
            results: Vec::new(),
            summary: VerificationSummary::default(),
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"summary\""));
    }
}
