/// HTTPS transport built on `reqwest::blocking`.
///
/// Every request carries the service user agent and a short timeout so a
/// hung provider cannot stall the display loop for long.

use super::{Fetcher, KeepAlive, DEFAULT_TIMEOUT_SECS, USER_AGENT};
use crate::model::{FetchError, TransportError};
use std::io::Read;
use std::path::Path;
use std::time::Duration;

/// Largest payload accepted from any provider. The one-day GOES X-ray JSON is
/// well under a megabyte.
pub const MAX_PAYLOAD_BYTES: usize = 4 * 1024 * 1024;

pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    max_payload_bytes: usize,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| FetchError::Transport(TransportError::Connect(e.to_string())))?;

        Ok(Self {
            client,
            max_payload_bytes: MAX_PAYLOAD_BYTES,
        })
    }

    /// Client with the service user agent and default timeout.
    pub fn with_defaults() -> Result<Self, FetchError> {
        Self::new(USER_AGENT, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_max_payload(mut self, max_payload_bytes: usize) -> Self {
        self.max_payload_bytes = max_payload_bytes;
        self
    }

    fn fetch_bytes(&self, url: &str, hook: &mut dyn KeepAlive) -> Result<Vec<u8>, FetchError> {
        hook.keep_alive();

        let response = self.client.get(url).send().map_err(map_reqwest_error)?;

        hook.keep_alive();

        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()).into());
        }

        let expected = response.content_length().unwrap_or(0) as usize;
        if expected > self.max_payload_bytes {
            return Err(FetchError::MalformedPayload(format!(
                "payload of {} bytes exceeds limit of {}",
                expected, self.max_payload_bytes
            )));
        }

        let mut body = Vec::new();
        body.try_reserve(expected)
            .map_err(|e| FetchError::ResourceExhausted(format!("{} byte payload: {}", expected, e)))?;

        let limit = self.max_payload_bytes as u64 + 1;
        response
            .take(limit)
            .read_to_end(&mut body)
            .map_err(FetchError::from)?;

        if body.len() > self.max_payload_bytes {
            return Err(FetchError::MalformedPayload(format!(
                "payload exceeds limit of {} bytes",
                self.max_payload_bytes
            )));
        }

        hook.keep_alive();
        Ok(body)
    }
}

impl Fetcher for HttpFetcher {
    fn fetch_text(&self, url: &str, hook: &mut dyn KeepAlive) -> Result<String, FetchError> {
        let body = self.fetch_bytes(url, hook)?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    fn fetch_to_file(
        &self,
        url: &str,
        dest: &Path,
        hook: &mut dyn KeepAlive,
    ) -> Result<u64, FetchError> {
        let body = self.fetch_bytes(url, hook)?;
        std::fs::write(dest, &body)?;
        Ok(body.len() as u64)
    }
}

fn map_reqwest_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string()).into()
    } else if let Some(status) = e.status() {
        TransportError::Status(status.as_u16()).into()
    } else {
        TransportError::Connect(e.to_string()).into()
    }
}
