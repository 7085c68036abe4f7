/// Line reader for the backend proxy pages, built on `reqwest::blocking`.
///
/// The backend serves small text pages (DRAP stats, NOAA scales, rank
/// coefficients) that are consumed line by line as they arrive, yielding to
/// the display loop between lines.

use super::{KeepAlive, LineStream, DEFAULT_TIMEOUT_SECS, USER_AGENT};
use crate::model::{FetchError, TransportError};
use reqwest::blocking::{Client, Response};
use std::io::{BufRead, BufReader};
use std::time::Duration;

/// Lines longer than this are treated as a malformed payload.
const MAX_LINE_BYTES: usize = 8 * 1024;

pub struct HttpLineStream {
    timeout: Duration,
    user_agent: String,
    client: Option<Client>,
    base_url: Option<String>,
    response: Option<Response>,
    reader: Option<BufReader<Response>>,
}

impl HttpLineStream {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            user_agent: USER_AGENT.to_string(),
            client: None,
            base_url: None,
            response: None,
            reader: None,
        }
    }

    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = user_agent.to_string();
        self.client = None;
        self
    }

    fn client(&mut self) -> Result<&Client, FetchError> {
        if self.client.is_none() {
            let client = Client::builder()
                .timeout(self.timeout)
                .user_agent(self.user_agent.as_str())
                .build()
                .map_err(|e| TransportError::Connect(e.to_string()))?;
            self.client = Some(client);
        }
        self.client
            .as_ref()
            .ok_or_else(|| TransportError::Connect("client unavailable".to_string()).into())
    }

    fn next_raw_line(&mut self) -> Result<Option<String>, FetchError> {
        let reader = self
            .reader
            .as_mut()
            .ok_or(FetchError::Transport(TransportError::HeaderShort))?;
        let mut buf = String::new();
        let n = reader.read_line(&mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        if buf.len() > MAX_LINE_BYTES {
            return Err(FetchError::MalformedPayload(format!(
                "line of {} bytes exceeds {}",
                buf.len(),
                MAX_LINE_BYTES
            )));
        }
        let trimmed = buf.trim_end_matches(['\r', '\n']).to_string();
        Ok(Some(trimmed))
    }
}

impl Default for HttpLineStream {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }
}

impl LineStream for HttpLineStream {
    fn connect(
        &mut self,
        host: &str,
        port: u16,
        hook: &mut dyn KeepAlive,
    ) -> Result<(), FetchError> {
        hook.keep_alive();
        self.client()?;
        self.base_url = Some(format!("http://{}:{}", host, port));
        Ok(())
    }

    fn send_request(&mut self, _host: &str, path: &str) -> Result<(), FetchError> {
        let url = match &self.base_url {
            Some(base) => format!("{}{}", base, path),
            None => return Err(TransportError::Connect("not connected".to_string()).into()),
        };
        let response = self.client()?.get(&url).send().map_err(map_send_error)?;
        self.response = Some(response);
        Ok(())
    }

    fn skip_response_header(&mut self, hook: &mut dyn KeepAlive) -> Result<(), FetchError> {
        hook.keep_alive();

        let response = self
            .response
            .take()
            .ok_or(FetchError::Transport(TransportError::HeaderShort))?;
        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()).into());
        }
        self.reader = Some(BufReader::new(response));

        hook.keep_alive();
        Ok(())
    }

    fn read_line(&mut self, hook: &mut dyn KeepAlive) -> Result<Option<String>, FetchError> {
        let line = self.next_raw_line()?;
        hook.keep_alive();
        Ok(line)
    }

    fn close(&mut self) {
        self.response = None;
        self.reader = None;
        self.base_url = None;
    }
}

/// A response that never completed its header is reported as `HeaderShort`.
fn map_send_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string()).into()
    } else if e.is_connect() {
        TransportError::Connect(e.to_string()).into()
    } else {
        TransportError::HeaderShort.into()
    }
}
