/// Transport collaborators used by the per-source adapters.
///
/// Adapters never talk to the network directly; they go through one of two
/// narrow interfaces so tests can substitute canned payloads:
///
/// - `Fetcher`: whole-document fetches (HTTPS feeds), implemented by
///   `http::HttpFetcher` on top of `reqwest::blocking`.
/// - `LineStream`: a line-oriented read of a live connection, implemented by
///   `stream::HttpLineStream` for the backend proxy pages.
///
/// Every blocking step invokes a `KeepAlive` hook so a single-threaded
/// display loop can stay responsive while a fetch is in progress.

pub mod http;
pub mod stream;

use crate::model::FetchError;
use std::path::Path;

pub use http::HttpFetcher;
pub use stream::HttpLineStream;

/// User agent sent with every request.
pub const USER_AGENT: &str = concat!("hamwx_service/", env!("CARGO_PKG_VERSION"));

/// Default per-fetch timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

// ---------------------------------------------------------------------------
// Cooperative yield
// ---------------------------------------------------------------------------

/// Callback invoked at every suspension point of a fetch: connect, header
/// skip, and each line or chunk read.
pub trait KeepAlive {
    fn keep_alive(&mut self);
}

impl<F: FnMut()> KeepAlive for F {
    fn keep_alive(&mut self) {
        self()
    }
}

// ---------------------------------------------------------------------------
// Whole-document fetches
// ---------------------------------------------------------------------------

pub trait Fetcher {
    /// Fetches `url` and returns its body as text.
    fn fetch_text(&self, url: &str, hook: &mut dyn KeepAlive) -> Result<String, FetchError>;

    /// Fetches `url` into `dest`, returning the number of bytes written.
    ///
    /// `dest` is overwritten; callers that need atomic replacement write to a
    /// temporary name and rename.
    fn fetch_to_file(
        &self,
        url: &str,
        dest: &Path,
        hook: &mut dyn KeepAlive,
    ) -> Result<u64, FetchError> {
        let body = self.fetch_text(url, hook)?;
        std::fs::write(dest, body.as_bytes())?;
        Ok(body.len() as u64)
    }
}

// ---------------------------------------------------------------------------
// Streamed line reads
// ---------------------------------------------------------------------------

/// A line-at-a-time HTTP exchange with a backend host.
pub trait LineStream {
    fn connect(&mut self, host: &str, port: u16, hook: &mut dyn KeepAlive)
        -> Result<(), FetchError>;

    fn send_request(&mut self, host: &str, path: &str) -> Result<(), FetchError>;

    /// Consumes the status line and headers. Fails on a non-2xx status or if
    /// the connection closes before the blank line ending the header.
    fn skip_response_header(&mut self, hook: &mut dyn KeepAlive) -> Result<(), FetchError>;

    /// Next body line without its terminator, or `None` at end of stream.
    fn read_line(&mut self, hook: &mut dyn KeepAlive) -> Result<Option<String>, FetchError>;

    fn close(&mut self);
}

/// Runs a full GET against `host:port/path` and collects the body lines.
pub fn read_page(
    stream: &mut dyn LineStream,
    host: &str,
    port: u16,
    path: &str,
    hook: &mut dyn KeepAlive,
) -> Result<Vec<String>, FetchError> {
    let result = (|| -> Result<Vec<String>, FetchError> {
        stream.connect(host, port, hook)?;
        stream.send_request(host, path)?;
        stream.skip_response_header(hook)?;

        let mut lines = Vec::new();
        while let Some(line) = stream.read_line(hook)? {
            lines.push(line);
        }
        Ok(lines)
    })();

    stream.close();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TransportError;
    use std::collections::VecDeque;

    /// Replays canned lines; records how the stream was driven.
    struct ScriptedStream {
        header_ok: bool,
        lines: VecDeque<String>,
        closed: bool,
    }

    impl LineStream for ScriptedStream {
        fn connect(&mut self, _: &str, _: u16, hook: &mut dyn KeepAlive) -> Result<(), FetchError> {
            hook.keep_alive();
            Ok(())
        }
        fn send_request(&mut self, _: &str, _: &str) -> Result<(), FetchError> {
            Ok(())
        }
        fn skip_response_header(&mut self, hook: &mut dyn KeepAlive) -> Result<(), FetchError> {
            hook.keep_alive();
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
        fn close(&mut self) {
            self.closed = true;
        }
    }

    #[test]
    fn test_read_page_collects_lines_and_yields_at_each_step() {
        let mut stream = ScriptedStream {
            header_ok: true,
            lines: VecDeque::from(vec!["a".to_string(), "b".to_string()]),
            closed: false,
        };
        let mut yields = 0;
        let mut hook = || yields += 1;

        let lines = read_page(&mut stream, "backend", 80, "/x.txt", &mut hook)
            .expect("scripted page should read");

        assert_eq!(lines, vec!["a", "b"]);
        // connect + header + two lines + end-of-stream read
        assert_eq!(yields, 5);
        assert!(stream.closed);
    }

    #[test]
    fn test_read_page_closes_stream_on_short_header() {
        let mut stream = ScriptedStream {
            header_ok: false,
            lines: VecDeque::new(),
            closed: false,
        };
        let mut hook = || {};

        let result = read_page(&mut stream, "backend", 80, "/x.txt", &mut hook);

        assert_eq!(
            result,
            Err(FetchError::Transport(TransportError::HeaderShort))
        );
        assert!(stream.closed, "stream must be closed even when the header fails");
    }
}
