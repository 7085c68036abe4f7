/// Disk persistence for history buffers.
///
/// One plain-text file per source, one line per retained observation:
///
/// ```text
/// <unix_timestamp> <value>
/// ```
///
/// No header. Files are written to a temporary name and renamed into place so
/// a reader never sees a half-written file. The loader skips blank and
/// malformed lines and re-bases everything against the load time.

use super::buffer::HistoryBuffer;
use crate::logging::{self, Channel};
use crate::model::Sample;
use chrono::{DateTime, Utc};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Writes every retained observation of `buffer` to `path`.
pub fn save(buffer: &HistoryBuffer, path: &Path) -> io::Result<usize> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let observations = buffer.observations();
    let mut text = String::with_capacity(observations.len() * 24);
    for s in &observations {
        text.push_str(&format!("{} {}\n", s.at.timestamp(), s.value));
    }

    let tmp = temp_path(path);
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(text.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(observations.len())
}

/// Parses one history line, `None` if it is blank or malformed.
pub fn parse_line(line: &str) -> Option<Sample> {
    let mut fields = line.split_whitespace();
    let ts: i64 = fields.next()?.parse().ok()?;
    let value: f64 = fields.next()?.parse().ok()?;
    if fields.next().is_some() || !value.is_finite() {
        return None;
    }
    Sample::from_unix(ts, value)
}

/// Replaces the contents of `buffer` with the observations in `path` that are
/// still inside the horizon at `now`.
///
/// Returns how many buckets survived; the buffer's `data_ok` is set iff at
/// least one did.
pub fn load(buffer: &mut HistoryBuffer, path: &Path, now: DateTime<Utc>) -> io::Result<usize> {
    let text = fs::read_to_string(path)?;

    let mut samples = Vec::new();
    let mut skipped = 0;
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(line) {
            Some(s) => samples.push(s),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        logging::debug(
            Channel::History,
            None,
            &format!("{}: skipped {} malformed line(s)", path.display(), skipped),
        );
    }

    Ok(buffer.restore(now, &samples))
}
