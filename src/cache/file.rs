/// Age- and size-checked local copies of remote text files.
///
/// `open_cached` returns a path to a local copy of `url` that is at least
/// `min_size` bytes. A copy younger than `max_age_secs` is used as-is. A
/// missing copy is first seeded from the bundle directories shipped with the
/// service. Otherwise the file is downloaded to `x.<name>` and only renamed
/// over the real name once it passes the size check, so a failed or truncated
/// download never clobbers a usable copy. If the download fails, an old but
/// large-enough copy is still returned.

use crate::logging::{self, Channel};
use crate::model::FetchError;
use crate::transport::{Fetcher, KeepAlive};
use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Disables the age checks of `open_cached` and `clean_cache`.
pub const CACHE_FOREVER: i64 = i64::MAX;

/// Prefix of in-progress downloads.
pub const TEMP_PREFIX: &str = "x.";

pub struct CachedFileStore {
    dir: PathBuf,
    bundle_dirs: Vec<PathBuf>,
}

impl CachedFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            bundle_dirs: Vec::new(),
        }
    }

    pub fn with_bundle_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.bundle_dirs = dirs;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn open_cached_at(
        &self,
        fetcher: &dyn Fetcher,
        name: &str,
        url: &str,
        max_age_secs: i64,
        min_size: u64,
        now: DateTime<Utc>,
        hook: &mut dyn KeepAlive,
    ) -> Result<PathBuf, FetchError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(name);

        if !path.exists() {
            self.seed_from_bundle(name, &path);
        }

        let local = file_stat(&path);
        if let Some((size, mtime)) = local {
            let age = (now - mtime).num_seconds();
            if size >= min_size && (max_age_secs == CACHE_FOREVER || age < max_age_secs) {
                logging::debug(
                    Channel::Cache,
                    Some(name),
                    &format!("using local copy, {} bytes, {}s old", size, age),
                );
                return Ok(path);
            }
        }

        let tmp = self.path_for(&format!("{}{}", TEMP_PREFIX, name));
        let downloaded = fetcher
            .fetch_to_file(url, &tmp, hook)
            .and_then(|n| {
                if n >= min_size {
                    Ok(n)
                } else {
                    Err(FetchError::MalformedPayload(format!(
                        "{} is only {} bytes, need {}",
                        url, n, min_size
                    )))
                }
            });

        match downloaded {
            Ok(n) => {
                fs::rename(&tmp, &path)?;
                logging::info(
                    Channel::Cache,
                    Some(name),
                    &format!("installed fresh copy, {} bytes", n),
                );
                Ok(path)
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                if e.is_fatal() {
                    return Err(e);
                }
                match local {
                    Some((size, _)) if size >= min_size => {
                        logging::warn(
                            Channel::Cache,
                            Some(name),
                            &format!("download failed, using older copy: {}", e),
                        );
                        Ok(path)
                    }
                    _ => Err(e),
                }
            }
        }
    }

    /// Convenience wrapper that uses the real current time.
    pub fn open_cached(
        &self,
        fetcher: &dyn Fetcher,
        name: &str,
        url: &str,
        max_age_secs: i64,
        min_size: u64,
        hook: &mut dyn KeepAlive,
    ) -> Result<PathBuf, FetchError> {
        self.open_cached_at(fetcher, name, url, max_age_secs, min_size, Utc::now(), hook)
    }

    fn seed_from_bundle(&self, name: &str, dest: &Path) {
        for dir in &self.bundle_dirs {
            let candidate = dir.join(name);
            if candidate.is_file() {
                match fs::copy(&candidate, dest) {
                    Ok(_) => {
                        logging::info(
                            Channel::Cache,
                            Some(name),
                            &format!("seeded from {}", candidate.display()),
                        );
                        return;
                    }
                    Err(e) => logging::warn(
                        Channel::Cache,
                        Some(name),
                        &format!("seed from {} failed: {}", candidate.display(), e),
                    ),
                }
            }
        }
    }

    /// Removes files whose name contains `contains` and that are older than
    /// `max_age_secs`. Returns how many were removed.
    pub fn clean_cache_at(
        &self,
        contains: &str,
        max_age_secs: i64,
        now: DateTime<Utc>,
    ) -> io::Result<usize> {
        if max_age_secs == CACHE_FOREVER || !self.dir.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if !name.to_string_lossy().contains(contains) {
                continue;
            }
            let path = entry.path();
            if let Some((_, mtime)) = file_stat(&path) {
                if (now - mtime).num_seconds() > max_age_secs {
                    fs::remove_file(&path)?;
                    logging::debug(
                        Channel::Cache,
                        None,
                        &format!("removed {}", path.display()),
                    );
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Convenience wrapper that uses the real current time.
    pub fn clean_cache(&self, contains: &str, max_age_secs: i64) -> io::Result<usize> {
        self.clean_cache_at(contains, max_age_secs, Utc::now())
    }
}

/// Size and modification time of a regular file.
fn file_stat(path: &Path) -> Option<(u64, DateTime<Utc>)> {
    let meta = fs::metadata(path).ok()?;
    if !meta.is_file() {
        return None;
    }
    let mtime = meta.modified().ok()?;
    Some((meta.len(), DateTime::<Utc>::from(mtime)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TransportError;
    use chrono::Duration;
    use std::cell::Cell;

    /// Serves a fixed body, or fails, and counts calls.
    struct CannedFetcher {
        body: Option<&'static str>,
        calls: Cell<usize>,
    }

    impl Fetcher for CannedFetcher {
        fn fetch_text(&self, _url: &str, _hook: &mut dyn KeepAlive) -> Result<String, FetchError> {
            self.calls.set(self.calls.get() + 1);
            self.body
                .map(str::to_string)
                .ok_or(FetchError::Transport(TransportError::Status(503)))
        }
    }

    fn serving(body: &'static str) -> CannedFetcher {
        CannedFetcher {
            body: Some(body),
            calls: Cell::new(0),
        }
    }

    fn failing() -> CannedFetcher {
        CannedFetcher {
            body: None,
            calls: Cell::new(0),
        }
    }

    #[test]
    fn test_young_local_copy_skips_download() {
        let dir = tempfile::tempdir().unwrap();
        let store = CachedFileStore::new(dir.path());
        fs::write(store.path_for("rank.txt"), "SSN 0 1 0\n").unwrap();
        let fetcher = serving("new contents\n");
        let mut hook = || {};

        let path = store
            .open_cached_at(&fetcher, "rank.txt", "http://x", 3600, 5, Utc::now(), &mut hook)
            .unwrap();

        assert_eq!(fetcher.calls.get(), 0);
        assert_eq!(fs::read_to_string(path).unwrap(), "SSN 0 1 0\n");
    }

    #[test]
    fn test_old_copy_is_replaced_by_download() {
        let dir = tempfile::tempdir().unwrap();
        let store = CachedFileStore::new(dir.path());
        fs::write(store.path_for("rank.txt"), "old old old\n").unwrap();
        let fetcher = serving("fresh contents\n");
        let mut hook = || {};
        let later = Utc::now() + Duration::seconds(7200);

        let path = store
            .open_cached_at(&fetcher, "rank.txt", "http://x", 3600, 5, later, &mut hook)
            .unwrap();

        assert_eq!(fetcher.calls.get(), 1);
        assert_eq!(fs::read_to_string(path).unwrap(), "fresh contents\n");
        assert!(!store.path_for("x.rank.txt").exists());
    }

    #[test]
    fn test_too_old_copy_is_tolerated_when_download_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = CachedFileStore::new(dir.path());
        fs::write(store.path_for("rank.txt"), "old but usable\n").unwrap();
        let mut hook = || {};
        let later = Utc::now() + Duration::seconds(7200);

        let path = store
            .open_cached_at(&failing(), "rank.txt", "http://x", 3600, 5, later, &mut hook)
            .unwrap();

        assert_eq!(fs::read_to_string(path).unwrap(), "old but usable\n");
    }

    #[test]
    fn test_short_download_does_not_clobber_existing_copy() {
        let dir = tempfile::tempdir().unwrap();
        let store = CachedFileStore::new(dir.path());
        fs::write(store.path_for("rank.txt"), "complete file\n").unwrap();
        let mut hook = || {};
        let later = Utc::now() + Duration::seconds(7200);

        let path = store
            .open_cached_at(&serving("x"), "rank.txt", "http://x", 3600, 5, later, &mut hook)
            .unwrap();

        assert_eq!(fs::read_to_string(path).unwrap(), "complete file\n");
    }

    #[test]
    fn test_missing_copy_and_failed_download_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CachedFileStore::new(dir.path());
        let mut hook = || {};

        let result = store.open_cached_at(&failing(), "rank.txt", "http://x", 3600, 5, Utc::now(), &mut hook);

        assert_eq!(
            result,
            Err(FetchError::Transport(TransportError::Status(503)))
        );
    }

    #[test]
    fn test_missing_copy_is_seeded_from_bundle() {
        let cache = tempfile::tempdir().unwrap();
        let bundle = tempfile::tempdir().unwrap();
        fs::write(bundle.path().join("rank.txt"), "bundled coefficients\n").unwrap();
        let store = CachedFileStore::new(cache.path()).with_bundle_dirs(vec![bundle.path().to_path_buf()]);
        let fetcher = serving("network copy\n");
        let mut hook = || {};

        let path = store
            .open_cached_at(&fetcher, "rank.txt", "http://x", CACHE_FOREVER, 5, Utc::now(), &mut hook)
            .unwrap();

        assert_eq!(fetcher.calls.get(), 0);
        assert_eq!(fs::read_to_string(path).unwrap(), "bundled coefficients\n");
    }

    #[test]
    fn test_clean_cache_removes_only_old_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = CachedFileStore::new(dir.path());
        fs::write(store.path_for("x.kp.json"), "partial").unwrap();
        fs::write(store.path_for("kp.json"), "complete").unwrap();

        let now = Utc::now();
        assert_eq!(store.clean_cache_at("x.", 3600, now).unwrap(), 0);
        assert_eq!(
            store
                .clean_cache_at("x.", 3600, now + Duration::seconds(7200))
                .unwrap(),
            1
        );
        assert!(!store.path_for("x.kp.json").exists());
        assert!(store.path_for("kp.json").exists());
        assert_eq!(
            store
                .clean_cache_at("kp", CACHE_FOREVER, now + Duration::days(365))
                .unwrap(),
            0
        );
    }
}
