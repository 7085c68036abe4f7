/// Bridges a sample-producing adapter into the retrieval policy.
///
/// `HistoryAdapter` owns the source's history buffer. Each fetch merges the
/// new batch, saves the buffer on success and hands the consumer a snapshot of
/// the gap-filled series plus its newest value.

use super::buffer::HistoryBuffer;
use super::persist;
use crate::cache::policy::{Adapter, SampleAdapter};
use crate::logging::{self, Channel};
use crate::model::{FetchError, SeriesSnapshot};
use crate::transport::KeepAlive;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

pub struct HistoryAdapter<S: SampleAdapter> {
    inner: S,
    buffer: HistoryBuffer,
    persist_path: Option<PathBuf>,
}

impl<S: SampleAdapter> HistoryAdapter<S> {
    pub fn new(inner: S, buffer: HistoryBuffer) -> Self {
        Self {
            inner,
            buffer,
            persist_path: None,
        }
    }

    /// Saves the buffer to `path` after every accepted merge.
    pub fn persist_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.persist_path = Some(path.into());
        self
    }

    pub fn buffer(&self) -> &HistoryBuffer {
        &self.buffer
    }

    pub fn persist_path(&self) -> Option<&Path> {
        self.persist_path.as_deref()
    }

    pub fn snapshot_at(&self, now: DateTime<Utc>) -> Option<SeriesSnapshot> {
        let latest = self.buffer.latest()?;
        Some(SeriesSnapshot {
            points: self.buffer.series_at(now),
            latest: latest.value,
        })
    }

    /// Seeds the buffer from the persist file. Returns the snapshot to seed
    /// the cache record with, if any bucket survived.
    pub fn load_at(&mut self, now: DateTime<Utc>) -> Option<SeriesSnapshot> {
        let path = self.persist_path.clone()?;
        let label = self.inner.label().to_string();

        match persist::load(&mut self.buffer, &path, now) {
            Ok(kept) => {
                logging::info(
                    Channel::History,
                    Some(&label),
                    &format!("loaded {} bucket(s) from {}", kept, path.display()),
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                logging::debug(Channel::History, Some(&label), "no saved history");
            }
            Err(e) => {
                logging::warn(
                    Channel::History,
                    Some(&label),
                    &format!("load {} failed: {}", path.display(), e),
                );
            }
        }

        if self.buffer.data_ok() {
            self.snapshot_at(now)
        } else {
            None
        }
    }

    fn save(&self) {
        let Some(path) = &self.persist_path else {
            return;
        };
        if let Err(e) = persist::save(&self.buffer, path) {
            logging::warn(
                Channel::History,
                Some(self.inner.label()),
                &format!("save {} failed: {}", path.display(), e),
            );
        }
    }
}

impl<S: SampleAdapter> Adapter for HistoryAdapter<S> {
    type Output = SeriesSnapshot;

    fn label(&self) -> &str {
        self.inner.label()
    }

    fn fetch(
        &mut self,
        now: DateTime<Utc>,
        _query: Option<&str>,
        hook: &mut dyn KeepAlive,
    ) -> Result<SeriesSnapshot, FetchError> {
        let samples = self.inner.fetch_samples(now, hook)?;
        hook.keep_alive();

        let received = self.buffer.try_merge(now, &samples)?;
        logging::debug(
            Channel::History,
            Some(self.inner.label()),
            &format!(
                "merged {} sample(s) into {}/{} bucket(s)",
                samples.len(),
                received,
                self.buffer.capacity()
            ),
        );

        self.save();

        self.snapshot_at(now).ok_or(FetchError::InsufficientData {
            have: 0,
            need: 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::buffer::{HistoryConfig, MergePolicy};
    use crate::model::{Sample, NO_DATA};
    use chrono::{Duration, TimeZone};

    struct FixedSamples(Vec<Sample>);

    impl SampleAdapter for FixedSamples {
        fn label(&self) -> &str {
            "FIXED"
        }

        fn fetch_samples(
            &mut self,
            _now: DateTime<Utc>,
            _hook: &mut dyn KeepAlive,
        ) -> Result<Vec<Sample>, FetchError> {
            Ok(self.0.clone())
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 31, 12, 0, 0).unwrap()
    }

    fn buffer(fraction: f64) -> HistoryBuffer {
        HistoryBuffer::new(HistoryConfig {
            bucket_count: 4,
            bucket_secs: 3600,
            merge_policy: MergePolicy::Max,
            min_valid_fraction: fraction,
            require_recent_secs: None,
        })
    }

    #[test]
    fn test_fetch_merges_saves_and_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixed.txt");
        let samples = vec![
            Sample::new(now() - Duration::seconds(100), 3.0),
            Sample::new(now() - Duration::seconds(2 * 3600 + 100), 1.0),
        ];
        let mut adapter = HistoryAdapter::new(FixedSamples(samples), buffer(0.5)).persist_to(&path);
        let mut hook = || {};

        let snap = adapter.fetch(now(), None, &mut hook).unwrap();

        assert_eq!(snap.latest, 3.0);
        let values: Vec<f64> = snap.points.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![NO_DATA, 1.0, 1.0, 3.0]);
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);
    }

    #[test]
    fn test_sparse_batch_is_insufficient_and_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixed.txt");
        let samples = vec![Sample::new(now() - Duration::seconds(100), 3.0)];
        let mut adapter = HistoryAdapter::new(FixedSamples(samples), buffer(0.5)).persist_to(&path);
        let mut hook = || {};

        let result = adapter.fetch(now(), None, &mut hook);

        assert_eq!(result, Err(FetchError::InsufficientData { have: 1, need: 2 }));
        assert!(!path.exists());
    }

    #[test]
    fn test_load_seeds_snapshot_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixed.txt");
        let ts = (now() - Duration::seconds(1800)).timestamp();
        std::fs::write(&path, format!("{} 6.5\n", ts)).unwrap();

        let mut adapter = HistoryAdapter::new(FixedSamples(vec![]), buffer(0.5)).persist_to(&path);
        let snap = adapter.load_at(now()).expect("one bucket survives");

        assert_eq!(snap.latest, 6.5);
        assert!(adapter.buffer().data_ok());
    }
}
