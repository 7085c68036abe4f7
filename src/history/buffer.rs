/// Fixed-capacity, time-bucketed history of one source.
///
/// The buffer covers `bucket_count` buckets of `bucket_secs` each, ending at
/// the `now` of the latest merge or append. Bucket position 0 is the oldest
/// and position `bucket_count - 1` holds the newest interval. An incoming
/// sample lands in the position for
///
/// ```text
/// k = floor((now - t) / bucket_secs)    position = bucket_count - 1 - k
/// ```
///
/// and is dropped unless `0 <= k < bucket_count`.
///
/// # Re-basing
/// Each retained bucket remembers the absolute time of the observation it
/// holds. Every merge, append and read places those observations against the
/// new `now`, so bucket ages never drift as wall-clock time passes and
/// anything that has aged past the horizon falls out.
///
/// # Gaps
/// Empty positions are filled forward from the nearest older observation.
/// Positions with nothing older hold `NO_DATA`. Filled positions are reported
/// with `valid == false`.

use crate::model::{FetchError, Sample, SeriesPoint, NO_DATA};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How samples that fall in the same bucket are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergePolicy {
    /// Keep the largest value; ties go to the later sample.
    Max,
    /// Keep the sample with the latest timestamp; ties go to the larger value.
    Latest,
    /// Arithmetic mean of every sample in the bucket.
    Average,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryConfig {
    pub bucket_count: usize,
    pub bucket_secs: i64,
    pub merge_policy: MergePolicy,
    /// Fraction of buckets a batch must populate for the merge to be accepted.
    pub min_valid_fraction: f64,
    /// If set, the newest sample of a batch must be at most this old.
    pub require_recent_secs: Option<i64>,
}

impl HistoryConfig {
    /// Span covered by the buffer. `None` if it does not fit in an `i64`.
    pub fn horizon_secs(&self) -> Option<i64> {
        i64::try_from(self.bucket_count)
            .ok()
            .and_then(|n| self.bucket_secs.checked_mul(n))
    }

    /// Buckets a batch must populate to be accepted.
    pub fn required_buckets(&self) -> usize {
        let need = (self.min_valid_fraction * self.bucket_count as f64).ceil();
        (need.max(0.0) as usize).min(self.bucket_count)
    }
}

/// One occupied bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Slot {
    /// Time of the observation that decides which bucket this lands in.
    at: DateTime<Utc>,
    value: f64,
    sum: f64,
    count: u32,
}

impl Slot {
    fn from_sample(s: &Sample) -> Self {
        Self {
            at: s.at,
            value: s.value,
            sum: s.value,
            count: 1,
        }
    }

    fn combine(&mut self, other: &Slot, policy: MergePolicy) {
        match policy {
            MergePolicy::Max => {
                if other.value > self.value || (other.value == self.value && other.at > self.at) {
                    *self = *other;
                }
            }
            MergePolicy::Latest => {
                if other.at > self.at || (other.at == self.at && other.value > self.value) {
                    *self = *other;
                }
            }
            MergePolicy::Average => {
                self.sum += other.sum;
                self.count += other.count;
                self.value = self.sum / self.count as f64;
                if other.at > self.at {
                    self.at = other.at;
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryBuffer {
    config: HistoryConfig,
    slots: Vec<Option<Slot>>,
    anchor: Option<DateTime<Utc>>,
    data_ok: bool,
}

impl HistoryBuffer {
    pub fn new(config: HistoryConfig) -> Self {
        let slots = vec![None; config.bucket_count];
        Self {
            config,
            slots,
            anchor: None,
            data_ok: false,
        }
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    pub fn capacity(&self) -> usize {
        self.config.bucket_count
    }

    /// True once a merge was accepted or a load kept at least one bucket.
    pub fn data_ok(&self) -> bool {
        self.data_ok
    }

    /// Number of buckets holding a real observation.
    pub fn observed_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Bucket position for a sample at `at`, or `None` outside the horizon.
    fn position(&self, now: DateTime<Utc>, at: DateTime<Utc>) -> Option<usize> {
        let age = (now - at).num_seconds();
        if age < 0 || self.config.bucket_secs <= 0 {
            return None;
        }
        let k = (age / self.config.bucket_secs) as usize;
        if k >= self.config.bucket_count {
            return None;
        }
        Some(self.config.bucket_count - 1 - k)
    }

    /// Retained observations placed against `now`.
    fn rebased(&self, now: DateTime<Utc>) -> Vec<Option<Slot>> {
        let mut out = vec![None; self.config.bucket_count];
        for slot in self.slots.iter().flatten() {
            if let Some(i) = self.position(now, slot.at) {
                place(&mut out[i], slot, self.config.merge_policy);
            }
        }
        out
    }

    /// Merges a fetched batch, returning whether it was accepted.
    pub fn merge(&mut self, now: DateTime<Utc>, samples: &[Sample]) -> bool {
        self.try_merge(now, samples).is_ok()
    }

    /// Merges a fetched batch.
    ///
    /// Samples are bucketed against `now` and combined per the merge policy.
    /// Buckets the batch touches replace what was retained there; other
    /// retained buckets survive if still inside the horizon. The batch is
    /// rejected with `InsufficientData` if it populates fewer buckets than
    /// `min_valid_fraction` requires, or if its newest sample is older than
    /// `require_recent_secs`. A rejected batch leaves the buffer untouched.
    ///
    /// Returns the number of buckets the batch populated.
    pub fn try_merge(&mut self, now: DateTime<Utc>, samples: &[Sample]) -> Result<usize, FetchError> {
        let policy = self.config.merge_policy;
        let mut batch: Vec<Option<Slot>> = vec![None; self.config.bucket_count];
        let mut newest: Option<DateTime<Utc>> = None;

        for s in samples.iter().filter(|s| s.value.is_finite()) {
            if let Some(i) = self.position(now, s.at) {
                place(&mut batch[i], &Slot::from_sample(s), policy);
                newest = Some(newest.map_or(s.at, |n| n.max(s.at)));
            }
        }

        let received = batch.iter().filter(|s| s.is_some()).count();
        let need = self.config.required_buckets().max(1);
        if received < need {
            return Err(FetchError::InsufficientData {
                have: received,
                need,
            });
        }

        if let Some(window) = self.config.require_recent_secs {
            let recent = newest.is_some_and(|t| (now - t).num_seconds() <= window);
            if !recent {
                return Err(FetchError::InsufficientData { have: 0, need: 1 });
            }
        }

        let mut merged = self.rebased(now);
        for (dst, src) in merged.iter_mut().zip(batch) {
            if src.is_some() {
                *dst = src;
            }
        }

        self.slots = merged;
        self.anchor = Some(now);
        self.data_ok = true;
        Ok(received)
    }

    /// Streams one new observation in.
    ///
    /// Every retained bucket is first re-based against `now`, evicting those
    /// that aged out, then the sample is combined into its bucket. Returns
    /// false if the sample itself falls outside the horizon.
    pub fn append(&mut self, now: DateTime<Utc>, sample: Sample) -> bool {
        let mut slots = self.rebased(now);
        let placed = match self.position(now, sample.at) {
            Some(i) if sample.value.is_finite() => {
                place(&mut slots[i], &Slot::from_sample(&sample), self.config.merge_policy);
                true
            }
            _ => false,
        };

        self.slots = slots;
        self.anchor = Some(now);
        self.data_ok = self.observed_count() > 0;
        placed
    }

    /// Replaces the contents with `samples` placed against `now`; used when
    /// seeding from disk. Returns how many buckets survived.
    pub fn restore(&mut self, now: DateTime<Utc>, samples: &[Sample]) -> usize {
        let mut slots = vec![None; self.config.bucket_count];
        for s in samples.iter().filter(|s| s.value.is_finite()) {
            if let Some(i) = self.position(now, s.at) {
                place(&mut slots[i], &Slot::from_sample(s), self.config.merge_policy);
            }
        }

        self.slots = slots;
        self.anchor = Some(now);
        let kept = self.observed_count();
        self.data_ok = kept > 0;
        kept
    }

    /// Gap-filled values oldest to newest, re-based to `now`.
    pub fn values_at(&self, now: DateTime<Utc>) -> Vec<f64> {
        self.series_at(now).into_iter().map(|p| p.value).collect()
    }

    /// Plot series of exactly `bucket_count` points, oldest first.
    ///
    /// `age_hours` is the bucket's nominal age relative to `now`.
    pub fn series_at(&self, now: DateTime<Utc>) -> Vec<SeriesPoint> {
        let n = self.config.bucket_count;
        let mut carried: Option<f64> = None;

        self.rebased(now)
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                let k = (n - 1 - i) as i64;
                let age_hours = -(k.saturating_mul(self.config.bucket_secs) as f64) / 3600.0;
                match slot {
                    Some(s) => {
                        carried = Some(s.value);
                        SeriesPoint {
                            age_hours,
                            value: s.value,
                            valid: true,
                        }
                    }
                    None => SeriesPoint {
                        age_hours,
                        value: carried.unwrap_or(NO_DATA),
                        valid: false,
                    },
                }
            })
            .collect()
    }

    /// Newest retained observation.
    pub fn latest(&self) -> Option<Sample> {
        self.slots
            .iter()
            .flatten()
            .max_by_key(|s| s.at)
            .map(|s| Sample::new(s.at, s.value))
    }

    /// Retained observations oldest to newest, with absolute times.
    pub fn observations(&self) -> Vec<Sample> {
        self.slots
            .iter()
            .flatten()
            .map(|s| Sample::new(s.at, s.value))
            .collect()
    }

    /// The `now` of the most recent merge, append or restore.
    pub fn anchor(&self) -> Option<DateTime<Utc>> {
        self.anchor
    }
}

fn place(dst: &mut Option<Slot>, incoming: &Slot, policy: MergePolicy) {
    match dst {
        Some(existing) => existing.combine(incoming, policy),
        None => *dst = Some(*incoming),
    }
}
