/// Per-source cache record.
///
/// One record exists per logical source and is owned by that source's
/// `Retriever`. It holds the last known value, whether the most recent attempt
/// produced trustworthy data, the reason it did not, and the earliest time the
/// next fetch may run.

use crate::model::Reading;
use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct CacheRecord<T> {
    /// Last value produced by a successful refresh, or seeded from disk.
    pub value: Option<T>,
    /// False whenever the most recent attempt failed.
    pub ok: bool,
    /// Short reason for the most recent failure; empty after a success.
    pub reason: String,
    /// No fetch before this time unless forced. `None` means never scheduled.
    pub next_update: Option<DateTime<Utc>>,
    /// Query parameters the cached value was requested under.
    pub query_key: Option<String>,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_attempt: Option<DateTime<Utc>>,
}

impl<T> Default for CacheRecord<T> {
    fn default() -> Self {
        Self {
            value: None,
            ok: false,
            reason: String::new(),
            next_update: None,
            query_key: None,
            consecutive_failures: 0,
            last_success: None,
            last_attempt: None,
        }
    }
}

impl<T: Clone> CacheRecord<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a fetch is allowed at `now` without forcing.
    pub fn is_due_at(&self, now: DateTime<Utc>) -> bool {
        match self.next_update {
            Some(next) => now >= next,
            None => true,
        }
    }

    /// Stores a fresh value and schedules the next refresh.
    pub fn record_success(&mut self, now: DateTime<Utc>, value: T, next: DateTime<Utc>) {
        self.value = Some(value);
        self.ok = true;
        self.reason.clear();
        self.consecutive_failures = 0;
        self.last_success = Some(now);
        self.last_attempt = Some(now);
        self.schedule(now, next);
    }

    /// Marks the record not-ok, keeping whatever value it already holds.
    pub fn record_failure(&mut self, now: DateTime<Utc>, reason: String, next: DateTime<Utc>) {
        self.ok = false;
        self.reason = reason;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_attempt = Some(now);
        self.schedule(now, next);
    }

    /// Replaces `next_update` with `candidate`, never at or before `now`.
    fn schedule(&mut self, now: DateTime<Utc>, candidate: DateTime<Utc>) {
        self.next_update = Some(candidate.max(now + Duration::seconds(1)));
    }

    pub fn reading(&self) -> Reading<T> {
        Reading {
            value: self.value.clone(),
            ok: self.ok,
            reason: self.reason.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_750_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_new_record_is_due_and_empty() {
        let record: CacheRecord<f64> = CacheRecord::new();
        assert!(record.is_due_at(t(0)));
        assert_eq!(record.value, None);
        assert!(!record.ok);
        assert!(record.reason.is_empty());
    }

    #[test]
    fn test_failure_keeps_previous_value() {
        let mut record = CacheRecord::new();
        record.record_success(t(0), 42.0, t(3600));
        record.record_failure(t(3600), "Transport error: header short".into(), t(3660));

        assert_eq!(record.value, Some(42.0));
        assert!(!record.ok);
        assert_eq!(record.reason, "Transport error: header short");
        assert_eq!(record.consecutive_failures, 1);
        assert_eq!(record.last_success, Some(t(0)));
    }

    #[test]
    fn test_success_clears_reason_and_streak() {
        let mut record = CacheRecord::new();
        record.record_failure(t(0), "x".into(), t(60));
        record.record_failure(t(60), "x".into(), t(120));
        record.record_success(t(120), 1.0, t(3720));

        assert!(record.ok);
        assert!(record.reason.is_empty());
        assert_eq!(record.consecutive_failures, 0);
    }

    #[test]
    fn test_early_failure_takes_retry_time() {
        let mut record = CacheRecord::new();
        record.record_success(t(0), 1.0, t(3600));
        // forced refresh shortly after: the retry replaces the old schedule
        record.record_failure(t(10), "x".into(), t(70));

        assert_eq!(record.next_update, Some(t(70)));
        assert!(!record.is_due_at(t(69)));
        assert!(record.is_due_at(t(70)));
    }

    #[test]
    fn test_next_update_is_after_attempt() {
        let mut record: CacheRecord<f64> = CacheRecord::new();
        record.record_failure(t(100), "x".into(), t(100));
        assert_eq!(record.next_update, Some(t(101)));
    }
}
