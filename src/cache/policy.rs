/// Retrieval policy: when to serve the cache and when to hit the network.
///
/// A `Retriever` owns one source's adapter and cache record. Consumers call
/// `get_value_at`; it returns the cached reading without any I/O until the
/// record's `next_update` passes (or a refresh is forced), then runs exactly
/// one fetch-and-parse cycle through the adapter.
///
/// Every recoverable adapter error is folded into the record as `ok = false`
/// plus a reason. Only resource exhaustion escapes, as `FatalError`.
///
/// # Clock injection
/// All `*_at` methods take `now`; `get_value` and `poll` read the wall clock.

use super::backoff::BackoffPolicy;
use super::record::CacheRecord;
use crate::logging::{self, Channel};
use crate::model::{FatalError, FetchError, Reading, Sample};
use crate::transport::KeepAlive;
use chrono::{DateTime, Utc};

// ---------------------------------------------------------------------------
// Adapter interfaces
// ---------------------------------------------------------------------------

/// One provider's fetch-and-parse cycle.
pub trait Adapter {
    type Output: Clone;

    fn label(&self) -> &str;

    /// Fetches and normalizes one payload. `query` carries the consumer's
    /// current query parameters, if the source has any.
    fn fetch(
        &mut self,
        now: DateTime<Utc>,
        query: Option<&str>,
        hook: &mut dyn KeepAlive,
    ) -> Result<Self::Output, FetchError>;
}

/// A provider whose payload is a batch of timestamped samples destined for a
/// history buffer.
pub trait SampleAdapter {
    fn label(&self) -> &str;

    fn fetch_samples(
        &mut self,
        now: DateTime<Utc>,
        hook: &mut dyn KeepAlive,
    ) -> Result<Vec<Sample>, FetchError>;
}

// ---------------------------------------------------------------------------
// Retriever
// ---------------------------------------------------------------------------

pub struct Retriever<A: Adapter> {
    adapter: A,
    record: CacheRecord<A::Output>,
    backoff: BackoffPolicy,
    keep_alive: Box<dyn KeepAlive>,
}

impl<A: Adapter> Retriever<A> {
    pub fn new(adapter: A, backoff: BackoffPolicy) -> Self {
        Self {
            adapter,
            record: CacheRecord::new(),
            backoff,
            keep_alive: Box::new(|| {}),
        }
    }

    /// Installs the hook called at every suspension point of a fetch.
    pub fn with_keep_alive(mut self, hook: Box<dyn KeepAlive>) -> Self {
        self.keep_alive = hook;
        self
    }

    pub fn label(&self) -> &str {
        self.adapter.label()
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn record(&self) -> &CacheRecord<A::Output> {
        &self.record
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Current reading without any refresh.
    pub fn reading(&self) -> Reading<A::Output> {
        self.record.reading()
    }

    /// Pre-populates the value without scheduling, so the first poll still
    /// fetches.
    pub fn seed(&mut self, value: A::Output, ok: bool) {
        self.record.value = Some(value);
        self.record.ok = ok;
    }

    pub fn is_due_at(&self, now: DateTime<Utc>) -> bool {
        self.record.is_due_at(now)
    }

    /// Returns the cached reading, refreshing first if due or forced.
    pub fn get_value_at(
        &mut self,
        now: DateTime<Utc>,
        force: bool,
    ) -> Result<Reading<A::Output>, FatalError> {
        if force || self.record.is_due_at(now) {
            self.refresh(now, None)?;
        }
        Ok(self.record.reading())
    }

    /// Convenience wrapper that uses the real current time.
    pub fn get_value(&mut self, force: bool) -> Result<Reading<A::Output>, FatalError> {
        self.get_value_at(Utc::now(), force)
    }

    /// Like `get_value_at`, for sources whose value depends on consumer
    /// settings. A key different from the one the cache was filled under
    /// forces a refresh. If that refresh fails the old value is dropped, since
    /// it answers a question nobody is asking any more.
    pub fn get_value_for_query_at(
        &mut self,
        now: DateTime<Utc>,
        key: &str,
        force: bool,
    ) -> Result<Reading<A::Output>, FatalError> {
        let changed = self.record.query_key.as_deref() != Some(key);
        if changed && self.record.query_key.is_some() {
            logging::info(
                Channel::Cache,
                Some(self.adapter.label()),
                &format!("query changed to '{}', refreshing", key),
            );
        }

        if force || changed || self.record.is_due_at(now) {
            let ok = self.refresh(now, Some(key))?;
            if changed && !ok {
                self.record.value = None;
            }
            self.record.query_key = Some(key.to_string());
        }
        Ok(self.record.reading())
    }

    /// Runs one attempt if due. Returns whether an attempt was made.
    pub fn poll_at(&mut self, now: DateTime<Utc>) -> Result<bool, FatalError> {
        if !self.record.is_due_at(now) {
            return Ok(false);
        }
        let query = self.record.query_key.clone();
        self.refresh(now, query.as_deref())?;
        Ok(true)
    }

    /// Convenience wrapper that uses the real current time.
    pub fn poll(&mut self) -> Result<bool, FatalError> {
        self.poll_at(Utc::now())
    }

    /// One fetch-and-parse cycle. Returns whether it succeeded.
    fn refresh(&mut self, now: DateTime<Utc>, query: Option<&str>) -> Result<bool, FatalError> {
        let label = self.adapter.label().to_string();
        logging::debug(Channel::Feed, Some(&label), "refreshing");

        match self.adapter.fetch(now, query, self.keep_alive.as_mut()) {
            Ok(value) => {
                let next = self.backoff.next_refresh_time(now);
                self.record.record_success(now, value, next);
                logging::info(
                    Channel::Feed,
                    Some(&label),
                    &format!("refreshed, next update {}", next.format("%H:%M:%S")),
                );
                Ok(true)
            }
            Err(e) if e.is_fatal() => {
                logging::error(Channel::Feed, Some(&label), &e.to_string());
                Err(FatalError {
                    source_label: label,
                    detail: e.to_string(),
                })
            }
            Err(e) => {
                logging::log_fetch_failure(&label, "refresh", &e);
                let failures = self.record.consecutive_failures.saturating_add(1);
                let next = self.backoff.next_retry_time(&label, now, failures);
                self.record.record_failure(now, e.to_string(), next);
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TransportError;
    use chrono::{Duration, TimeZone};
    use std::collections::VecDeque;

    /// Replays scripted outcomes and counts calls.
    struct ScriptedAdapter {
        outcomes: VecDeque<Result<f64, FetchError>>,
        calls: usize,
        last_query: Option<String>,
    }

    impl ScriptedAdapter {
        fn new(outcomes: Vec<Result<f64, FetchError>>) -> Self {
            Self {
                outcomes: outcomes.into(),
                calls: 0,
                last_query: None,
            }
        }
    }

    impl Adapter for ScriptedAdapter {
        type Output = f64;

        fn label(&self) -> &str {
            "TEST"
        }

        fn fetch(
            &mut self,
            _now: DateTime<Utc>,
            query: Option<&str>,
            hook: &mut dyn KeepAlive,
        ) -> Result<f64, FetchError> {
            hook.keep_alive();
            self.calls += 1;
            self.last_query = query.map(str::to_string);
            self.outcomes
                .pop_front()
                .unwrap_or(Err(FetchError::MalformedPayload("script exhausted".into())))
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 31, 12, 0, 0).unwrap()
    }

    fn retriever(outcomes: Vec<Result<f64, FetchError>>) -> Retriever<ScriptedAdapter> {
        Retriever::new(ScriptedAdapter::new(outcomes), BackoffPolicy::fixed(3600, 120))
    }

    #[test]
    fn test_cached_value_served_without_fetch() {
        let mut r = retriever(vec![Ok(5.0), Ok(6.0)]);
        for i in 0..10 {
            let reading = r.get_value_at(now() + Duration::seconds(i * 60), false).unwrap();
            assert_eq!(reading.value, Some(5.0));
            assert!(reading.ok);
        }
        assert_eq!(r.adapter().calls, 1);
    }

    #[test]
    fn test_refresh_after_interval() {
        let mut r = retriever(vec![Ok(5.0), Ok(6.0)]);
        r.get_value_at(now(), false).unwrap();
        let reading = r.get_value_at(now() + Duration::seconds(3600), false).unwrap();
        assert_eq!(reading.value, Some(6.0));
        assert_eq!(r.adapter().calls, 2);
    }

    #[test]
    fn test_force_bypasses_schedule() {
        let mut r = retriever(vec![Ok(5.0), Ok(6.0)]);
        r.get_value_at(now(), false).unwrap();
        let reading = r.get_value_at(now() + Duration::seconds(1), true).unwrap();
        assert_eq!(reading.value, Some(6.0));
        assert_eq!(r.adapter().calls, 2);
    }

    #[test]
    fn test_failure_schedules_backoff_inside_refresh_window() {
        let mut r = retriever(vec![Err(TransportError::HeaderShort.into())]);
        let reading = r.get_value_at(now(), false).unwrap();

        assert!(!reading.ok);
        assert_eq!(reading.value, None);
        assert_eq!(reading.reason, "Transport error: header short");
        let next = r.record().next_update.unwrap();
        assert!(next > now() && next < now() + Duration::seconds(3600));
    }

    #[test]
    fn test_resource_exhaustion_is_fatal() {
        let mut r = retriever(vec![Err(FetchError::ResourceExhausted("4 MiB".into()))]);
        let err = r.get_value_at(now(), false).unwrap_err();
        assert_eq!(err.source_label, "TEST");
    }

    #[test]
    fn test_seed_does_not_schedule() {
        let mut r = retriever(vec![Ok(9.0)]);
        r.seed(3.0, true);
        assert_eq!(r.reading().value, Some(3.0));
        assert!(r.is_due_at(now()));
        assert!(r.poll_at(now()).unwrap());
        assert!(!r.poll_at(now() + Duration::seconds(60)).unwrap());
        assert_eq!(r.reading().value, Some(9.0));
    }

    #[test]
    fn test_query_change_forces_refresh() {
        let mut r = retriever(vec![Ok(1.0), Ok(2.0), Ok(3.0)]);
        r.get_value_for_query_at(now(), "bands=20m", false).unwrap();
        r.get_value_for_query_at(now() + Duration::seconds(5), "bands=20m", false)
            .unwrap();
        assert_eq!(r.adapter().calls, 1);

        let reading = r
            .get_value_for_query_at(now() + Duration::seconds(10), "bands=40m", false)
            .unwrap();
        assert_eq!(reading.value, Some(2.0));
        assert_eq!(r.adapter().calls, 2);
        assert_eq!(r.adapter().last_query.as_deref(), Some("bands=40m"));
    }

    #[test]
    fn test_failed_query_change_drops_old_value() {
        let mut r = retriever(vec![Ok(1.0), Err(TransportError::Status(503).into())]);
        r.get_value_for_query_at(now(), "grid=EN52", false).unwrap();
        let reading = r
            .get_value_for_query_at(now() + Duration::seconds(10), "grid=FN31", false)
            .unwrap();
        assert_eq!(reading.value, None);
        assert!(!reading.ok);
    }

    #[test]
    fn test_keep_alive_hook_reaches_adapter() {
        use std::cell::Cell;
        use std::rc::Rc;

        let count = Rc::new(Cell::new(0));
        let seen = Rc::clone(&count);
        let mut r = retriever(vec![Ok(1.0)]).with_keep_alive(Box::new(move || seen.set(seen.get() + 1)));
        r.get_value_at(now(), false).unwrap();
        assert_eq!(count.get(), 1);
    }
}
