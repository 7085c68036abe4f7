/// Retry scheduling after a failed refresh.
///
/// A failed source is retried sooner than its normal cadence so it self-heals
/// after transient trouble, but never sooner than `MIN_BACKOFF_SECS`.
///
/// The baseline is a fixed backoff per source. Setting `exponential` doubles
/// the delay per consecutive failure up to `max_backoff_secs`; the delay
/// always stays below the refresh interval.

use crate::logging::{self, Channel};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Floor on any retry delay.
pub const MIN_BACKOFF_SECS: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub refresh_secs: i64,
    pub backoff_secs: i64,
    #[serde(default)]
    pub exponential: bool,
    #[serde(default)]
    pub max_backoff_secs: Option<i64>,
}

impl BackoffPolicy {
    pub fn fixed(refresh_secs: i64, backoff_secs: i64) -> Self {
        Self {
            refresh_secs,
            backoff_secs,
            exponential: false,
            max_backoff_secs: None,
        }
    }

    pub fn with_exponential(mut self, max_backoff_secs: i64) -> Self {
        self.exponential = true;
        self.max_backoff_secs = Some(max_backoff_secs);
        self
    }

    /// Largest delay this policy may ever return.
    fn ceiling_secs(&self) -> i64 {
        let below_refresh = (self.refresh_secs - 1).max(1);
        match self.max_backoff_secs {
            Some(max) if self.exponential => max.min(below_refresh),
            _ => below_refresh,
        }
    }

    /// Delay in seconds for the given failure streak (1 = first failure).
    pub fn backoff_secs_for(&self, consecutive_failures: u32) -> i64 {
        let ceiling = self.ceiling_secs();
        let floor = MIN_BACKOFF_SECS.min(ceiling);
        let base = self.backoff_secs.clamp(floor, ceiling);

        if !self.exponential {
            return base;
        }

        let doublings = consecutive_failures.saturating_sub(1).min(30);
        base.saturating_mul(1_i64 << doublings).clamp(floor, ceiling)
    }

    /// Next allowed attempt after a failure at `now`.
    pub fn next_retry_time(
        &self,
        label: &str,
        now: DateTime<Utc>,
        consecutive_failures: u32,
    ) -> DateTime<Utc> {
        let secs = self.backoff_secs_for(consecutive_failures);
        logging::debug(
            Channel::Cache,
            Some(label),
            &format!(
                "retry in {}s after {} consecutive failure(s)",
                secs, consecutive_failures
            ),
        );
        now + Duration::seconds(secs)
    }

    /// Next scheduled refresh after a success at `now`.
    pub fn next_refresh_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::seconds(self.refresh_secs)
    }
}
