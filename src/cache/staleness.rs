/// Cache freshness and consumer display state.
///
/// A consumer always shows the last good value it has, annotated when the
/// most recent refresh failed, and an explicit placeholder when nothing was
/// ever obtained.
///
/// # Clock injection
/// `freshness_at` takes `now` so classification is deterministic in tests;
/// `freshness` reads the wall clock.

use super::record::CacheRecord;
use crate::model::Reading;
use chrono::{DateTime, Utc};

/// Placeholder and marker shown for a failed source.
pub const ERROR_PLACEHOLDER: &str = "Err";
/// Placeholder shown before the first attempt completes.
pub const NO_DATA_PLACEHOLDER: &str = "--";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Nothing attempted and nothing seeded.
    NoData,
    /// Last attempt succeeded and the refresh time has not passed.
    Fresh,
    /// Last attempt succeeded but the refresh time has passed.
    Stale,
    /// Last attempt failed.
    Error,
}

pub fn freshness_at<T: Clone>(record: &CacheRecord<T>, now: DateTime<Utc>) -> Freshness {
    if !record.ok {
        if record.value.is_none() && record.last_attempt.is_none() {
            return Freshness::NoData;
        }
        return Freshness::Error;
    }
    if record.is_due_at(now) {
        Freshness::Stale
    } else {
        Freshness::Fresh
    }
}

/// Convenience wrapper that uses the real current time.
pub fn freshness<T: Clone>(record: &CacheRecord<T>) -> Freshness {
    freshness_at(record, Utc::now())
}

/// Text for one summary-table cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayCell {
    pub text: String,
    /// `Some("Err")` when the shown value did not come from the latest attempt.
    pub marker: Option<&'static str>,
}

/// Formats `reading` for display without ever blanking a known value.
///
/// A reading with no value and an empty reason has never been attempted.
pub fn display_cell<T>(reading: &Reading<T>, format: impl Fn(&T) -> String) -> DisplayCell {
    match &reading.value {
        Some(v) => DisplayCell {
            text: format(v),
            marker: if reading.ok { None } else { Some(ERROR_PLACEHOLDER) },
        },
        None if reading.reason.is_empty() => DisplayCell {
            text: NO_DATA_PLACEHOLDER.to_string(),
            marker: None,
        },
        None => DisplayCell {
            text: ERROR_PLACEHOLDER.to_string(),
            marker: Some(ERROR_PLACEHOLDER),
        },
    }
}
