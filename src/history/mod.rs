/// Bounded, disk-backed history for sources that plot a time series.
///
/// - `buffer`: `HistoryBuffer`: bucketing, merge policies, gap fill
/// - `persist`: `<unix_timestamp> <value>` text files
/// - `source`: `HistoryAdapter`, plugging a buffer into a `Retriever`

pub mod buffer;
pub mod persist;
pub mod source;

pub use buffer::{HistoryBuffer, HistoryConfig, MergePolicy};
pub use source::HistoryAdapter;
