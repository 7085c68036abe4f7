/// Per-source caching: records, the retrieval policy, retry backoff,
/// freshness for display, and cached local copies of remote files.

pub mod backoff;
pub mod file;
pub mod policy;
pub mod record;
pub mod staleness;

pub use backoff::{BackoffPolicy, MIN_BACKOFF_SECS};
pub use file::{CachedFileStore, CACHE_FOREVER};
pub use policy::{Adapter, Retriever, SampleAdapter};
pub use record::CacheRecord;
pub use staleness::{display_cell, freshness_at, DisplayCell, Freshness};
