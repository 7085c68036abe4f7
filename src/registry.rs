/// Composition root: every configured source, polled one at a time, plus the
/// ranking across them.
///
/// The registry owns each source's retriever behind the object-safe
/// `FeedSource` trait so scalar and history-backed sources sit in one list.
/// Polling is strictly sequential; a slow provider delays the others but
/// never overlaps them.

use crate::cache::{Adapter, CachedFileStore, Retriever, SampleAdapter};
use crate::config::{Config, SourceSettings};
use crate::history::{HistoryAdapter, HistoryBuffer};
use crate::ingest::backend::{BackendPage, DrapAdapter, NoaaScalesAdapter};
use crate::ingest::swpc::{self, SwpcFeed};
use crate::logging::{self, Channel};
use crate::model::{ConfigError, FatalError, Reading, Scalar};
use crate::rank::{parse_coefficients, Coefficients, RankInput, RankedSource, Ranker};
use crate::sources::{Endpoint, SourceKind, RANK_COEFFS_PAGE};
use crate::transport::{Fetcher, LineStream};
use chrono::{DateTime, Utc};
use std::rc::Rc;

/// Name of the coefficient file inside the cache directory.
pub const RANK_COEFFS_FILE: &str = "rank2_coeffs.txt";

// ---------------------------------------------------------------------------
// FeedSource
// ---------------------------------------------------------------------------

/// One source as the registry sees it: a label, a due check, and a scalar
/// reading for ranking and summary display.
pub trait FeedSource {
    fn label(&self) -> &str;

    fn is_due_at(&self, now: DateTime<Utc>) -> bool;

    /// Runs one attempt if due. Returns whether an attempt was made.
    fn poll_at(&mut self, now: DateTime<Utc>) -> Result<bool, FatalError>;

    fn force_refresh_at(&mut self, now: DateTime<Utc>) -> Result<Reading<f64>, FatalError>;

    fn reading(&self) -> Reading<f64>;
}

fn scalar_reading<T: Scalar>(reading: Reading<T>) -> Reading<f64> {
    Reading {
        value: reading.value.map(|v| v.scalar()),
        ok: reading.ok,
        reason: reading.reason,
    }
}

impl<A> FeedSource for Retriever<A>
where
    A: Adapter,
    A::Output: Scalar,
{
    fn label(&self) -> &str {
        Retriever::label(self)
    }

    fn is_due_at(&self, now: DateTime<Utc>) -> bool {
        Retriever::is_due_at(self, now)
    }

    fn poll_at(&mut self, now: DateTime<Utc>) -> Result<bool, FatalError> {
        Retriever::poll_at(self, now)
    }

    fn force_refresh_at(&mut self, now: DateTime<Utc>) -> Result<Reading<f64>, FatalError> {
        self.get_value_at(now, true).map(scalar_reading)
    }

    fn reading(&self) -> Reading<f64> {
        scalar_reading(self.record().reading())
    }
}

struct FeedEntry {
    source: Box<dyn FeedSource>,
    coefficients: Coefficients,
}

// ---------------------------------------------------------------------------
// FeedRegistry
// ---------------------------------------------------------------------------

pub struct FeedRegistry {
    entries: Vec<FeedEntry>,
    ranker: Ranker,
}

impl FeedRegistry {
    pub fn new(max_fields: usize) -> Self {
        Self {
            entries: Vec::new(),
            ranker: Ranker::new(max_fields),
        }
    }

    /// Builds every enabled source from `config` and seeds history-backed
    /// ones from their saved files.
    ///
    /// `streams` opens a fresh line stream for each backend page.
    pub fn from_config(
        config: &Config,
        fetcher: Rc<dyn Fetcher>,
        streams: &dyn Fn() -> Box<dyn LineStream>,
        now: DateTime<Utc>,
    ) -> Result<Self, ConfigError> {
        let mut registry = Self::new(config.service.max_fields);

        for settings in config.enabled_sources() {
            let source = build_source(config, settings, &fetcher, streams, now)?;
            registry.add(source, settings.coefficients);
        }

        logging::info(
            Channel::System,
            None,
            &format!("registry ready with {} source(s)", registry.len()),
        );
        registry.rerank();
        Ok(registry)
    }

    pub fn add(&mut self, source: Box<dyn FeedSource>, coefficients: Coefficients) {
        self.entries.push(FeedEntry {
            source,
            coefficients,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.source.label()).collect()
    }

    pub fn ranker(&self) -> &Ranker {
        &self.ranker
    }

    /// Polls every due source in order. Returns whether any attempt was made.
    pub fn poll_all_at(&mut self, now: DateTime<Utc>) -> Result<bool, FatalError> {
        let mut attempted = 0;
        let mut successful = 0;

        for entry in &mut self.entries {
            if entry.source.poll_at(now)? {
                attempted += 1;
                if entry.source.reading().ok {
                    successful += 1;
                }
            }
        }

        logging::log_poll_summary(attempted, successful, attempted - successful);
        if attempted > 0 {
            self.rerank();
        }
        Ok(attempted > 0)
    }

    /// Convenience wrapper that uses the real current time.
    pub fn poll_all(&mut self) -> Result<bool, FatalError> {
        self.poll_all_at(Utc::now())
    }

    /// Refreshes one source now regardless of its schedule. `None` for an
    /// unknown label.
    pub fn force_refresh_at(
        &mut self,
        label: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Reading<f64>>, FatalError> {
        let Some(entry) = self.entries.iter_mut().find(|e| e.source.label() == label) else {
            logging::warn(Channel::System, Some(label), "force refresh of unknown source");
            return Ok(None);
        };
        let reading = entry.source.force_refresh_at(now)?;
        self.rerank();
        Ok(Some(reading))
    }

    pub fn force_refresh(&mut self, label: &str) -> Result<Option<Reading<f64>>, FatalError> {
        self.force_refresh_at(label, Utc::now())
    }

    pub fn reading(&self, label: &str) -> Option<Reading<f64>> {
        self.entries
            .iter()
            .find(|e| e.source.label() == label)
            .map(|e| e.source.reading())
    }

    pub fn rank_inputs(&self) -> Vec<RankInput> {
        self.entries
            .iter()
            .map(|e| {
                let reading = e.source.reading();
                RankInput {
                    label: e.source.label().to_string(),
                    value: reading.value,
                    ok: reading.ok,
                    coefficients: e.coefficients,
                }
            })
            .collect()
    }

    /// Ordered sources from the latest re-rank, best first.
    pub fn get_ranked_sources(&self) -> &[RankedSource] {
        self.ranker.ranked()
    }

    pub fn displayed(&self) -> Vec<&RankedSource> {
        self.ranker.displayed()
    }

    pub fn set_manual_selection(&mut self, labels: &[String]) {
        let inputs = self.rank_inputs();
        self.ranker.set_manual_selection(labels, &inputs);
    }

    pub fn set_auto_mode(&mut self) {
        let inputs = self.rank_inputs();
        self.ranker.set_auto_mode(&inputs);
    }

    /// Replaces the coefficients of the labelled sources. Returns how many
    /// matched.
    pub fn apply_coefficients(&mut self, coefficients: &[(String, Coefficients)]) -> usize {
        let mut applied = 0;
        for (label, c) in coefficients {
            match self.entries.iter_mut().find(|e| e.source.label() == label) {
                Some(entry) => {
                    entry.coefficients = *c;
                    applied += 1;
                }
                None => logging::debug(Channel::Rank, Some(label), "coefficients for unknown source"),
            }
        }
        if applied > 0 {
            self.rerank();
        }
        applied
    }

    /// Loads ranking coefficients through the cached file store and applies
    /// them. A failed download or a bad file keeps the current coefficients.
    pub fn refresh_coefficients_at(
        &mut self,
        store: &CachedFileStore,
        fetcher: &dyn Fetcher,
        url: &str,
        max_age_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<usize, FatalError> {
        let loaded = store
            .open_cached_at(fetcher, RANK_COEFFS_FILE, url, max_age_secs, 1, now, &mut || {})
            .and_then(|path| Ok(std::fs::read_to_string(path)?))
            .and_then(|text| parse_coefficients(&text));

        match loaded {
            Ok(parsed) => {
                let applied = self.apply_coefficients(&parsed);
                logging::info(
                    Channel::Rank,
                    None,
                    &format!("applied {} of {} coefficient line(s)", applied, parsed.len()),
                );
                Ok(applied)
            }
            Err(e) if e.is_fatal() => Err(FatalError {
                source_label: RANK_COEFFS_FILE.to_string(),
                detail: e.to_string(),
            }),
            Err(e) => {
                logging::log_fetch_failure(RANK_COEFFS_FILE, "coefficients", &e);
                Ok(0)
            }
        }
    }

    fn rerank(&mut self) {
        let inputs = self.rank_inputs();
        self.ranker.rerank(&inputs);
    }
}

// ---------------------------------------------------------------------------
// Source construction
// ---------------------------------------------------------------------------

fn build_source(
    config: &Config,
    settings: &SourceSettings,
    fetcher: &Rc<dyn Fetcher>,
    streams: &dyn Fn() -> Box<dyn LineStream>,
    now: DateTime<Utc>,
) -> Result<Box<dyn FeedSource>, ConfigError> {
    let label = settings.label.as_str();
    let mismatch = || {
        ConfigError::Invalid(format!(
            "{}: endpoint {:?} does not fit {:?}",
            label, settings.endpoint, settings.kind
        ))
    };

    match (settings.kind, settings.endpoint) {
        (SourceKind::NoaaScales, Endpoint::Backend(path)) => {
            let page = backend_page(config, path, streams);
            let adapter = NoaaScalesAdapter::new(label, page);
            Ok(Box::new(Retriever::new(adapter, settings.backoff)))
        }
        (SourceKind::Drap, Endpoint::Backend(path)) => {
            let page = backend_page(config, path, streams);
            history_source(DrapAdapter::new(label, page), config, settings, now)
        }
        (kind, Endpoint::Swpc(path)) => {
            let parser = swpc::parser_for(kind).ok_or_else(mismatch)?;
            let feed = SwpcFeed::new(label, &config.swpc_url(path), Rc::clone(fetcher), parser);
            history_source(feed, config, settings, now)
        }
        _ => Err(mismatch()),
    }
}

fn backend_page(
    config: &Config,
    path: &str,
    streams: &dyn Fn() -> Box<dyn LineStream>,
) -> BackendPage {
    BackendPage::new(
        &config.service.backend_host,
        config.service.backend_port,
        path,
        streams(),
    )
}

fn history_source<S: SampleAdapter + 'static>(
    inner: S,
    config: &Config,
    settings: &SourceSettings,
    now: DateTime<Utc>,
) -> Result<Box<dyn FeedSource>, ConfigError> {
    let history = settings.history.clone().ok_or_else(|| {
        ConfigError::Invalid(format!("{}: sample source without history", settings.label))
    })?;

    let mut adapter = HistoryAdapter::new(inner, HistoryBuffer::new(history))
        .persist_to(config.history_path(&settings.label));
    let seeded = adapter.load_at(now);

    let mut retriever = Retriever::new(adapter, settings.backoff);
    if let Some(snapshot) = seeded {
        retriever.seed(snapshot, true);
    }
    Ok(Box::new(retriever))
}

/// Coefficient file URL on the backend host.
pub fn rank_coeffs_url(config: &Config) -> String {
    config.backend_url(RANK_COEFFS_PAGE)
}
