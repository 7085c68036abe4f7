/// Composite "most important N" ranking across sources.
///
/// Each source carries coefficients `a, b, c`; its importance is
///
/// ```text
/// score = (a * value + b) * value + c
/// ```
///
/// Rank 0 is the most important. Sources whose latest refresh failed always
/// sort after every good source.
///
/// In manual mode the operator pins a subset of sources to ranks in the order
/// they chose; scores are not computed again until auto mode is restored.

use crate::logging::{self, Channel};
use crate::model::FetchError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Number of entries the summary table shows.
pub const DEFAULT_MAX_FIELDS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coefficients {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl Coefficients {
    pub const fn new(a: f64, b: f64, c: f64) -> Self {
        Self { a, b, c }
    }

    pub fn score(&self, value: f64) -> f64 {
        (self.a * value + self.b) * value + self.c
    }
}

/// One source's current state as seen by the ranker.
#[derive(Debug, Clone, PartialEq)]
pub struct RankInput {
    pub label: String,
    pub value: Option<f64>,
    pub ok: bool,
    pub coefficients: Coefficients,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedSource {
    pub label: String,
    pub value: Option<f64>,
    pub ok: bool,
    pub score: Option<f64>,
    /// `None` for sources left out of a manual selection.
    pub rank: Option<usize>,
}

/// Scores and orders `entries`, best first.
///
/// Good entries sort by descending score, ties by label. Entries that are not
/// ok, or have no value, follow in input order.
pub fn rank_auto(entries: &[RankInput]) -> Vec<RankedSource> {
    let mut good: Vec<(f64, &RankInput)> = Vec::new();
    let mut bad: Vec<&RankInput> = Vec::new();

    for e in entries {
        match e.value {
            Some(v) if e.ok && v.is_finite() => good.push((e.coefficients.score(v), e)),
            _ => bad.push(e),
        }
    }

    good.sort_by(|(sa, a), (sb, b)| {
        sb.partial_cmp(sa)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.label.cmp(&b.label))
    });

    let scored = good.into_iter().map(|(score, e)| (Some(score), e));
    let unscored = bad.into_iter().map(|e| (None, e));

    scored
        .chain(unscored)
        .enumerate()
        .map(|(rank, (score, e))| RankedSource {
            label: e.label.clone(),
            value: e.value,
            ok: e.ok,
            score,
            rank: Some(rank),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Ranker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankMode {
    Auto,
    /// Labels pinned to ranks 0.. in this order.
    Manual(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct Ranker {
    mode: RankMode,
    max_fields: usize,
    ranked: Vec<RankedSource>,
}

impl Ranker {
    pub fn new(max_fields: usize) -> Self {
        Self {
            mode: RankMode::Auto,
            max_fields,
            ranked: Vec::new(),
        }
    }

    pub fn mode(&self) -> &RankMode {
        &self.mode
    }

    pub fn max_fields(&self) -> usize {
        self.max_fields
    }

    pub fn is_auto(&self) -> bool {
        self.mode == RankMode::Auto
    }

    /// Full ordered list from the latest `rerank`.
    pub fn ranked(&self) -> &[RankedSource] {
        &self.ranked
    }

    /// The entries the summary table shows, best first.
    pub fn displayed(&self) -> Vec<&RankedSource> {
        self.ranked
            .iter()
            .filter(|r| r.rank.is_some_and(|k| k < self.max_fields))
            .collect()
    }

    /// Recomputes the order from current source states.
    ///
    /// In manual mode only values and ok flags are refreshed; ranks stay
    /// pinned and no score is computed.
    pub fn rerank(&mut self, entries: &[RankInput]) {
        self.ranked = match &self.mode {
            RankMode::Auto => {
                let ranked = rank_auto(entries);
                for r in &ranked {
                    logging::debug(
                        Channel::Rank,
                        Some(&r.label),
                        &format!(
                            "rank {} value {} score {}",
                            r.rank.map_or("-".to_string(), |k| k.to_string()),
                            r.value.map_or("-".to_string(), |v| format!("{:.3}", v)),
                            r.score.map_or("-".to_string(), |s| format!("{:.1}", s)),
                        ),
                    );
                }
                ranked
            }
            RankMode::Manual(selection) => pinned(selection, entries),
        };
    }

    /// Pins `labels` to ranks 0.. in order. Unknown labels are dropped.
    pub fn set_manual_selection(&mut self, labels: &[String], entries: &[RankInput]) {
        let mut selection: Vec<String> = Vec::new();
        for label in labels {
            if !entries.iter().any(|e| &e.label == label) {
                logging::warn(Channel::Rank, Some(label), "unknown source in manual selection");
                continue;
            }
            if !selection.contains(label) {
                selection.push(label.clone());
            }
        }

        if selection.len() > self.max_fields {
            logging::info(
                Channel::Rank,
                None,
                &format!(
                    "summary table using only first {} of {} selections",
                    self.max_fields,
                    selection.len()
                ),
            );
        }

        logging::info(
            Channel::Rank,
            None,
            &format!("manual selection: {}", selection.join(", ")),
        );
        self.mode = RankMode::Manual(selection);
        self.rerank(entries);
    }

    /// Returns to scored ranking and re-sorts immediately.
    pub fn set_auto_mode(&mut self, entries: &[RankInput]) {
        logging::info(Channel::Rank, None, "summary table is now auto");
        self.mode = RankMode::Auto;
        self.rerank(entries);
    }
}

fn pinned(selection: &[String], entries: &[RankInput]) -> Vec<RankedSource> {
    let mut out: Vec<RankedSource> = selection
        .iter()
        .filter_map(|label| entries.iter().find(|e| &e.label == label))
        .enumerate()
        .map(|(rank, e)| RankedSource {
            label: e.label.clone(),
            value: e.value,
            ok: e.ok,
            score: None,
            rank: Some(rank),
        })
        .collect();

    out.extend(
        entries
            .iter()
            .filter(|e| !selection.contains(&e.label))
            .map(|e| RankedSource {
                label: e.label.clone(),
                value: e.value,
                ok: e.ok,
                score: None,
                rank: None,
            }),
    );
    out
}

// ---------------------------------------------------------------------------
// Coefficient file
// ---------------------------------------------------------------------------

/// Parses the coefficient file: one `<label> <a> <b> <c>` per line, `#`
/// comments and blank lines ignored.
pub fn parse_coefficients(text: &str) -> Result<Vec<(String, Coefficients)>, FetchError> {
    let mut out = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        let parsed = match fields.as_slice() {
            [label, a, b, c] => match (a.parse::<f64>(), b.parse::<f64>(), c.parse::<f64>()) {
                (Ok(a), Ok(b), Ok(c)) if a.is_finite() && b.is_finite() && c.is_finite() => {
                    Some((label.to_string(), Coefficients::new(a, b, c)))
                }
                _ => None,
            },
            _ => None,
        };

        match parsed {
            Some(entry) => out.push(entry),
            None => {
                return Err(FetchError::MalformedPayload(format!(
                    "bad rank line: {}",
                    line
                )));
            }
        }
    }

    Ok(out)
}
