// src/pipeline/plan.rs

//! Candidate id planning.
//!
//! Every mode is a pure function of the ledger state (plus, for delta mode,
//! the upstream's current maximum). Output is sorted ascending so runs are
//! reproducible.

use std::collections::BTreeSet;
use std::fmt;

use crate::error::{AppError, Result};
use crate::models::ModelId;
use crate::storage::ErrorEntry;

/// Which ids a run should attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Every id in `[start, end]` that is not done yet
    Range {
        start: ModelId,
        end: ModelId,
        /// Re-probe ids logged as not found (off by default)
        include_not_found: bool,
    },
    /// Fill gaps in `[1, ceiling]`; the ceiling defaults to the watermark
    Resume { ceiling: Option<ModelId> },
    /// Ids above the watermark, up to the upstream's newest id
    Delta,
    /// Replay `errors.txt`
    Retry,
    /// Re-probe ids logged as not found, optionally within `[start, end]`
    Recheck { range: Option<(ModelId, ModelId)> },
    /// Probe upward from the highest download until the misses run out
    Crawl { start: Option<ModelId> },
}

impl Mode {
    /// Whether existing valid files are overwritten rather than skipped.
    pub fn forces_overwrite(&self) -> bool {
        matches!(self, Mode::Retry)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Range { start, end, .. } => write!(f, "range {start}..={end}"),
            Mode::Resume { ceiling: Some(c) } => write!(f, "resume up to {c}"),
            Mode::Resume { ceiling: None } => f.write_str("resume up to watermark"),
            Mode::Delta => f.write_str("delta"),
            Mode::Retry => f.write_str("retry"),
            Mode::Recheck { range: Some((s, e)) } => write!(f, "recheck {s}..={e}"),
            Mode::Recheck { range: None } => f.write_str("recheck"),
            Mode::Crawl { start: Some(s) } => write!(f, "crawl from {s}"),
            Mode::Crawl { start: None } => f.write_str("crawl"),
        }
    }
}

/// Read-only snapshot of the ledger taken before dispatch.
#[derive(Debug, Clone, Default)]
pub struct LedgerState {
    /// Ids present in `downloaded.txt` (after reconciliation appends)
    pub downloaded: BTreeSet<ModelId>,
    /// Ids the reconciler found without a valid file
    pub invalid: BTreeSet<ModelId>,
    pub not_found: BTreeSet<ModelId>,
    pub errors: Vec<ErrorEntry>,
    pub watermark: Option<ModelId>,
}

impl LedgerState {
    /// Logged as downloaded and not contradicted by the filesystem.
    pub fn is_done(&self, id: ModelId) -> bool {
        self.downloaded.contains(&id) && !self.invalid.contains(&id)
    }

    pub fn is_not_found(&self, id: ModelId) -> bool {
        self.not_found.contains(&id)
    }

    /// Highest id with a valid download.
    pub fn max_downloaded(&self) -> Option<ModelId> {
        self.downloaded
            .iter()
            .rev()
            .copied()
            .find(|id| !self.invalid.contains(id))
    }
}

/// What the scheduler should run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// Parallel fetch of a fixed candidate list
    Batch(Vec<ModelId>),
    /// Sequential probe starting at `start`
    Frontier { start: ModelId },
}

/// Produce the plan for `mode`. `latest_max` is only consulted in delta mode.
///
/// With `force`, ids that are already done stay in range, resume, delta and
/// recheck plans so their files get fetched and overwritten. Retry ignores it.
pub fn plan(
    mode: &Mode,
    state: &LedgerState,
    latest_max: Option<ModelId>,
    force: bool,
) -> Result<Plan> {
    let ids = match mode {
        Mode::Range {
            start,
            end,
            include_not_found,
        } => plan_range(state, *start, *end, *include_not_found, force)?,
        Mode::Resume { ceiling } => {
            let ceiling = ceiling.or(state.watermark).ok_or_else(|| {
                AppError::config("resume needs a ceiling: no watermark recorded yet")
            })?;
            plan_resume(state, ceiling, force)
        }
        Mode::Delta => plan_delta(state, latest_max, force),
        Mode::Retry => plan_retry(state),
        Mode::Recheck { range } => plan_recheck(state, *range, force),
        Mode::Crawl { start } => {
            return Ok(Plan::Frontier {
                start: frontier_start(state, *start),
            });
        }
    };
    Ok(Plan::Batch(ids))
}

/// `[start, end]` minus done ids, minus not-found ids unless asked otherwise.
pub fn plan_range(
    state: &LedgerState,
    start: ModelId,
    end: ModelId,
    include_not_found: bool,
    force: bool,
) -> Result<Vec<ModelId>> {
    if start > end {
        return Err(AppError::validation(format!(
            "range start {start} is greater than end {end}"
        )));
    }
    Ok((start..=end)
        .filter(|id| force || !state.is_done(*id))
        .filter(|id| include_not_found || !state.is_not_found(*id))
        .collect())
}

/// `[1, ceiling]` minus done and not-found ids.
pub fn plan_resume(state: &LedgerState, ceiling: ModelId, force: bool) -> Vec<ModelId> {
    (1..=ceiling)
        .filter(|id| (force || !state.is_done(*id)) && !state.is_not_found(*id))
        .collect()
}

/// Ids in `(baseline, latest_max]`.
///
/// The baseline is the watermark; before the first delta run it falls back
/// to the highest valid download.
pub fn plan_delta(state: &LedgerState, latest_max: Option<ModelId>, force: bool) -> Vec<ModelId> {
    let Some(latest) = latest_max else {
        return Vec::new();
    };
    let baseline = state
        .watermark
        .or_else(|| state.max_downloaded())
        .unwrap_or(0);
    if latest <= baseline {
        return Vec::new();
    }
    (baseline + 1..=latest)
        .filter(|id| (force || !state.is_done(*id)) && !state.is_not_found(*id))
        .collect()
}

/// Ids from `errors.txt`, minus 404-class lines, done ids and not-found ids.
pub fn plan_retry(state: &LedgerState) -> Vec<ModelId> {
    let permanent: BTreeSet<ModelId> = state
        .errors
        .iter()
        .filter(|entry| entry.is_not_found())
        .map(|entry| entry.id)
        .collect();

    state
        .errors
        .iter()
        .filter(|entry| !entry.is_not_found())
        .map(|entry| entry.id)
        .filter(|id| !permanent.contains(id))
        .filter(|id| !state.is_done(*id) && !state.is_not_found(*id))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Not-found ids (optionally bounded), minus done ids.
pub fn plan_recheck(
    state: &LedgerState,
    range: Option<(ModelId, ModelId)>,
    force: bool,
) -> Vec<ModelId> {
    state
        .not_found
        .iter()
        .copied()
        .filter(|id| match range {
            Some((start, end)) => (start..=end).contains(id),
            None => true,
        })
        .filter(|id| force || !state.is_done(*id))
        .collect()
}

/// First id a frontier crawl probes.
pub fn frontier_start(state: &LedgerState, explicit: Option<ModelId>) -> ModelId {
    explicit.unwrap_or_else(|| state.max_downloaded().map_or(1, |max| max + 1))
}
