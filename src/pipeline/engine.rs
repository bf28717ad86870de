// src/pipeline/engine.rs

//! Run orchestration: reconcile → plan → schedule → watermark → summary.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::plan::{self, LedgerState, Mode, Plan};
use super::reconcile::{self, Reconciliation};
use super::schedule::{ScheduleOptions, Scheduler};
use crate::error::{AppError, Result};
use crate::models::{Config, ModelId, RunStats};
use crate::services::Catalog;
use crate::storage::{Layout, Ledger, LogKind, RecordStore};

/// Outcome of one engine run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub mode: Mode,
    pub stats: RunStats,
    /// Ids re-scheduled because their file was corrupt or missing
    pub repaired: usize,
    /// Ids found by a frontier crawl
    pub discovered: Vec<ModelId>,
    /// Watermark after the run
    pub watermark: Option<ModelId>,
}

/// Read-only view of an output directory.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub logged_downloaded: usize,
    pub valid_files: usize,
    pub invalid_files: usize,
    pub not_found: usize,
    pub error_lines: usize,
    pub retryable: usize,
    pub discovered: usize,
    pub watermark: Option<ModelId>,
}

/// The acquisition engine for one output directory.
pub struct Engine {
    config: Arc<Config>,
    catalog: Arc<dyn Catalog>,
    store: RecordStore,
    ledger: Arc<Ledger>,
    cancel: CancellationToken,
}

impl Engine {
    /// Open the output directory. Fails if it cannot be created.
    pub fn new(
        config: Arc<Config>,
        catalog: Arc<dyn Catalog>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;
        let root = config.storage.output_dir.clone();
        let ledger = Arc::new(Ledger::open(&root)?);
        let store = RecordStore::new(root, Layout::new(config.storage.block_size));

        Ok(Self {
            config,
            catalog,
            store,
            ledger,
            cancel,
        })
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Repair the ledger against the disk and snapshot it for planning.
    pub async fn prepare(&self) -> Result<(LedgerState, Reconciliation)> {
        let ledger = Arc::clone(&self.ledger);
        let layout = self.store.layout();

        let reconciliation = tokio::task::spawn_blocking(move || {
            if let Some(count) = ledger.rebuild_if_needed(layout)? {
                log::info!("Recovered {} ids from disk into an empty ledger", count);
            }
            reconcile::reconcile(&ledger, layout)
        })
        .await
        .map_err(|e| AppError::storage(self.ledger.root(), format!("reconcile task failed: {e}")))??;

        let state = LedgerState {
            downloaded: self.ledger.load(LogKind::Downloaded)?,
            invalid: reconciliation.needs_refetch(),
            not_found: self.ledger.load(LogKind::NotFound)?,
            errors: self.ledger.load_errors()?,
            watermark: self.ledger.read_watermark()?,
        };
        Ok((state, reconciliation))
    }

    /// Execute one run in the given mode.
    pub async fn run(&self, mode: Mode, force: bool) -> Result<RunReport> {
        log::info!("Starting {} in {}", mode, self.ledger.root().display());
        let (state, reconciliation) = self.prepare().await?;

        let latest = match mode {
            Mode::Delta => {
                let latest = self.catalog.latest_max_id().await?;
                log::info!(
                    "Upstream latest id: {}, watermark: {}",
                    latest.map_or_else(|| "unknown".to_string(), |id| id.to_string()),
                    state
                        .watermark
                        .map_or_else(|| "none".to_string(), |id| id.to_string())
                );
                latest
            }
            _ => None,
        };

        let plan = plan::plan(&mode, &state, latest, force)?;
        let options = ScheduleOptions::from_config(
            &self.config.scheduler,
            force || mode.forces_overwrite(),
        );
        let scheduler = Scheduler::new(
            Arc::clone(&self.catalog),
            self.store.clone(),
            Arc::clone(&self.ledger),
            options,
            self.cancel.clone(),
        );

        let mut report = RunReport {
            mode: mode.clone(),
            stats: RunStats::new(0),
            repaired: reconciliation.needs_refetch().len(),
            discovered: Vec::new(),
            watermark: state.watermark,
        };

        match plan {
            Plan::Batch(ids) => {
                let repaired = ids
                    .iter()
                    .filter(|id| state.invalid.contains(id))
                    .count();
                log::info!(
                    "Planned {} ids ({} previously corrupt or missing)",
                    ids.len(),
                    repaired
                );
                report.stats = scheduler.run_batch(ids).await?;

                if let (Mode::Delta, Some(latest)) = (&mode, latest) {
                    // Failed ids stay above the watermark so the next delta run replans them.
                    let failed = report.stats.errors + report.stats.rate_limited;
                    let complete = report.stats.not_dispatched == 0 && failed == 0;
                    if complete && latest > state.watermark.unwrap_or(0) {
                        self.ledger.write_watermark(latest)?;
                        report.watermark = Some(latest);
                        log::info!("Watermark advanced to {}", latest);
                    } else if !complete {
                        log::warn!(
                            "Batch incomplete ({} failed, {} not dispatched); watermark left at its previous value",
                            failed,
                            report.stats.not_dispatched
                        );
                    }
                }
            }
            Plan::Frontier { start } => {
                log::info!(
                    "Crawling from {} until {} consecutive misses",
                    start,
                    self.config.crawl.max_consecutive_misses
                );
                let frontier = scheduler
                    .run_frontier(start, self.config.crawl.max_consecutive_misses)
                    .await?;

                let highest = frontier.discovered.iter().max().copied();
                if let Some(highest) = highest.filter(|_| frontier.exhausted) {
                    if highest > state.watermark.unwrap_or(0) {
                        self.ledger.write_watermark(highest)?;
                        report.watermark = Some(highest);
                        log::info!("Watermark advanced to {}", highest);
                    }
                }
                report.stats = frontier.stats;
                report.discovered = frontier.discovered;
            }
        }

        report.stats.log_summary(&format!("{} complete", mode));
        Ok(report)
    }

    /// Replace `downloaded.txt` with what is actually on disk.
    pub async fn rebuild(&self) -> Result<usize> {
        let ledger = Arc::clone(&self.ledger);
        let layout = self.store.layout();
        tokio::task::spawn_blocking(move || ledger.rebuild(layout))
            .await
            .map_err(|e| AppError::storage(self.ledger.root(), format!("rebuild task failed: {e}")))?
    }

    /// Inspect the output directory without fetching or writing anything.
    pub async fn status(&self) -> Result<StatusReport> {
        let root = self.ledger.root().to_path_buf();
        let layout = self.store.layout();
        let scan = tokio::task::spawn_blocking(move || reconcile::scan(&root, layout))
            .await
            .map_err(|e| AppError::storage(self.ledger.root(), format!("scan task failed: {e}")))??;

        let errors = self.ledger.load_errors()?;
        let state = LedgerState {
            downloaded: self.ledger.load(LogKind::Downloaded)?,
            invalid: scan.invalid.clone(),
            not_found: self.ledger.load(LogKind::NotFound)?,
            errors,
            watermark: self.ledger.read_watermark()?,
        };

        Ok(StatusReport {
            logged_downloaded: state.downloaded.len(),
            valid_files: scan.valid.len(),
            invalid_files: scan.invalid.len(),
            not_found: state.not_found.len(),
            error_lines: state.errors.len(),
            retryable: plan::plan_retry(&state).len(),
            discovered: self.ledger.load(LogKind::Discovered)?.len(),
            watermark: state.watermark,
        })
    }
}
