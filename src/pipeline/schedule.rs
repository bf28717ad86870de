// src/pipeline/schedule.rs

//! Task scheduling.
//!
//! Two strategies share one task body:
//! - `run_batch`: bounded, unordered worker pool over a fixed id list
//! - `run_frontier`: sequential probe that watches for a run of misses
//!
//! Each task ends in exactly one terminal [`TaskState`] and one ledger effect.
//! Only fatal ledger failures propagate out of a task.

use std::sync::Arc;
use std::time::Duration;

use futures::future;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerResult};
use crate::error::Result;
use crate::models::{ModelId, Outcome, RunStats, SchedulerConfig, TaskState};
use crate::services::Catalog;
use crate::storage::{Ledger, RecordStore, format_id};

const PROGRESS_EVERY: usize = 500;

/// Knobs for one scheduler run.
#[derive(Debug, Clone)]
pub struct ScheduleOptions {
    pub concurrency: usize,
    /// Fetch and overwrite even when a valid file exists
    pub force: bool,
    pub request_delay: Duration,
    pub max_consecutive_failures: usize,
}

impl ScheduleOptions {
    pub fn from_config(config: &SchedulerConfig, force: bool) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            force,
            request_delay: Duration::from_millis(config.request_delay_ms),
            max_consecutive_failures: config.max_consecutive_failures,
        }
    }
}

/// Result of a frontier crawl.
#[derive(Debug, Clone)]
pub struct FrontierReport {
    pub stats: RunStats,
    /// Ids found to exist, in probe order
    pub discovered: Vec<ModelId>,
    /// Last id probed, if any
    pub last_probed: Option<ModelId>,
    /// True when the crawl ended on a full run of misses
    pub exhausted: bool,
}

/// Dispatches fetch-and-persist tasks.
pub struct Scheduler {
    catalog: Arc<dyn Catalog>,
    store: RecordStore,
    ledger: Arc<Ledger>,
    options: ScheduleOptions,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        store: RecordStore,
        ledger: Arc<Ledger>,
        options: ScheduleOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            catalog,
            store,
            ledger,
            options,
            cancel,
        }
    }

    fn breaker(&self) -> CircuitBreaker {
        CircuitBreaker::with_config(CircuitBreakerConfig {
            max_consecutive_failures: self.options.max_consecutive_failures,
        })
    }

    /// Run every id through the worker pool.
    ///
    /// Cancellation is checked when a slot frees up: in-flight tasks finish and
    /// log, nothing new is started.
    pub async fn run_batch(&self, ids: Vec<ModelId>) -> Result<RunStats> {
        let mut stats = RunStats::new(ids.len());
        let mut breaker = self.breaker();
        // A tripped breaker stops this run only; the caller's token stays untouched.
        let stop = self.cancel.child_token();
        let gate = stop.clone();

        let mut tasks = stream::iter(ids)
            .take_while(move |_| future::ready(!gate.is_cancelled()))
            .map(|id| async move { self.process(id).await })
            .buffer_unordered(self.options.concurrency);

        while let Some(result) = tasks.next().await {
            let state = result?;
            stats.record(state);

            if let CircuitBreakerResult::Tripped { .. } = breaker.observe(state) {
                stop.cancel();
            }

            let done = stats.completed();
            if done % PROGRESS_EVERY == 0 {
                log::info!(
                    "Progress: {}/{} (saved {}, not found {}, errors {})",
                    done,
                    stats.planned,
                    stats.persisted,
                    stats.not_found,
                    stats.errors + stats.rate_limited
                );
            }

            if !self.options.request_delay.is_zero() {
                tokio::time::sleep(self.options.request_delay).await;
            }
        }

        stats.finish();
        if stats.not_dispatched > 0 {
            log::warn!(
                "Stopped early: {} ids were not dispatched and remain pending",
                stats.not_dispatched
            );
        }
        Ok(stats)
    }

    /// Probe upward from `start` until `max_misses` consecutive ids are not found.
    ///
    /// Errors and rate limits neither extend nor break a run of misses.
    pub async fn run_frontier(&self, start: ModelId, max_misses: u32) -> Result<FrontierReport> {
        let mut report = FrontierReport {
            stats: RunStats::new(0),
            discovered: Vec::new(),
            last_probed: None,
            exhausted: false,
        };
        let mut breaker = self.breaker();
        let mut misses = 0u32;
        let mut next = Some(start);

        while let Some(id) = next {
            if self.cancel.is_cancelled() {
                log::warn!("Crawl stopped by request before {}", format_id(id));
                break;
            }
            if breaker.is_tripped() {
                break;
            }

            report.stats.planned += 1;
            let state = self.process(id).await?;
            report.stats.record(state);
            report.last_probed = Some(id);
            breaker.observe(state);

            match state {
                TaskState::LoggedNotFound => {
                    misses += 1;
                    if misses >= max_misses {
                        report.exhausted = true;
                        log::info!(
                            "Crawl reached {} consecutive misses at {}",
                            misses,
                            format_id(id)
                        );
                        break;
                    }
                }
                TaskState::Persisted | TaskState::Skipped => {
                    misses = 0;
                    self.ledger.record_discovered(id)?;
                    report.discovered.push(id);
                    log::info!("[discovered] {}", format_id(id));
                }
                TaskState::LoggedRateLimited | TaskState::LoggedError => {}
            }

            if !self.options.request_delay.is_zero() {
                tokio::time::sleep(self.options.request_delay).await;
            }
            next = id.checked_add(1);
        }

        report.stats.finish();
        Ok(report)
    }

    /// Fetch one id and settle its outcome.
    pub async fn process(&self, id: ModelId) -> Result<TaskState> {
        if !self.options.force && self.store.is_valid(id).await {
            log::debug!("[{}] {}", TaskState::Skipped, format_id(id));
            return Ok(TaskState::Skipped);
        }

        let outcome = self.catalog.classify(id).await;
        self.settle(id, outcome).await
    }

    /// Persist and/or log an outcome. The file is written before the ledger
    /// line so a crash in between leaves a file the reconciler will adopt.
    async fn settle(&self, id: ModelId, outcome: Outcome) -> Result<TaskState> {
        let key = format_id(id);
        match outcome {
            Outcome::Success(record) => match self.store.write(id, &record).await {
                Ok(_) => {
                    self.ledger.record_downloaded(id)?;
                    log::debug!("[{}] {} {}", TaskState::Persisted, key, record.summary());
                    Ok(TaskState::Persisted)
                }
                Err(e) => {
                    let reason = format!("ERR write failed: {e}");
                    log::warn!("[{}] {} {}", TaskState::LoggedError, key, reason);
                    self.ledger.record_error(id, &reason)?;
                    Ok(TaskState::LoggedError)
                }
            },
            Outcome::NotFound => {
                self.ledger.record_not_found(id)?;
                log::debug!("[{}] {}", TaskState::LoggedNotFound, key);
                Ok(TaskState::LoggedNotFound)
            }
            Outcome::RateLimited => {
                let reason = Outcome::RateLimited.error_reason().unwrap_or_default();
                self.ledger.record_error(id, &reason)?;
                log::warn!("[{}] {}", TaskState::LoggedRateLimited, key);
                Ok(TaskState::LoggedRateLimited)
            }
            Outcome::TransientError(reason) | Outcome::PermanentError(reason) => {
                self.ledger.record_error(id, &reason)?;
                log::warn!("[{}] {} {}", TaskState::LoggedError, key, reason);
                Ok(TaskState::LoggedError)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Layout, LogKind};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::{BTreeSet, HashMap};
    use std::sync::Mutex;
    use tempfile::TempDir;

    use crate::models::Record;

    /// Scripted catalog: ids in `found` succeed, ids in `errors` fail, the rest are 404.
    #[derive(Default)]
    struct Scripted {
        found: BTreeSet<ModelId>,
        errors: HashMap<ModelId, Outcome>,
        calls: Mutex<Vec<ModelId>>,
    }

    #[async_trait]
    impl Catalog for Scripted {
        async fn classify(&self, id: ModelId) -> Outcome {
            self.calls.lock().unwrap().push(id);
            if let Some(outcome) = self.errors.get(&id) {
                return outcome.clone();
            }
            if self.found.contains(&id) {
                Outcome::Success(Record::new(json!({ "id": id })))
            } else {
                Outcome::NotFound
            }
        }

        async fn latest_max_id(&self) -> Result<Option<ModelId>> {
            Ok(self.found.iter().max().copied())
        }
    }

    fn options(concurrency: usize) -> ScheduleOptions {
        ScheduleOptions {
            concurrency,
            force: false,
            request_delay: Duration::ZERO,
            max_consecutive_failures: 0,
        }
    }

    fn build(
        tmp: &TempDir,
        catalog: Arc<Scripted>,
        options: ScheduleOptions,
        cancel: CancellationToken,
    ) -> (Scheduler, Arc<Ledger>) {
        let ledger = Arc::new(Ledger::open(tmp.path()).unwrap());
        let store = RecordStore::new(tmp.path(), Layout::default());
        (
            Scheduler::new(catalog, store, Arc::clone(&ledger), options, cancel),
            ledger,
        )
    }

    #[tokio::test]
    async fn test_batch_routes_outcomes() {
        let tmp = TempDir::new().unwrap();
        let catalog = Arc::new(Scripted {
            found: BTreeSet::from([1, 3]),
            errors: HashMap::from([
                (4, Outcome::RateLimited),
                (5, Outcome::TransientError("timeout".into())),
            ]),
            ..Scripted::default()
        });
        let (scheduler, ledger) =
            build(&tmp, catalog, options(3), CancellationToken::new());

        let stats = scheduler.run_batch(vec![1, 2, 3, 4, 5]).await.unwrap();

        assert_eq!(stats.persisted, 2);
        assert_eq!(stats.not_found, 1);
        assert_eq!(stats.rate_limited, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.not_dispatched, 0);
        assert_eq!(
            ledger.load(LogKind::Downloaded).unwrap(),
            BTreeSet::from([1, 3])
        );
        assert_eq!(ledger.load(LogKind::NotFound).unwrap(), BTreeSet::from([2]));
        let errors = ledger.load_errors().unwrap();
        assert_eq!(errors.len(), 2);
        assert!(
            errors
                .iter()
                .any(|e| e.id == 4 && e.reason == "429 Too Many Requests")
        );
    }

    #[tokio::test]
    async fn test_batch_skips_valid_files_unless_forced() {
        let tmp = TempDir::new().unwrap();
        let catalog = Arc::new(Scripted {
            found: BTreeSet::from([1]),
            ..Scripted::default()
        });
        let store = RecordStore::new(tmp.path(), Layout::default());
        store.write(1, &Record::new(json!({"old": true}))).await.unwrap();

        let (scheduler, _) = build(
            &tmp,
            Arc::clone(&catalog),
            options(2),
            CancellationToken::new(),
        );
        let stats = scheduler.run_batch(vec![1]).await.unwrap();
        assert_eq!(stats.skipped, 1);
        assert!(catalog.calls.lock().unwrap().is_empty());

        let mut forced = options(2);
        forced.force = true;
        let (scheduler, _) = build(
            &tmp,
            Arc::clone(&catalog),
            forced,
            CancellationToken::new(),
        );
        let stats = scheduler.run_batch(vec![1]).await.unwrap();
        assert_eq!(stats.persisted, 1);
        assert_eq!(catalog.calls.lock().unwrap().as_slice(), &[1]);
    }

    #[tokio::test]
    async fn test_cancelled_batch_dispatches_nothing() {
        let tmp = TempDir::new().unwrap();
        let catalog = Arc::new(Scripted::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (scheduler, _) = build(&tmp, Arc::clone(&catalog), options(4), cancel);

        let stats = scheduler.run_batch((1..=50).collect()).await.unwrap();

        assert_eq!(stats.completed(), 0);
        assert_eq!(stats.not_dispatched, 50);
        assert!(catalog.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_breaker_stops_dispatch() {
        let tmp = TempDir::new().unwrap();
        let errors = (1..=100)
            .map(|id| (id, Outcome::RateLimited))
            .collect::<HashMap<_, _>>();
        let catalog = Arc::new(Scripted {
            errors,
            ..Scripted::default()
        });
        let mut opts = options(1);
        opts.max_consecutive_failures = 5;
        let cancel = CancellationToken::new();
        let (scheduler, _) = build(&tmp, Arc::clone(&catalog), opts, cancel.clone());

        let stats = scheduler.run_batch((1..=100).collect()).await.unwrap();

        assert_eq!(stats.rate_limited, 5);
        assert_eq!(stats.not_dispatched, 95);
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_frontier_stops_after_miss_window() {
        let tmp = TempDir::new().unwrap();
        let catalog = Arc::new(Scripted {
            found: BTreeSet::from([10, 11, 14]),
            ..Scripted::default()
        });
        let (scheduler, ledger) = build(
            &tmp,
            Arc::clone(&catalog),
            options(1),
            CancellationToken::new(),
        );

        let report = scheduler.run_frontier(10, 5).await.unwrap();

        assert!(report.exhausted);
        assert_eq!(report.discovered, vec![10, 11, 14]);
        assert_eq!(report.last_probed, Some(19));
        assert_eq!(
            catalog.calls.lock().unwrap().as_slice(),
            &(10..=19).collect::<Vec<_>>()[..]
        );
        assert_eq!(
            ledger.load(LogKind::Discovered).unwrap(),
            BTreeSet::from([10, 11, 14])
        );
    }

    #[tokio::test]
    async fn test_frontier_errors_do_not_count_as_misses() {
        let tmp = TempDir::new().unwrap();
        let catalog = Arc::new(Scripted {
            found: BTreeSet::from([1]),
            errors: HashMap::from([(3, Outcome::TransientError("timeout".into()))]),
            ..Scripted::default()
        });
        let (scheduler, _) = build(&tmp, catalog, options(1), CancellationToken::new());

        let report = scheduler.run_frontier(1, 3).await.unwrap();

        // 2 miss, 3 error, 4 and 5 miss
        assert_eq!(report.last_probed, Some(5));
        assert_eq!(report.stats.errors, 1);
        assert_eq!(report.stats.not_found, 3);
    }
}
