// src/pipeline/mod.rs

//! Acquisition pipeline.
//!
//! - `reconcile`: keep the ledger honest against the files on disk
//! - `plan`: turn a run mode into candidate ids
//! - `schedule`: fetch, persist and log each candidate
//! - `engine`: run all of the above for one output directory

pub mod circuit_breaker;
pub mod engine;
pub mod plan;
pub mod reconcile;
pub mod schedule;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerResult};
pub use engine::{Engine, RunReport, StatusReport};
pub use plan::{LedgerState, Mode, Plan};
pub use reconcile::{Reconciliation, ScanReport};
pub use schedule::{FrontierReport, ScheduleOptions, Scheduler};
