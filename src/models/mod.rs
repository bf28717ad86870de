// src/models/mod.rs

//! Domain models for the acquisition engine.

mod config;
mod outcome;
mod record;
mod stats;

// Re-export all public types
pub use config::{Config, CrawlConfig, FetcherConfig, SchedulerConfig, StorageConfig};
pub use outcome::{Outcome, TaskState};
pub use record::{ModelId, Record, RecordSummary};
pub use stats::RunStats;
