// src/models/stats.rs

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::TaskState;

/// Run-level counters, reported at completion.
#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Candidate ids handed to the scheduler
    pub planned: usize,
    pub persisted: usize,
    pub skipped: usize,
    pub not_found: usize,
    pub rate_limited: usize,
    pub errors: usize,
    /// Candidates never dispatched because the run was stopped
    pub not_dispatched: usize,
}

impl RunStats {
    pub fn new(planned: usize) -> Self {
        let now = Utc::now();
        Self {
            start_time: now,
            end_time: now,
            planned,
            persisted: 0,
            skipped: 0,
            not_found: 0,
            rate_limited: 0,
            errors: 0,
            not_dispatched: 0,
        }
    }

    pub fn record(&mut self, state: TaskState) {
        match state {
            TaskState::Persisted => self.persisted += 1,
            TaskState::Skipped => self.skipped += 1,
            TaskState::LoggedNotFound => self.not_found += 1,
            TaskState::LoggedRateLimited => self.rate_limited += 1,
            TaskState::LoggedError => self.errors += 1,
        }
    }

    /// Number of tasks that reached a terminal state.
    pub fn completed(&self) -> usize {
        self.persisted + self.skipped + self.not_found + self.rate_limited + self.errors
    }

    /// Close the run: stamp the end time and count what was left over.
    pub fn finish(&mut self) {
        self.end_time = Utc::now();
        self.not_dispatched = self.planned.saturating_sub(self.completed());
    }

    /// Emit the summary block.
    pub fn log_summary(&self, title: &str) {
        let elapsed = self.end_time - self.start_time;
        log::info!("[SUMMARY] {}", title);
        log::info!("    planned: {}", self.planned);
        log::info!("    saved: {}", self.persisted);
        log::info!("    skipped: {}", self.skipped);
        log::info!("    not found: {}", self.not_found);
        log::info!("    rate limited: {}", self.rate_limited);
        log::info!("    errors: {}", self.errors);
        if self.not_dispatched > 0 {
            log::info!("    not dispatched: {}", self.not_dispatched);
        }
        log::info!("    elapsed: {}s", elapsed.num_seconds());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_leftovers() {
        let mut stats = RunStats::new(6);
        stats.record(TaskState::Persisted);
        stats.record(TaskState::Persisted);
        stats.record(TaskState::LoggedNotFound);
        stats.record(TaskState::LoggedRateLimited);
        stats.finish();

        assert_eq!(stats.completed(), 4);
        assert_eq!(stats.persisted, 2);
        assert_eq!(stats.not_dispatched, 2);
        assert!(stats.end_time >= stats.start_time);
    }
}
