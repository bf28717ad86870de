// src/models/outcome.rs

use std::fmt;

use super::Record;

/// Result of a single fetch attempt for one id.
///
/// Produced by the catalog, consumed immediately by the scheduler. Never
/// stored as-is: it is reduced to a file write and/or a ledger line.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Valid document retrieved
    Success(Record),
    /// Upstream says the id does not exist (permanent)
    NotFound,
    /// Upstream answered 429; deferred to a retry run
    RateLimited,
    /// Network-class failure (timeouts, connection errors, 5xx)
    TransientError(String),
    /// Any other unclassified failure (other 4xx, undecodable body)
    PermanentError(String),
}

impl Outcome {
    /// Reason written to `errors.txt`, or `None` for outcomes that are not errors.
    pub fn error_reason(&self) -> Option<String> {
        match self {
            Outcome::Success(_) | Outcome::NotFound => None,
            Outcome::RateLimited => Some("429 Too Many Requests".to_string()),
            Outcome::TransientError(reason) | Outcome::PermanentError(reason) => {
                Some(reason.clone())
            }
        }
    }
}

/// Terminal state of one scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// File written and `downloaded` appended
    Persisted,
    /// A valid file was already present; nothing fetched
    Skipped,
    /// `notfound` appended
    LoggedNotFound,
    /// `errors` appended with a 429 reason
    LoggedRateLimited,
    /// `errors` appended with any other reason
    LoggedError,
}

impl TaskState {
    /// Whether this state counts toward a failure streak.
    pub fn is_failure(self) -> bool {
        matches!(self, TaskState::LoggedRateLimited | TaskState::LoggedError)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskState::Persisted => "saved",
            TaskState::Skipped => "skip",
            TaskState::LoggedNotFound => "not found",
            TaskState::LoggedRateLimited => "rate limited",
            TaskState::LoggedError => "error",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_reason() {
        assert_eq!(Outcome::NotFound.error_reason(), None);
        assert_eq!(
            Outcome::RateLimited.error_reason().as_deref(),
            Some("429 Too Many Requests")
        );
        assert_eq!(
            Outcome::TransientError("timeout".into())
                .error_reason()
                .as_deref(),
            Some("timeout")
        );
        assert_eq!(
            Outcome::PermanentError("403 Forbidden".into())
                .error_reason()
                .as_deref(),
            Some("403 Forbidden")
        );
    }

    #[test]
    fn test_failure_states() {
        assert!(TaskState::LoggedError.is_failure());
        assert!(TaskState::LoggedRateLimited.is_failure());
        assert!(!TaskState::LoggedNotFound.is_failure());
        assert!(!TaskState::Skipped.is_failure());
    }
}
