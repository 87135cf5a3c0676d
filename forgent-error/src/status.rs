//! Error status - how a caller should treat an error

use std::fmt;

/// Whether an error is worth retrying.
///
/// Forgent never retries agent turns on its own; the status is surfaced so the
/// user can decide whether resubmitting makes sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorStatus {
    /// Retrying will not help
    Permanent,
    /// Retrying may succeed
    Temporary,
}

impl ErrorStatus {
    /// Returns the status as a static string
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorStatus::Permanent => "permanent",
            ErrorStatus::Temporary => "temporary",
        }
    }

    /// Check if the status allows a retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorStatus::Temporary)
    }
}

impl fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
