//! Error taxonomy for runner operations.
//!
//! Domain failures surface as [`RunnerError`]. Duration overflows are normally
//! consumed by the service as [`crate::core::timing::Overflow`] values; the
//! strict check [`crate::session::TestSession::ensure_time_limits`] reports them
//! as errors.

use crate::core::types::TimeScope;

/// Result alias for runner operations.
pub type Result<T> = std::result::Result<T, RunnerError>;

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The context was produced by another runner instance.
    #[error("context was not produced by this runner (operation '{operation}')")]
    ContextTypeMismatch { operation: String },

    #[error("test session '{session_id}' is closed")]
    SessionClosed { session_id: String },

    /// Malformed item reference or undecodable stored state.
    #[error("inconsistent data: {0}")]
    InconsistentData(String),

    #[error("compiled file not found: {path}")]
    FileNotFound { path: String },

    #[error("maximum duration of {scope} '{source_id}' not respected")]
    DurationOverflow { scope: TimeScope, source_id: String },

    #[error("minimum duration of {scope} '{source_id}' not reached")]
    DurationUnderflow { scope: TimeScope, source_id: String },

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("navigation rejected: {0}")]
    NavigationRejected(String),

    #[error("attempt rejected for item '{item}': {reason}")]
    AttemptRejected { item: String, reason: String },

    #[error("storage failure: {0}")]
    Storage(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    #[must_use]
    pub fn inconsistent(message: impl Into<String>) -> Self {
        Self::InconsistentData(message.into())
    }

    #[must_use]
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::NavigationRejected(message.into())
    }

    /// True for failures that describe a domain rule rather than a broken collaborator.
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            Self::DurationOverflow { .. }
                | Self::DurationUnderflow { .. }
                | Self::NavigationRejected(_)
                | Self::AttemptRejected { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_overflow_message_names_scope_and_source() {
        let err = RunnerError::DurationOverflow {
            scope: TimeScope::Section,
            source_id: "S01".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "maximum duration of assessmentSection 'S01' not respected"
        );
        assert!(err.is_domain());
    }

    #[test]
    fn storage_errors_are_not_domain_failures() {
        let err = RunnerError::storage("disk full");
        assert!(!err.is_domain());
        assert_eq!(err.to_string(), "storage failure: disk full");
    }
}
