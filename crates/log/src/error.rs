//! Error types for logger setup

/// Result type for logger operations
pub type LogResult<T> = Result<T, LogError>;

/// Logger setup failures
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// The filter directive string could not be parsed
    #[error("invalid filter '{filter}': {reason}")]
    Filter {
        /// Directive string as given
        filter: String,
        /// Parser message
        reason: String,
    },

    /// A global subscriber is already installed
    #[error("a global subscriber is already installed")]
    AlreadyInitialized,

    /// Runtime reload of the filter failed
    #[error("failed to reload filter: {0}")]
    Reload(String),
}

impl LogError {
    pub(crate) fn filter(filter: &str, reason: impl std::fmt::Display) -> Self {
        Self::Filter {
            filter: filter.to_string(),
            reason: reason.to_string(),
        }
    }
}
