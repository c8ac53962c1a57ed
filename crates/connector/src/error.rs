//! Error types for self-healing connectors
use thiserror::Error;

/// Result type for connector operations, generic over the resource error `E`.
pub type Result<T, E> = std::result::Result<T, Error<E>>;

/// Error returned by every public connector call.
///
/// Errors raised by the resource itself (from the factory or from an
/// operation passed to [`execute`](crate::Connector::execute)) are carried
/// unchanged in [`Error::Resource`]; the remaining variants describe the
/// connector's own state.
#[derive(Error, Debug)]
pub enum Error<E> {
    /// The resource or the factory failed.
    #[error("resource error: {0}")]
    Resource(#[source] E),

    /// The connector has been closed; it will never accept calls again.
    #[error("connector is closed")]
    Closed,

    /// No resource has ever been opened successfully.
    #[error("connector is not connected")]
    NotConnected,

    /// The resource broke and has not been replaced yet.
    #[error("connector is broken, recovery in progress")]
    Broken,
}

impl<E> Error<E> {
    /// Check if this error is retryable
    ///
    /// `Broken` clears once the recovery loop succeeds; every other variant
    /// either is terminal or belongs to the caller to judge.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Broken)
    }

    /// Borrow the underlying resource error, if this is one.
    #[must_use]
    pub fn as_resource(&self) -> Option<&E> {
        match self {
            Self::Resource(e) => Some(e),
            _ => None,
        }
    }

    /// Take the underlying resource error, if this is one.
    pub fn into_resource(self) -> Option<E> {
        match self {
            Self::Resource(e) => Some(e),
            _ => None,
        }
    }

    /// Whether the connector has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Errors produced while validating connector settings.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A delay was configured with a negative value.
    #[error("Configuration error: `{field}` must not be negative (got {value}ms)")]
    NegativeDelay {
        /// The offending settings field
        field: &'static str,
        /// The configured value in milliseconds
        value: i64,
    },
}

/// Error returned by a state-change listener.
#[derive(Error, Debug)]
pub enum ListenerError {
    /// The listener wants the owning connector shut down.
    ///
    /// Dispatch of the current event stops at this listener.
    #[error("listener requested shutdown")]
    Cancelled,

    /// The listener failed; the failure is logged and dispatch continues.
    #[error("listener failed: {0}")]
    Failed(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ListenerError {
    /// Wrap any error as a listener failure.
    pub fn failed<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Failed(error.into())
    }
}
