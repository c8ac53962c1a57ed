//! Connector and recovery-worker states.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Lifecycle state of a connector.
///
/// ```text
/// Disconnected --connect()--> Opening --ok--> Open
///                               |              |
///                               +--err--> Broken <--fatal error / mark_broken()
///                                          |
///                                          +--recovered--> Open
/// any --close()--> Closed (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ConnectorState {
    /// Constructed, `connect()` not called yet.
    Disconnected,
    /// The first `connect()` is running the factory.
    Opening,
    /// A live resource is installed.
    Open,
    /// The resource is unusable; the recovery loop is replacing it.
    Broken,
    /// Terminal.
    Closed,
}

impl ConnectorState {
    /// Returns `true` if a resource is installed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns `true` if the connector was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Returns the name of the state.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Opening => "opening",
            Self::Open => "open",
            Self::Broken => "broken",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Phase of the background recovery worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RecoveryPhase {
    /// Idle until the connector breaks.
    Waiting,
    /// Backing off or calling the factory.
    Attempting,
    /// The worker has exited.
    Stopped,
}

impl fmt::Display for RecoveryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Attempting => write!(f, "attempting"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}
