//! # Tether Connector
//!
//! Self-healing wrapper around an externally supplied I/O resource: a
//! socket, a serial port, a device handle.
//!
//! A [`Connector`] opens its resource through a [`Factory`], runs caller
//! operations against it via [`Connector::execute`], and watches the errors
//! those operations return. An error the configured broken predicate marks
//! as fatal flips the connector to `Broken`, publishes
//! [`StateChange::Broken`], and wakes a background task that reopens the
//! resource (with backoff) until it succeeds, then publishes
//! [`StateChange::Fixed`].
//!
//! Callers are never blocked by recovery: while broken, `execute` fails
//! immediately with [`Error::Broken`]. Subscribe to state changes to learn
//! when to retry.
//!
//! Typed facades over the connector live in [`adapters`].

pub mod adapters;
pub mod config;
pub mod connector;
pub mod error;
pub mod factory;
pub mod notifier;
pub mod state;
pub mod testing;

mod recovery;

pub use config::{Config, ConfigBuilder, Settings};
pub use connector::Connector;
pub use error::{ConfigError, Error, ListenerError, Result};
pub use factory::{Factory, FnFactory};
pub use notifier::{Dispatch, StateChange, StateNotifier, Subscription};
pub use state::{ConnectorState, RecoveryPhase};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::config::{Config, Settings};
    pub use crate::connector::Connector;
    pub use crate::error::{Error, ListenerError, Result};
    pub use crate::factory::Factory;
    pub use crate::notifier::{StateChange, Subscription};
    pub use crate::state::{ConnectorState, RecoveryPhase};
}
