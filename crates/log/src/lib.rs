//! # Tether Log
//!
//! Logging setup shared by tether crates: one call installs a `tracing`
//! subscriber configured from presets or the environment.
//!
//! ```no_run
//! let _guard = tether_log::auto_init()?;
//! tracing::info!(port = 7000, "connecting");
//! # Ok::<(), tether_log::LogError>(())
//! ```
//!
//! Environment variables read by [`Config::from_env`]:
//! - `TETHER_LOG` (falls back to `RUST_LOG`): filter directives
//! - `TETHER_LOG_FORMAT`: `pretty`, `compact` or `json`
//! - `TETHER_LOG_TIME`, `TETHER_LOG_SOURCE`, `TETHER_LOG_COLORS`: `0`/`1`

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod builder;
mod config;
mod error;

pub use builder::{LoggerBuilder, LoggerGuard, ReloadHandle};
pub use config::{Config, DisplayConfig, Format};
pub use error::{LogError, LogResult};

/// Pick a configuration and install it, unless a subscriber already exists.
///
/// `TETHER_LOG` / `RUST_LOG` select [`Config::from_env`]; otherwise debug
/// builds get [`Config::development`] and release builds
/// [`Config::production`].
pub fn auto_init() -> LogResult<LoggerGuard> {
    if tracing::dispatcher::has_been_set() {
        return Ok(LoggerGuard::noop());
    }

    let config = if std::env::var("TETHER_LOG").is_ok() || std::env::var("RUST_LOG").is_ok() {
        Config::from_env()
    } else if cfg!(debug_assertions) {
        Config::development()
    } else {
        Config::production()
    };
    idempotent(init_with(config))
}

/// Initialize with default configuration
pub fn init() -> LogResult<LoggerGuard> {
    init_with(Config::default())
}

/// Initialize with custom configuration
pub fn init_with(config: Config) -> LogResult<LoggerGuard> {
    LoggerBuilder::from_config(config).build()
}

/// Initialize for tests. Safe to call from every test.
pub fn init_test() -> LogResult<LoggerGuard> {
    if tracing::dispatcher::has_been_set() {
        return Ok(LoggerGuard::noop());
    }
    idempotent(init_with(Config::test()))
}

fn idempotent(result: LogResult<LoggerGuard>) -> LogResult<LoggerGuard> {
    match result {
        Err(LogError::AlreadyInitialized) => Ok(LoggerGuard::noop()),
        other => other,
    }
}
