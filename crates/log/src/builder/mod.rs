//! Logger builder
//!
//! - `reload`: runtime filter reload

mod reload;

pub use reload::ReloadHandle;

use tracing_subscriber::layer::{Layer, Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt};

use crate::config::{Config, Format};
use crate::error::{LogError, LogResult};

type Filtered = Layered<reload::FilterLayer, Registry>;
type FmtLayer = Box<dyn Layer<Filtered> + Send + Sync + 'static>;

/// Apply the display toggles shared by every format, then box the layer
/// (with or without timestamps).
macro_rules! finish_fmt_layer {
    ($layer:expr, $display:expr) => {{
        let layer = $layer
            .with_writer(std::io::stderr)
            .with_ansi($display.colors)
            .with_target($display.target)
            .with_file($display.source)
            .with_line_number($display.source)
            .with_thread_names($display.thread_names);
        if $display.time {
            layer.boxed()
        } else {
            layer.without_time().boxed()
        }
    }};
}

/// Logger builder
#[derive(Debug)]
pub struct LoggerBuilder {
    config: Config,
}

/// Keeps the logger's handles alive.
#[derive(Debug)]
pub struct LoggerGuard {
    reload: Option<ReloadHandle>,
}

impl LoggerBuilder {
    /// Create builder from config
    #[must_use]
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    /// Build and install the global subscriber.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - the filter string cannot be parsed
    /// - a global subscriber is already installed
    pub fn build(self) -> LogResult<LoggerGuard> {
        let filter = EnvFilter::try_new(&self.config.level)
            .map_err(|e| LogError::filter(&self.config.level, e))?;
        let (filter_layer, reload) =
            reload::filter_layer(filter, &self.config.level, self.config.reloadable);

        Registry::default()
            .with(filter_layer)
            .with(self.fmt_layer())
            .try_init()
            .map_err(|_| LogError::AlreadyInitialized)?;

        Ok(LoggerGuard { reload })
    }

    fn fmt_layer(&self) -> FmtLayer {
        let display = &self.config.display;
        match self.config.format {
            Format::Pretty => finish_fmt_layer!(fmt::layer().pretty(), display),
            Format::Compact => finish_fmt_layer!(fmt::layer().compact(), display),
            Format::Json => finish_fmt_layer!(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .flatten_event(display.flatten),
                display
            ),
        }
    }
}

impl LoggerGuard {
    pub(crate) fn noop() -> Self {
        Self { reload: None }
    }

    /// Reload handle, present when the config asked for `reloadable`.
    #[must_use]
    pub fn reload_handle(&self) -> Option<&ReloadHandle> {
        self.reload.as_ref()
    }
}
