//! Logger configuration
//!
//! - [`Config`]: filter, output format and display toggles
//! - presets: `development()`, `production()`, `from_env()`

mod presets;

use serde::{Deserialize, Serialize};

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Filter directives (e.g. `"info"`, `"tether_connector=debug,warn"`)
    pub level: String,

    /// Output format
    pub format: Format,

    /// Display toggles
    pub display: DisplayConfig,

    /// Install the filter behind a reload layer
    pub reloadable: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: Format::Compact,
            display: DisplayConfig::default(),
            reloadable: false,
        }
    }
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Multi-line, human-readable
    Pretty,
    /// Single line per event
    #[default]
    Compact,
    /// One JSON object per event
    Json,
}

impl Format {
    /// Parse a format name; unknown names fall back to [`Format::Compact`].
    #[must_use]
    pub fn parse_lossy(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "pretty" => Self::Pretty,
            "json" => Self::Json,
            _ => Self::Compact,
        }
    }
}

/// Display configuration
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Show timestamps
    pub time: bool,
    /// Show source location (`file:line`)
    pub source: bool,
    /// Show target module
    pub target: bool,
    /// Show thread names
    pub thread_names: bool,
    /// Use ANSI colors
    pub colors: bool,
    /// Flatten JSON events
    pub flatten: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            time: true,
            source: cfg!(debug_assertions),
            target: true,
            thread_names: false,
            colors: cfg!(feature = "ansi") && std::io::IsTerminal::is_terminal(&std::io::stderr()),
            flatten: true,
        }
    }
}

impl DisplayConfig {
    fn parse_env(&mut self) {
        if let Some(v) = env_flag("TETHER_LOG_TIME") {
            self.time = v;
        }
        if let Some(v) = env_flag("TETHER_LOG_SOURCE") {
            self.source = v;
        }
        if let Some(v) = env_flag("TETHER_LOG_COLORS") {
            self.colors = v;
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name).ok().map(|v| flag_value(&v))
}

fn flag_value(value: &str) -> bool {
    !matches!(value.trim(), "0" | "false" | "off" | "")
}
