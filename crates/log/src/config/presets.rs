//! Configuration presets

use super::{Config, DisplayConfig, Format};

impl Config {
    /// Configuration from `TETHER_LOG` (or `RUST_LOG`) and `TETHER_LOG_FORMAT`.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(level) = std::env::var("TETHER_LOG") {
            config.level = level;
        } else if let Ok(level) = std::env::var("RUST_LOG") {
            config.level = level;
        }

        if let Ok(format) = std::env::var("TETHER_LOG_FORMAT") {
            config.format = Format::parse_lossy(&format);
        }

        config.display.parse_env();
        config
    }

    /// Development configuration (pretty, debug level)
    #[must_use]
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            format: Format::Pretty,
            display: DisplayConfig {
                colors: true,
                source: true,
                ..DisplayConfig::default()
            },
            ..Self::default()
        }
    }

    /// Production configuration (JSON, info level)
    #[must_use]
    pub fn production() -> Self {
        Self {
            level: "info".to_string(),
            format: Format::Json,
            display: DisplayConfig {
                colors: false,
                source: false,
                flatten: true,
                ..DisplayConfig::default()
            },
            ..Self::default()
        }
    }

    /// Test configuration: everything, no colors, no timestamps
    #[must_use]
    pub fn test() -> Self {
        Self {
            level: "trace".to_string(),
            format: Format::Compact,
            display: DisplayConfig {
                colors: false,
                time: false,
                ..DisplayConfig::default()
            },
            ..Self::default()
        }
    }
}
