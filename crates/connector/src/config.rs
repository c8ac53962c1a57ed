//! Connector configuration
//!
//! [`Config`] is the immutable value a connector runs with. [`Settings`] is
//! its serializable subset (the two delays) so that an external loader can
//! produce it from JSON, YAML or the environment; merge it into a
//! [`ConfigBuilder`] with [`ConfigBuilder::apply`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default wait between two failed recovery attempts.
pub const DEFAULT_FIX_RETRY_DELAY: Duration = Duration::from_millis(2000);

/// Default wait before the first recovery attempt.
pub const DEFAULT_RECOVERY_DELAY: Duration = Duration::from_millis(1000);

/// Default bound on disposing of a broken or closed resource.
pub const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Classifies resource errors as fatal (`true`) or transient (`false`).
pub type BrokenPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Immutable connector configuration.
pub struct Config<E> {
    /// Wait between consecutive recovery attempts.
    pub fix_retry_delay: Duration,
    /// Wait after breaking before the first recovery attempt.
    pub recovery_delay: Duration,
    /// How long a `disconnect` may take before it is abandoned.
    pub disconnect_timeout: Duration,
    broken_predicate: Option<BrokenPredicate<E>>,
}

impl<E> Config<E> {
    /// Start building a configuration from the defaults.
    #[must_use]
    pub fn builder() -> ConfigBuilder<E> {
        ConfigBuilder::default()
    }

    /// Configuration with the given delays and no broken predicate.
    #[must_use]
    pub fn with_delays(fix_retry_delay: Duration, recovery_delay: Duration) -> Self {
        Self {
            fix_retry_delay,
            recovery_delay,
            disconnect_timeout: DEFAULT_DISCONNECT_TIMEOUT,
            broken_predicate: None,
        }
    }

    /// Whether `error` means the resource is unusable.
    ///
    /// Without a predicate no error is considered fatal.
    pub fn is_broken(&self, error: &E) -> bool {
        self.broken_predicate
            .as_ref()
            .is_some_and(|predicate| predicate(error))
    }

    /// Whether a broken predicate has been configured.
    #[must_use]
    pub fn has_broken_predicate(&self) -> bool {
        self.broken_predicate.is_some()
    }

    /// The serializable part of this configuration.
    #[must_use]
    pub fn settings(&self) -> Settings {
        Settings {
            fix_retry_delay_ms: duration_ms(self.fix_retry_delay),
            recovery_delay_ms: duration_ms(self.recovery_delay),
        }
    }
}

impl<E> Default for Config<E> {
    fn default() -> Self {
        Self::with_delays(DEFAULT_FIX_RETRY_DELAY, DEFAULT_RECOVERY_DELAY)
    }
}

impl<E> Clone for Config<E> {
    fn clone(&self) -> Self {
        Self {
            fix_retry_delay: self.fix_retry_delay,
            recovery_delay: self.recovery_delay,
            disconnect_timeout: self.disconnect_timeout,
            broken_predicate: self.broken_predicate.clone(),
        }
    }
}

impl<E> fmt::Debug for Config<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("fix_retry_delay", &self.fix_retry_delay)
            .field("recovery_delay", &self.recovery_delay)
            .field("disconnect_timeout", &self.disconnect_timeout)
            .field("broken_predicate", &self.has_broken_predicate())
            .finish()
    }
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for [`Config`].
pub struct ConfigBuilder<E> {
    config: Config<E>,
}

impl<E> Default for ConfigBuilder<E> {
    fn default() -> Self {
        Self {
            config: Config::default(),
        }
    }
}

impl<E> fmt::Debug for ConfigBuilder<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl<E> ConfigBuilder<E> {
    /// Set the wait between consecutive recovery attempts.
    pub fn fix_retry_delay(mut self, delay: Duration) -> Self {
        self.config.fix_retry_delay = delay;
        self
    }

    /// Set the wait before the first recovery attempt.
    pub fn recovery_delay(mut self, delay: Duration) -> Self {
        self.config.recovery_delay = delay;
        self
    }

    /// Bound how long disposing of a resource may block a transition.
    pub fn disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.config.disconnect_timeout = timeout;
        self
    }

    /// Set the predicate that classifies fatal errors.
    pub fn broken_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.config.broken_predicate = Some(Arc::new(predicate));
        self
    }

    /// Copy the delays, the disconnect timeout and (if set) the predicate
    /// from another configuration.
    pub fn merge(mut self, other: &Config<E>) -> Self {
        if let Some(predicate) = &other.broken_predicate {
            self.config.broken_predicate = Some(Arc::clone(predicate));
        }
        self.config.fix_retry_delay = other.fix_retry_delay;
        self.config.recovery_delay = other.recovery_delay;
        self.config.disconnect_timeout = other.disconnect_timeout;
        self
    }

    /// Apply externally loaded settings.
    pub fn apply(self, settings: &Settings) -> Result<Self, ConfigError> {
        settings.validate()?;
        let (fix, recovery) = settings.delays();
        Ok(self.fix_retry_delay(fix).recovery_delay(recovery))
    }

    /// Finish building.
    pub fn build(self) -> Config<E> {
        self.config
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Delay settings in milliseconds, as read from an external source.
///
/// Values are signed so that a negative value in a config file is reported
/// by [`Settings::validate`] rather than failing deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Settings {
    /// Wait between recovery attempts, in milliseconds.
    pub fix_retry_delay_ms: i64,
    /// Wait before the first recovery attempt, in milliseconds.
    pub recovery_delay_ms: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fix_retry_delay_ms: duration_ms(DEFAULT_FIX_RETRY_DELAY),
            recovery_delay_ms: duration_ms(DEFAULT_RECOVERY_DELAY),
        }
    }
}

impl Settings {
    /// Reject negative delays.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fix_retry_delay_ms < 0 {
            return Err(ConfigError::NegativeDelay {
                field: "fix_retry_delay_ms",
                value: self.fix_retry_delay_ms,
            });
        }
        if self.recovery_delay_ms < 0 {
            return Err(ConfigError::NegativeDelay {
                field: "recovery_delay_ms",
                value: self.recovery_delay_ms,
            });
        }
        Ok(())
    }

    /// Build a full configuration from these settings.
    pub fn into_config<E>(self) -> Result<Config<E>, ConfigError> {
        Ok(Config::builder().apply(&self)?.build())
    }

    fn delays(&self) -> (Duration, Duration) {
        let to_duration = |ms: i64| Duration::from_millis(u64::try_from(ms).unwrap_or(0));
        (
            to_duration(self.fix_retry_delay_ms),
            to_duration(self.recovery_delay_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn defaults_match_documented_delays() {
        let config = Config::<io::Error>::default();
        assert_eq!(config.fix_retry_delay, Duration::from_secs(2));
        assert_eq!(config.recovery_delay, Duration::from_secs(1));
        assert_eq!(config.disconnect_timeout, Duration::from_secs(5));
        assert!(!config.has_broken_predicate());
    }

    #[test]
    fn no_predicate_means_nothing_is_broken() {
        let config = Config::<io::Error>::default();
        assert!(!config.is_broken(&io::Error::other("anything")));
    }

    #[test]
    fn predicate_classifies_errors() {
        let config = Config::builder()
            .broken_predicate(|e: &io::Error| e.kind() == io::ErrorKind::BrokenPipe)
            .build();
        assert!(config.is_broken(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(!config.is_broken(&io::Error::from(io::ErrorKind::TimedOut)));
    }

    #[test]
    fn apply_settings_sets_delays() {
        let settings = Settings {
            fix_retry_delay_ms: 10,
            recovery_delay_ms: 0,
        };
        let config = Config::<io::Error>::builder()
            .apply(&settings)
            .unwrap()
            .build();
        assert_eq!(config.fix_retry_delay, Duration::from_millis(10));
        assert_eq!(config.recovery_delay, Duration::ZERO);
        assert_eq!(config.settings(), settings);
    }

    #[test]
    fn negative_delay_is_rejected() {
        let settings = Settings {
            fix_retry_delay_ms: 100,
            recovery_delay_ms: -1,
        };
        let err = settings.into_config::<io::Error>().unwrap_err();
        assert_eq!(
            err,
            ConfigError::NegativeDelay {
                field: "recovery_delay_ms",
                value: -1
            }
        );
    }

    #[test]
    fn merge_keeps_predicate_of_other() {
        let base = Config::builder()
            .fix_retry_delay(Duration::from_millis(5))
            .disconnect_timeout(Duration::from_millis(250))
            .broken_predicate(|_: &io::Error| true)
            .build();
        let merged = Config::builder()
            .recovery_delay(Duration::from_secs(9))
            .merge(&base)
            .build();
        assert!(merged.has_broken_predicate());
        assert_eq!(merged.fix_retry_delay, Duration::from_millis(5));
        assert_eq!(merged.recovery_delay, base.recovery_delay);
        assert_eq!(merged.disconnect_timeout, Duration::from_millis(250));
    }

    #[test]
    fn debug_does_not_require_debug_error() {
        struct Opaque;
        let config = Config::<Opaque>::default();
        let rendered = format!("{config:?}");
        assert!(rendered.contains("fix_retry_delay"));
    }
}
