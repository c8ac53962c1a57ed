//! Runtime filter reload

use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing_subscriber::{EnvFilter, Registry, layer::Layer};

use crate::error::{LogError, LogResult};

/// Handle for changing the filter of an installed logger.
#[derive(Clone)]
pub struct ReloadHandle {
    filter: tracing_subscriber::reload::Handle<EnvFilter, Registry>,
    current: Arc<ArcSwap<String>>,
}

impl ReloadHandle {
    /// Replace the active filter directives.
    ///
    /// # Errors
    /// Returns error if `filter` does not parse or the subscriber is gone.
    pub fn reload(&self, filter: &str) -> LogResult<()> {
        let new_filter = EnvFilter::try_new(filter).map_err(|e| LogError::filter(filter, e))?;
        self.filter
            .reload(new_filter)
            .map_err(|e| LogError::Reload(e.to_string()))?;
        self.current.store(Arc::new(filter.to_string()));
        Ok(())
    }

    /// Directives currently in effect.
    #[must_use]
    pub fn current_filter(&self) -> Arc<String> {
        self.current.load_full()
    }
}

impl std::fmt::Debug for ReloadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadHandle")
            .field("current", &self.current.load())
            .finish_non_exhaustive()
    }
}

pub(super) type FilterLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Wrap `filter` in a reload layer when `reloadable` is set.
pub(super) fn filter_layer(
    filter: EnvFilter,
    directives: &str,
    reloadable: bool,
) -> (FilterLayer, Option<ReloadHandle>) {
    if reloadable {
        let (layer, handle) = tracing_subscriber::reload::Layer::new(filter);
        let reload = ReloadHandle {
            filter: handle,
            current: Arc::new(ArcSwap::from_pointee(directives.to_string())),
        };
        (Box::new(layer), Some(reload))
    } else {
        (Box::new(filter), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reloadable_layer_returns_handle() {
        let filter = EnvFilter::try_new("info").unwrap();
        let (_layer, handle) = filter_layer(filter, "info", true);
        let handle = handle.unwrap();
        assert_eq!(handle.current_filter().as_str(), "info");

        let filter = EnvFilter::try_new("info").unwrap();
        let (_layer, handle) = filter_layer(filter, "info", false);
        assert!(handle.is_none());
    }

    #[test]
    fn reload_rejects_bad_directives() {
        let filter = EnvFilter::try_new("info").unwrap();
        let (_layer, handle) = filter_layer(filter, "info", true);
        let handle = handle.unwrap();
        assert!(matches!(
            handle.reload("tether=notalevel"),
            Err(LogError::Filter { .. })
        ));
        assert_eq!(handle.current_filter().as_str(), "info");
    }
}
