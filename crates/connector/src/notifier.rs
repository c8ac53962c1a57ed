//! Lifecycle notifications for connectors.
//!
//! [`StateNotifier`] keeps an ordered list of listeners and dispatches
//! [`StateChange`] events to them synchronously. Listener code is untrusted:
//! failures and panics are logged and do not stop delivery to the remaining
//! listeners. A listener may return [`ListenerError::Cancelled`] to stop the
//! dispatch and ask the owning connector to shut down.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ListenerError;

// ---------------------------------------------------------------------------
// StateChange
// ---------------------------------------------------------------------------

/// Observable lifecycle event of a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum StateChange {
    /// The resource became unusable and recovery has been armed.
    Broken,
    /// A replacement resource has been installed.
    Fixed,
}

impl fmt::Display for StateChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Broken => write!(f, "broken"),
            Self::Fixed => write!(f, "fixed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Outcome of a single [`StateNotifier::publish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Every listener was invoked.
    Completed {
        /// Listeners that returned `Ok`.
        delivered: usize,
        /// Listeners that failed or panicked.
        failed: usize,
    },
    /// A listener asked for shutdown; later listeners were skipped.
    Cancelled,
}

impl Dispatch {
    /// Whether a listener requested shutdown.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

// ---------------------------------------------------------------------------
// StateNotifier
// ---------------------------------------------------------------------------

type Listener = dyn Fn(StateChange) -> Result<(), ListenerError> + Send + Sync;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<(u64, Arc<Listener>)>,
}

/// Ordered subscribe/publish bus for [`StateChange`] events.
#[derive(Default)]
pub struct StateNotifier {
    registry: Arc<Mutex<Registry>>,
}

impl StateNotifier {
    /// Create a notifier with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Listeners run in subscription order.
    ///
    /// The returned [`Subscription`] removes the listener again; dropping it
    /// leaves the listener registered. Listeners are called synchronously by
    /// [`publish`](Self::publish) and must not block.
    pub fn subscribe<L>(&self, listener: L) -> Subscription
    where
        L: Fn(StateChange) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.listeners.push((id, Arc::new(listener)));
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver `event` to every listener.
    ///
    /// Listeners run on the calling thread against a snapshot of the
    /// registry, so they may subscribe or unsubscribe without deadlocking.
    pub fn publish(&self, event: StateChange) -> Dispatch {
        let listeners: Vec<Arc<Listener>> = self
            .registry
            .lock()
            .listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        let mut delivered = 0;
        let mut failed = 0;
        for listener in listeners {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(ListenerError::Cancelled)) => {
                    tracing::debug!(%event, "listener requested shutdown, dispatch stopped");
                    return Dispatch::Cancelled;
                }
                Ok(Err(ListenerError::Failed(error))) => {
                    failed += 1;
                    tracing::warn!(%event, error = %error, "state listener failed");
                }
                Err(payload) => {
                    failed += 1;
                    tracing::error!(
                        %event,
                        panic = panic_message(payload.as_ref()),
                        "state listener panicked"
                    );
                }
            }
        }
        Dispatch::Completed { delivered, failed }
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.lock().listeners.len()
    }

    /// Whether no listeners are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registry.lock().listeners.is_empty()
    }
}

impl fmt::Debug for StateNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateNotifier")
            .field("listeners", &self.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Handle returned by [`StateNotifier::subscribe`].
///
/// Holds only a weak reference to the notifier, so it never keeps a
/// connector alive.
#[derive(Debug)]
#[must_use = "dropping a Subscription keeps the listener registered forever"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    /// Remove the listener.
    ///
    /// Returns `false` if it was already gone (or the notifier was dropped).
    pub fn unsubscribe(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut registry = registry.lock();
        let before = registry.listeners.len();
        registry.listeners.retain(|(id, _)| *id != self.id);
        registry.listeners.len() != before
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder(
        log: &Arc<Mutex<Vec<String>>>,
        name: &'static str,
    ) -> impl Fn(StateChange) -> Result<(), ListenerError> + Send + Sync + 'static {
        let log = Arc::clone(log);
        move |event| {
            log.lock().push(format!("{name}:{event}"));
            Ok(())
        }
    }

    #[test]
    fn publish_without_listeners_completes() {
        let notifier = StateNotifier::new();
        assert!(notifier.is_empty());
        assert_eq!(
            notifier.publish(StateChange::Broken),
            Dispatch::Completed {
                delivered: 0,
                failed: 0
            }
        );
    }

    #[test]
    fn listeners_run_in_subscription_order() {
        let notifier = StateNotifier::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _a = notifier.subscribe(recorder(&log, "a"));
        let _b = notifier.subscribe(recorder(&log, "b"));
        let _c = notifier.subscribe(recorder(&log, "c"));

        notifier.publish(StateChange::Fixed);

        assert_eq!(*log.lock(), vec!["a:fixed", "b:fixed", "c:fixed"]);
    }

    #[test]
    fn failing_listener_does_not_stop_dispatch() {
        let notifier = StateNotifier::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _bad = notifier.subscribe(|_| Err(ListenerError::failed("nope")));
        let _good = notifier.subscribe(recorder(&log, "good"));

        let dispatch = notifier.publish(StateChange::Broken);

        assert_eq!(
            dispatch,
            Dispatch::Completed {
                delivered: 1,
                failed: 1
            }
        );
        assert_eq!(*log.lock(), vec!["good:broken"]);
    }

    #[test]
    fn panicking_listener_is_isolated() {
        let notifier = StateNotifier::new();
        let count = Arc::new(AtomicUsize::new(0));
        let _bad = notifier.subscribe(|_| panic!("listener bug"));
        let counter = Arc::clone(&count);
        let _good = notifier.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let dispatch = notifier.publish(StateChange::Broken);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!dispatch.is_cancelled());
    }

    #[test]
    fn cancellation_stops_remaining_listeners() {
        let notifier = StateNotifier::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _first = notifier.subscribe(recorder(&log, "first"));
        let _cancel = notifier.subscribe(|_| Err(ListenerError::Cancelled));
        let _last = notifier.subscribe(recorder(&log, "last"));

        assert!(notifier.publish(StateChange::Fixed).is_cancelled());
        assert_eq!(*log.lock(), vec!["first:fixed"]);
    }

    #[test]
    fn unsubscribe_removes_listener_once() {
        let notifier = StateNotifier::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let sub = notifier.subscribe(recorder(&log, "x"));
        assert_eq!(notifier.len(), 1);

        assert!(sub.unsubscribe());
        assert!(notifier.is_empty());

        notifier.publish(StateChange::Broken);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn unsubscribe_after_notifier_dropped_is_noop() {
        let notifier = StateNotifier::new();
        let sub = notifier.subscribe(|_| Ok(()));
        drop(notifier);
        assert!(!sub.unsubscribe());
    }

    #[test]
    fn listener_may_subscribe_during_dispatch() {
        let notifier = Arc::new(StateNotifier::new());
        let inner = Arc::clone(&notifier);
        let _sub = notifier.subscribe(move |_| {
            let _nested = inner.subscribe(|_| Ok(()));
            Ok(())
        });

        notifier.publish(StateChange::Broken);
        assert_eq!(notifier.len(), 2);
    }

    #[test]
    fn state_change_display() {
        assert_eq!(StateChange::Broken.to_string(), "broken");
        assert_eq!(StateChange::Fixed.to_string(), "fixed");
    }
}
