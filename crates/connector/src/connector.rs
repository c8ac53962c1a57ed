//! The self-healing connector.
//!
//! A [`Connector`] owns one resource slot. Callers reach the resource only
//! through [`Connector::execute`]; errors the configured broken predicate
//! classifies as fatal flip the connector to [`ConnectorState::Broken`] and
//! wake the recovery loop, which reopens the resource in the background.
//!
//! Locking: `slot` guards state and resource and is only held for
//! inspection and pointer swaps. `dispatch` serializes every transition
//! that publishes an event, so listeners observe `Broken`/`Fixed` in the
//! order the transitions happened. Neither lock is held across an `.await`.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Error, ListenerError, Result};
use crate::factory::Factory;
use crate::notifier::{Dispatch, StateChange, StateNotifier, Subscription, panic_message};
use crate::recovery;
use crate::state::{ConnectorState, RecoveryPhase};

type ResourceOf<F> = <F as Factory>::Resource;
type ErrorOf<F> = <F as Factory>::Error;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct Slot<R> {
    state: ConnectorState,
    resource: Option<Arc<R>>,
    ever_opened: bool,
}

/// State shared between the connector handle and its recovery worker.
pub(crate) struct Shared<F: Factory> {
    pub(crate) factory: F,
    pub(crate) config: Config<ErrorOf<F>>,
    pub(crate) notifier: StateNotifier,
    pub(crate) wake: Notify,
    pub(crate) cancel: CancellationToken,
    slot: Mutex<Slot<ResourceOf<F>>>,
    dispatch: Mutex<()>,
    phase: Mutex<RecoveryPhase>,
}

/// Outcome of handing a recovered resource to the connector.
pub(crate) enum Install {
    /// The resource is live and `Fixed` was published.
    Installed,
    /// The connector was closed meanwhile; the resource was disposed.
    Rejected,
}

impl<F: Factory> Shared<F> {
    fn new(factory: F, config: Config<ErrorOf<F>>) -> Self {
        Self {
            factory,
            config,
            notifier: StateNotifier::new(),
            wake: Notify::new(),
            cancel: CancellationToken::new(),
            slot: Mutex::new(Slot {
                state: ConnectorState::Disconnected,
                resource: None,
                ever_opened: false,
            }),
            dispatch: Mutex::new(()),
            phase: Mutex::new(RecoveryPhase::Waiting),
        }
    }

    pub(crate) fn state(&self) -> ConnectorState {
        self.slot.lock().state
    }

    pub(crate) fn set_phase(&self, phase: RecoveryPhase) {
        *self.phase.lock() = phase;
    }

    fn phase(&self) -> RecoveryPhase {
        *self.phase.lock()
    }

    /// The resource to run an operation against, or why there is none.
    fn current(&self) -> Result<Arc<ResourceOf<F>>, ErrorOf<F>> {
        let slot = self.slot.lock();
        match (&slot.resource, slot.state) {
            (_, ConnectorState::Closed) => Err(Error::Closed),
            (Some(resource), _) => Ok(Arc::clone(resource)),
            (None, _) if !slot.ever_opened => Err(Error::NotConnected),
            (None, _) => Err(Error::Broken),
        }
    }

    /// Flip to `Broken` if `allowed` accepts the current slot.
    ///
    /// The stale resource is disposed before `Broken` is published and the
    /// recovery loop woken, so a replacement is never opened while the old
    /// handle is still held.
    async fn break_if<P>(&self, allowed: P)
    where
        P: FnOnce(&Slot<ResourceOf<F>>) -> bool,
    {
        let stale = {
            let _dispatch = self.dispatch.lock();
            let mut slot = self.slot.lock();
            if !allowed(&slot) {
                return;
            }
            slot.state = ConnectorState::Broken;
            slot.resource.take()
        };

        tracing::warn!("connector is broken");
        if let Some(stale) = stale {
            self.dispose(stale).await;
        }

        let dispatch = {
            let _dispatch = self.dispatch.lock();
            if self.state() != ConnectorState::Broken {
                return;
            }
            let dispatch = self.notifier.publish(StateChange::Broken);
            self.wake.notify_one();
            dispatch
        };
        self.after_dispatch(dispatch).await;
    }

    /// Swap a recovered resource into the slot and publish `Fixed`.
    pub(crate) async fn install(&self, resource: ResourceOf<F>) -> Install {
        let resource = Arc::new(resource);
        let name = self.factory.describe(&resource);
        let dispatch = {
            let _dispatch = self.dispatch.lock();
            let swapped = {
                let mut slot = self.slot.lock();
                if slot.state == ConnectorState::Broken {
                    slot.state = ConnectorState::Open;
                    slot.resource = Some(Arc::clone(&resource));
                    slot.ever_opened = true;
                    true
                } else {
                    false
                }
            };
            swapped.then(|| self.notifier.publish(StateChange::Fixed))
        };

        match dispatch {
            Some(dispatch) => {
                tracing::info!(resource = %name, "connector is now fixed");
                self.after_dispatch(dispatch).await;
                Install::Installed
            }
            None => {
                tracing::debug!(resource = %name, "connector closed during recovery, discarding resource");
                self.dispose(resource).await;
                Install::Rejected
            }
        }
    }

    async fn after_dispatch(&self, dispatch: Dispatch) {
        if dispatch.is_cancelled() {
            tracing::info!("state listener requested shutdown");
            self.shutdown().await;
        }
    }

    /// Terminal transition. Idempotent.
    pub(crate) async fn shutdown(&self) {
        let resource = {
            let mut slot = self.slot.lock();
            if slot.state == ConnectorState::Closed {
                return;
            }
            slot.state = ConnectorState::Closed;
            slot.resource.take()
        };
        self.cancel.cancel();
        if let Some(resource) = resource {
            self.dispose(resource).await;
        }
        tracing::debug!("connector closed");
    }

    /// Best-effort disposal: failures, panics and timeouts are logged.
    ///
    /// Bounded by `disconnect_timeout` so that a wedged disconnect cannot
    /// hold up publishing `Broken` or closing.
    pub(crate) async fn dispose(&self, resource: Arc<ResourceOf<F>>) {
        let name = self.factory.describe(&resource);
        let timeout = self.config.disconnect_timeout;
        let disconnect = AssertUnwindSafe(self.factory.disconnect(resource)).catch_unwind();
        match tokio::time::timeout(timeout, disconnect).await {
            Ok(Ok(Ok(()))) => tracing::debug!(resource = %name, "disconnected"),
            Ok(Ok(Err(error))) => {
                tracing::warn!(resource = %name, error = %error, "failed to disconnect resource");
            }
            Err(_) => tracing::warn!(
                resource = %name,
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                "disconnect timed out, resource abandoned"
            ),
            Ok(Err(payload)) => tracing::error!(
                resource = %name,
                panic = panic_message(payload.as_ref()),
                "resource disconnect panicked"
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Self-healing wrapper around a single resource.
///
/// The recovery worker is spawned on construction, so [`Connector::new`]
/// must be called from within a tokio runtime. Call [`close`](Self::close)
/// to release the resource and wait for the worker; dropping the connector
/// only cancels the worker.
///
/// # Example
///
/// ```rust,ignore
/// use tether_connector::{Config, Connector, factory};
///
/// let connector = Connector::new(
///     factory::from_fn(|| async { tokio::net::TcpStream::connect("10.0.0.5:502").await }),
///     Config::builder()
///         .broken_predicate(|e: &std::io::Error| e.kind() == std::io::ErrorKind::BrokenPipe)
///         .build(),
/// );
/// connector.connect().await?;
/// let peer = connector.execute(|stream| async move { stream.peer_addr() }).await?;
/// ```
pub struct Connector<F: Factory> {
    shared: Arc<Shared<F>>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<F: Factory> Connector<F> {
    /// Create a connector and start its recovery worker.
    ///
    /// No resource is opened until [`connect`](Self::connect) (or
    /// [`mark_broken`](Self::mark_broken)) is called.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new(factory: F, config: Config<ErrorOf<F>>) -> Self {
        let shared = Arc::new(Shared::new(factory, config));
        let worker = tokio::spawn(recovery::run(Arc::clone(&shared)));
        Self {
            shared,
            worker: tokio::sync::Mutex::new(Some(worker)),
        }
    }

    /// Open the resource for the first time.
    ///
    /// Calls the factory once. On failure the error is returned **and** the
    /// connector turns `Broken`, so the recovery loop keeps trying in the
    /// background. Once the connector has been opened (or is recovering)
    /// this is a no-op.
    pub async fn connect(&self) -> Result<(), ErrorOf<F>> {
        {
            let mut slot = self.shared.slot.lock();
            match slot.state {
                ConnectorState::Closed => return Err(Error::Closed),
                ConnectorState::Opening | ConnectorState::Open | ConnectorState::Broken => {
                    return Ok(());
                }
                ConnectorState::Disconnected => slot.state = ConnectorState::Opening,
            }
        }

        let mut opening = OpeningGuard {
            shared: self.shared.as_ref(),
            armed: true,
        };
        let result = AssertUnwindSafe(self.shared.factory.connect())
            .catch_unwind()
            .await;
        opening.armed = false;

        match result {
            Ok(Ok(resource)) => self.install_first(resource).await,
            Ok(Err(error)) => {
                tracing::warn!(error = %error, "failed to connect");
                self.shared
                    .break_if(|slot| slot.state == ConnectorState::Opening)
                    .await;
                Err(Error::Resource(error))
            }
            Err(payload) => {
                self.shared
                    .break_if(|slot| slot.state == ConnectorState::Opening)
                    .await;
                std::panic::resume_unwind(payload)
            }
        }
    }

    async fn install_first(&self, resource: ResourceOf<F>) -> Result<(), ErrorOf<F>> {
        let resource = Arc::new(resource);
        let installed = {
            let _dispatch = self.shared.dispatch.lock();
            let mut slot = self.shared.slot.lock();
            if slot.state == ConnectorState::Opening {
                slot.state = ConnectorState::Open;
                slot.resource = Some(Arc::clone(&resource));
                slot.ever_opened = true;
                true
            } else {
                false
            }
        };

        if installed {
            tracing::info!(resource = %self.shared.factory.describe(&resource), "connected");
            Ok(())
        } else {
            self.shared.dispose(resource).await;
            Err(Error::Closed)
        }
    }

    /// Run `op` against the current resource.
    ///
    /// Fails immediately (without waiting for recovery) when there is no
    /// resource. An error from `op` is returned unchanged as
    /// [`Error::Resource`]; if the broken predicate matches it, the
    /// connector also turns `Broken`. The operation itself is never retried.
    pub async fn execute<T, Op, Fut>(&self, op: Op) -> Result<T, ErrorOf<F>>
    where
        Op: FnOnce(Arc<ResourceOf<F>>) -> Fut,
        Fut: Future<Output = std::result::Result<T, ErrorOf<F>>>,
    {
        let resource = self.shared.current()?;
        match op(Arc::clone(&resource)).await {
            Ok(value) => Ok(value),
            Err(error) => {
                if self.shared.config.is_broken(&error) {
                    tracing::debug!(error = %error, "operation failed with a fatal error");
                    // A failure on a handle that has already been replaced
                    // says nothing about the new one.
                    self.shared
                        .break_if(|slot| {
                            slot.state == ConnectorState::Open
                                && slot
                                    .resource
                                    .as_ref()
                                    .is_some_and(|current| Arc::ptr_eq(current, &resource))
                        })
                        .await;
                }
                Err(Error::Resource(error))
            }
        }
    }

    /// [`execute`](Self::execute) for operations with no result value.
    pub async fn run<Op, Fut>(&self, op: Op) -> Result<(), ErrorOf<F>>
    where
        Op: FnOnce(Arc<ResourceOf<F>>) -> Fut,
        Fut: Future<Output = std::result::Result<(), ErrorOf<F>>>,
    {
        self.execute(op).await
    }

    /// Declare the resource unusable.
    ///
    /// Useful when breakage cannot be detected from errors alone. Only the
    /// first call while healthy has an effect; later calls are no-ops until
    /// the resource has been fixed.
    pub async fn mark_broken(&self) -> Result<(), ErrorOf<F>> {
        if self.shared.state() == ConnectorState::Closed {
            return Err(Error::Closed);
        }
        self.shared
            .break_if(|slot| {
                matches!(
                    slot.state,
                    ConnectorState::Open | ConnectorState::Disconnected
                )
            })
            .await;
        Ok(())
    }

    /// Register a state-change listener.
    ///
    /// Return [`ListenerError::Cancelled`] from the listener to shut the
    /// connector down in reaction to an event.
    ///
    /// Listeners run synchronously on the task making the transition, while
    /// transitions are serialized, so they must not block. Reading the
    /// connector state from a listener is fine; hand anything slow to a
    /// channel or a spawned task.
    ///
    /// Fails with [`Error::Closed`] once the connector is closed, since no
    /// further events will be published.
    pub fn subscribe<L>(&self, listener: L) -> Result<Subscription, ErrorOf<F>>
    where
        L: Fn(StateChange) -> std::result::Result<(), ListenerError> + Send + Sync + 'static,
    {
        if self.shared.state() == ConnectorState::Closed {
            return Err(Error::Closed);
        }
        Ok(self.shared.notifier.subscribe(listener))
    }

    /// Close the connector. Idempotent and terminal.
    ///
    /// Cancels the recovery loop (interrupting any backoff), disposes of the
    /// resource and waits for the worker to exit.
    pub async fn close(&self) {
        self.shared.shutdown().await;
        let mut worker = self.worker.lock().await;
        if let Some(handle) = worker.take() {
            if let Err(error) = handle.await {
                if error.is_panic() {
                    tracing::error!("recovery worker panicked");
                }
            }
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectorState {
        self.shared.state()
    }

    /// Whether the resource is broken and being recovered.
    pub fn is_broken(&self) -> bool {
        self.state() == ConnectorState::Broken
    }

    /// Current phase of the recovery worker.
    pub fn recovery_phase(&self) -> RecoveryPhase {
        self.shared.phase()
    }

    /// The configuration this connector runs with.
    pub fn config(&self) -> &Config<ErrorOf<F>> {
        &self.shared.config
    }

    /// The factory this connector opens resources with.
    pub fn factory(&self) -> &F {
        &self.shared.factory
    }
}

impl<F: Factory> Drop for Connector<F> {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

impl<F: Factory> fmt::Debug for Connector<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("state", &self.state())
            .field("recovery", &self.recovery_phase())
            .field("config", &self.shared.config)
            .field("listeners", &self.shared.notifier.len())
            .finish()
    }
}

/// Puts an abandoned first `connect()` back to `Disconnected`.
struct OpeningGuard<'a, F: Factory> {
    shared: &'a Shared<F>,
    armed: bool,
}

impl<F: Factory> Drop for OpeningGuard<'_, F> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slot = self.shared.slot.lock();
        if slot.state == ConnectorState::Opening {
            slot.state = ConnectorState::Disconnected;
        }
    }
}
