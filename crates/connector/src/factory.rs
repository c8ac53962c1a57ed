//! The resource factory a connector is built around.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Opens (and disposes of) the resource managed by a [`Connector`](crate::Connector).
///
/// The connector calls [`connect`](Factory::connect) once from
/// [`Connector::connect`](crate::Connector::connect) and then repeatedly from
/// its recovery loop, so implementations must be reusable.
pub trait Factory: Send + Sync + 'static {
    /// The resource handle produced by this factory.
    type Resource: Send + Sync + 'static;

    /// Error raised by the factory and by operations on the resource.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open a new resource. May take arbitrarily long.
    fn connect(&self) -> impl Future<Output = Result<Self::Resource, Self::Error>> + Send;

    /// Release a resource that is being replaced or closed.
    ///
    /// Failures are logged by the connector, never surfaced to callers.
    fn disconnect(
        &self,
        resource: Arc<Self::Resource>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move {
            drop(resource);
            Ok(())
        }
    }

    /// Human-readable name of a resource, used in log fields.
    fn describe(&self, _resource: &Self::Resource) -> String {
        std::any::type_name::<Self::Resource>().to_string()
    }
}

/// Factory backed by an async closure. Created with [`from_fn`].
pub struct FnFactory<F> {
    open: F,
}

/// Build a [`Factory`] from a closure returning a future.
///
/// ```rust,ignore
/// let factory = tether_connector::factory::from_fn(|| async {
///     tokio::net::TcpStream::connect("127.0.0.1:7000").await
/// });
/// ```
pub fn from_fn<F, Fut, R, E>(open: F) -> FnFactory<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send,
    R: Send + Sync + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    FnFactory { open }
}

impl<F, Fut, R, E> Factory for FnFactory<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send,
    R: Send + Sync + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    type Resource = R;
    type Error = E;

    fn connect(&self) -> impl Future<Output = Result<R, E>> + Send {
        (self.open)()
    }
}

impl<F> fmt::Debug for FnFactory<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnFactory").finish_non_exhaustive()
    }
}
