//! Testing utilities for connectors
//!
//! [`ScriptedFactory`] replays a fixed sequence of connect outcomes and
//! records every call, so tests can assert on attempt counts and timing.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::Config;
use crate::factory::Factory;

/// Error type produced by [`ScriptedFactory`] and test operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TestError {
    /// An error the [`fatal_only`] predicate treats as broken.
    #[error("fatal: {0}")]
    Fatal(String),
    /// An ordinary operation error.
    #[error("transient: {0}")]
    Transient(String),
}

impl TestError {
    /// Shorthand for [`TestError::Fatal`].
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Shorthand for [`TestError::Transient`].
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Whether this is a [`TestError::Fatal`].
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// Broken predicate matching only [`TestError::Fatal`].
pub fn fatal_only(error: &TestError) -> bool {
    error.is_fatal()
}

/// Config with the given delays (in ms) and the [`fatal_only`] predicate.
pub fn test_config(fix_retry_delay_ms: u64, recovery_delay_ms: u64) -> Config<TestError> {
    Config::builder()
        .fix_retry_delay(Duration::from_millis(fix_retry_delay_ms))
        .recovery_delay(Duration::from_millis(recovery_delay_ms))
        .broken_predicate(fatal_only)
        .build()
}

/// Resource handed out by [`ScriptedFactory`].
#[derive(Debug)]
pub struct TestResource {
    /// 1-based number of the factory call that produced this resource.
    pub id: usize,
    disconnected: AtomicBool,
}

impl TestResource {
    /// Whether the connector has disposed of this resource.
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

/// One scripted connect outcome.
#[derive(Debug, Clone)]
pub enum Step {
    /// Produce a resource.
    Succeed,
    /// Fail with the given error.
    Fail(TestError),
    /// Panic inside the factory.
    Panic,
    /// Never complete.
    Hang,
}

#[derive(Debug, Default)]
struct Inner {
    script: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<Instant>>,
    latency: Mutex<Duration>,
    disconnects: AtomicUsize,
    fail_disconnect: AtomicBool,
    hang_disconnect: AtomicBool,
}

/// Factory that replays a script of [`Step`]s.
///
/// Once the script runs out every call succeeds. Clones share state, so
/// keep one clone for assertions after moving the other into a connector.
#[derive(Debug, Clone, Default)]
pub struct ScriptedFactory {
    inner: Arc<Inner>,
}

impl ScriptedFactory {
    /// Factory replaying `steps`.
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        let factory = Self::default();
        factory.inner.script.lock().extend(steps);
        factory
    }

    /// Factory that fails `n` times with a fatal error, then succeeds.
    pub fn failing(n: usize) -> Self {
        Self::new((0..n).map(|i| Step::Fail(TestError::fatal(format!("open failed #{}", i + 1)))))
    }

    /// Append more steps to the script.
    pub fn push(&self, step: Step) {
        self.inner.script.lock().push_back(step);
    }

    /// Delay every connect by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.inner.latency.lock() = latency;
    }

    /// Make `disconnect` fail from now on.
    pub fn fail_disconnects(&self) {
        self.inner.fail_disconnect.store(true, Ordering::SeqCst);
    }

    /// Make `disconnect` never complete from now on.
    pub fn hang_disconnects(&self) {
        self.inner.hang_disconnect.store(true, Ordering::SeqCst);
    }

    /// Number of connect calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.inner.calls.lock().len()
    }

    /// When each connect call started.
    #[must_use]
    pub fn call_times(&self) -> Vec<Instant> {
        self.inner.calls.lock().clone()
    }

    /// Number of disconnect calls so far.
    #[must_use]
    pub fn disconnects(&self) -> usize {
        self.inner.disconnects.load(Ordering::SeqCst)
    }
}

impl Factory for ScriptedFactory {
    type Resource = TestResource;
    type Error = TestError;

    async fn connect(&self) -> Result<TestResource, TestError> {
        let id = {
            let mut calls = self.inner.calls.lock();
            calls.push(Instant::now());
            calls.len()
        };
        let step = self.inner.script.lock().pop_front().unwrap_or(Step::Succeed);
        let latency = *self.inner.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match step {
            Step::Succeed => Ok(TestResource {
                id,
                disconnected: AtomicBool::new(false),
            }),
            Step::Fail(error) => Err(error),
            Step::Panic => panic!("scripted factory panic on call {id}"),
            Step::Hang => std::future::pending().await,
        }
    }

    async fn disconnect(&self, resource: Arc<TestResource>) -> Result<(), TestError> {
        self.inner.disconnects.fetch_add(1, Ordering::SeqCst);
        resource.disconnected.store(true, Ordering::SeqCst);
        if self.inner.hang_disconnect.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.inner.fail_disconnect.load(Ordering::SeqCst) {
            return Err(TestError::transient("disconnect failed"));
        }
        Ok(())
    }

    fn describe(&self, resource: &TestResource) -> String {
        format!("test-resource-{}", resource.id)
    }
}
