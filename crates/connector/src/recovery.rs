//! Background recovery loop.
//!
//! One task per connector. It parks on the connector's broken signal, and
//! once woken reopens the resource until it succeeds or the connector is
//! closed. Every suspension point races the cancellation token, so
//! `close()` never waits out a backoff.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::connector::{Install, Shared};
use crate::factory::Factory;
use crate::notifier::panic_message;
use crate::state::{ConnectorState, RecoveryPhase};

/// Entry point of the recovery task.
pub(crate) async fn run<F: Factory>(shared: Arc<Shared<F>>) {
    let cancel = shared.cancel.clone();
    loop {
        shared.set_phase(RecoveryPhase::Waiting);
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = shared.wake.notified() => {}
        }
        if shared.state() != ConnectorState::Broken {
            continue;
        }

        shared.set_phase(RecoveryPhase::Attempting);
        match AssertUnwindSafe(recover(&shared, &cancel))
            .catch_unwind()
            .await
        {
            Ok(Outcome::Recovered) => {}
            Ok(Outcome::Stopped) => break,
            Err(payload) => {
                // The slot is still broken; go round again after a backoff.
                tracing::error!(
                    panic = panic_message(payload.as_ref()),
                    "recovery loop failed unexpectedly, restarting"
                );
                if !sleep_or_cancel(shared.config.fix_retry_delay, &cancel).await {
                    break;
                }
                shared.wake.notify_one();
            }
        }
    }
    shared.set_phase(RecoveryPhase::Stopped);
    tracing::debug!("recovery worker stopped");
}

enum Outcome {
    Recovered,
    Stopped,
}

async fn recover<F: Factory>(shared: &Shared<F>, cancel: &CancellationToken) -> Outcome {
    tracing::info!("connector is broken, attempting to fix");
    if !sleep_or_cancel(shared.config.recovery_delay, cancel).await {
        return Outcome::Stopped;
    }

    let mut errors = ErrorTracker::default();
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Outcome::Stopped;
        }
        attempt = attempt.saturating_add(1);

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return Outcome::Stopped,
            result = AssertUnwindSafe(shared.factory.connect()).catch_unwind() => result,
        };

        match result {
            Ok(Ok(resource)) => {
                return match shared.install(resource).await {
                    Install::Installed => {
                        tracing::info!(attempts = attempt, "recovery succeeded");
                        if cancel.is_cancelled() {
                            Outcome::Stopped
                        } else {
                            Outcome::Recovered
                        }
                    }
                    Install::Rejected => Outcome::Stopped,
                };
            }
            Ok(Err(error)) => {
                let message = error.to_string();
                if errors.add(&message) {
                    tracing::warn!(attempt, error = %message, "failed to fix, retrying");
                } else {
                    tracing::trace!(attempt, "failed to fix with a repeated error, retrying");
                }
            }
            Err(payload) => tracing::error!(
                attempt,
                panic = panic_message(payload.as_ref()),
                "resource factory panicked, retrying"
            ),
        }

        if !sleep_or_cancel(shared.config.fix_retry_delay, cancel).await {
            return Outcome::Stopped;
        }
    }
}

/// Sleep for `delay`; `false` if cancelled first.
///
/// A zero delay still yields once, so a factory that fails without ever
/// suspending cannot monopolize the runtime.
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    if delay.is_zero() {
        tokio::task::yield_now().await;
        return !cancel.is_cancelled();
    }
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

// ---------------------------------------------------------------------------
// ErrorTracker
// ---------------------------------------------------------------------------

/// Remembers error messages seen during one recovery so a device that keeps
/// failing the same way does not flood the log.
#[derive(Debug, Default)]
struct ErrorTracker {
    seen: HashSet<String>,
}

impl ErrorTracker {
    const LIMIT: usize = 64;

    /// `true` if `message` has not been seen yet.
    fn add(&mut self, message: &str) -> bool {
        if self.seen.contains(message) {
            return false;
        }
        if self.seen.len() >= Self::LIMIT {
            self.seen.clear();
        }
        self.seen.insert(message.to_string())
    }
}
