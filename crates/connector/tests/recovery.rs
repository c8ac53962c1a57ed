//! Integration tests for the recovery loop: attempt counting, backoff
//! timing, first-open semantics and fault isolation of the factory.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use pretty_assertions::assert_eq;
use tether_connector::prelude::*;
use tether_connector::testing::{ScriptedFactory, Step, TestError, test_config};
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn connector(
    scripted: &ScriptedFactory,
    fix_ms: u64,
    recovery_ms: u64,
) -> Connector<ScriptedFactory> {
    tether_log::init_test().ok();
    Connector::new(scripted.clone(), test_config(fix_ms, recovery_ms))
}

fn record(connector: &Connector<ScriptedFactory>) -> (Subscription, Arc<Mutex<Vec<StateChange>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let subscription = connector
        .subscribe(move |event| {
            sink.lock().unwrap().push(event);
            Ok(())
        })
        .unwrap();
    (subscription, events)
}

async fn wait_for(connector: &Connector<ScriptedFactory>, state: ConnectorState) {
    for _ in 0..10_000 {
        if connector.state() == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("connector never reached {state}, stuck in {}", connector.state());
}

async fn current_id(connector: &Connector<ScriptedFactory>) -> usize {
    connector
        .execute(|resource| async move { Ok::<_, TestError>(resource.id) })
        .await
        .unwrap()
}

// ---------------------------------------------------------------------------
// Attempt counting
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn three_failures_then_success_makes_four_calls() {
    let scripted = ScriptedFactory::failing(3);
    let connector = connector(&scripted, 10, 0);

    let err = connector.connect().await.unwrap_err();
    assert_eq!(err.as_resource(), Some(&TestError::fatal("open failed #1")));
    assert_eq!(scripted.calls(), 1);

    tokio::time::sleep(Duration::from_millis(40)).await;

    assert_eq!(connector.state(), ConnectorState::Open);
    assert_eq!(scripted.calls(), 4);
    connector.close().await;
}

#[tokio::test]
async fn zero_delays_still_make_four_calls() {
    let scripted = ScriptedFactory::failing(3);
    let connector = connector(&scripted, 0, 0);

    connector.connect().await.unwrap_err();
    wait_for(&connector, ConnectorState::Open).await;

    assert_eq!(scripted.calls(), 4);
    assert_eq!(current_id(&connector).await, 4);
    connector.close().await;
}

#[tokio::test(start_paused = true)]
async fn retries_are_spaced_by_fix_retry_delay() {
    let scripted = ScriptedFactory::failing(5);
    let connector = connector(&scripted, 50, 0);

    connector.connect().await.unwrap_err();
    wait_for(&connector, ConnectorState::Open).await;

    // One call from connect(), five more from the recovery loop.
    let times = scripted.call_times();
    assert_eq!(times.len(), 6);
    for pair in times[1..].windows(2) {
        assert!(
            pair[1] - pair[0] >= Duration::from_millis(50),
            "retries {:?} apart",
            pair[1] - pair[0]
        );
    }
    connector.close().await;
}

#[tokio::test(start_paused = true)]
async fn recovery_delay_precedes_first_attempt() {
    let scripted = ScriptedFactory::default();
    let connector = connector(&scripted, 10, 300);

    connector.connect().await.unwrap();
    let broke_at = Instant::now();
    connector.mark_broken().await.unwrap();
    wait_for(&connector, ConnectorState::Open).await;

    let times = scripted.call_times();
    assert_eq!(times.len(), 2);
    assert!(times[1] - broke_at >= Duration::from_millis(300));
    connector.close().await;
}

// ---------------------------------------------------------------------------
// First-open semantics
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn failed_first_open_is_recovered_in_background() {
    let scripted = ScriptedFactory::failing(1);
    let connector = connector(&scripted, 10, 0);

    assert!(connector.connect().await.is_err());
    assert_eq!(connector.state(), ConnectorState::Broken);

    tokio::time::sleep(Duration::from_millis(20)).await;

    connector.connect().await.unwrap();
    assert_eq!(scripted.calls(), 2);
    assert_eq!(current_id(&connector).await, 2);
    connector.close().await;
}

#[tokio::test(start_paused = true)]
async fn connect_is_a_no_op_once_open() {
    let scripted = ScriptedFactory::default();
    let connector = connector(&scripted, 10, 0);

    connector.connect().await.unwrap();
    connector.connect().await.unwrap();
    connector.connect().await.unwrap();

    assert_eq!(scripted.calls(), 1);
    connector.close().await;
}

#[tokio::test(start_paused = true)]
async fn mark_broken_before_connect_opens_in_background() {
    let scripted = ScriptedFactory::default();
    let connector = connector(&scripted, 10, 0);

    connector.mark_broken().await.unwrap();
    wait_for(&connector, ConnectorState::Open).await;

    assert_eq!(scripted.calls(), 1);
    assert_eq!(current_id(&connector).await, 1);
    connector.close().await;
}

#[tokio::test(start_paused = true)]
async fn abandoned_connect_reverts_to_disconnected() {
    let scripted = ScriptedFactory::new([Step::Hang]);
    let connector = connector(&scripted, 10, 0);

    let timed_out = tokio::time::timeout(Duration::from_millis(10), connector.connect()).await;
    assert!(timed_out.is_err());
    assert_eq!(connector.state(), ConnectorState::Disconnected);

    connector.connect().await.unwrap();
    assert_eq!(connector.state(), ConnectorState::Open);
    connector.close().await;
}

// ---------------------------------------------------------------------------
// Fault isolation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn panicking_factory_in_recovery_is_retried() {
    let scripted = ScriptedFactory::new([
        Step::Fail(TestError::fatal("gone")),
        Step::Panic,
        Step::Succeed,
    ]);
    let connector = connector(&scripted, 10, 0);

    connector.connect().await.unwrap_err();
    wait_for(&connector, ConnectorState::Open).await;

    assert_eq!(scripted.calls(), 3);
    assert_eq!(current_id(&connector).await, 3);
    connector.close().await;
}

#[tokio::test(start_paused = true)]
async fn panicking_factory_in_connect_leaves_connector_broken() {
    let scripted = ScriptedFactory::new([Step::Panic]);
    let connector = connector(&scripted, 10, 0);

    let outcome = AssertUnwindSafe(connector.connect()).catch_unwind().await;
    assert!(outcome.is_err());
    assert_ne!(connector.state(), ConnectorState::Opening);

    wait_for(&connector, ConnectorState::Open).await;
    assert_eq!(scripted.calls(), 2);
    connector.close().await;
}

#[tokio::test(start_paused = true)]
async fn failing_disconnect_does_not_block_recovery() {
    let scripted = ScriptedFactory::default();
    scripted.fail_disconnects();
    let connector = connector(&scripted, 10, 0);

    connector.connect().await.unwrap();
    connector.mark_broken().await.unwrap();
    wait_for(&connector, ConnectorState::Open).await;

    assert_eq!(scripted.disconnects(), 1);
    assert_eq!(current_id(&connector).await, 2);
    connector.close().await;
}

#[tokio::test(start_paused = true)]
async fn hanging_disconnect_is_abandoned_after_timeout() {
    tether_log::init_test().ok();
    let scripted = ScriptedFactory::default();
    scripted.hang_disconnects();
    let config = Config::builder()
        .merge(&test_config(10, 0))
        .disconnect_timeout(Duration::from_millis(100))
        .build();
    let connector = Connector::new(scripted.clone(), config);
    let (_subscription, events) = record(&connector);
    connector.connect().await.unwrap();

    let started = Instant::now();
    connector.mark_broken().await.unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(100), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(1), "{elapsed:?}");
    assert_eq!(*events.lock().unwrap(), vec![StateChange::Broken]);

    wait_for(&connector, ConnectorState::Open).await;
    assert_eq!(current_id(&connector).await, 2);

    let started = Instant::now();
    connector.close().await;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(scripted.disconnects(), 2);
}

// ---------------------------------------------------------------------------
// Ordering of disposal and events
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn stale_resource_is_disposed_before_broken_is_published() {
    let scripted = ScriptedFactory::default();
    let connector = connector(&scripted, 10, 0);
    connector.connect().await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let counter = scripted.clone();
    let _subscription = connector
        .subscribe(move |event| {
            if event == StateChange::Broken {
                sink.lock().unwrap().push(counter.disconnects());
            }
            Ok(())
        })
        .unwrap();

    connector.mark_broken().await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![1]);
    connector.close().await;
}

#[tokio::test(start_paused = true)]
async fn repeated_cycles_alternate_broken_and_fixed() {
    let scripted = ScriptedFactory::default();
    let connector = connector(&scripted, 10, 0);
    let (_subscription, events) = record(&connector);

    connector.connect().await.unwrap();
    for _ in 0..3 {
        connector.mark_broken().await.unwrap();
        wait_for(&connector, ConnectorState::Open).await;
    }

    assert_eq!(
        *events.lock().unwrap(),
        [StateChange::Broken, StateChange::Fixed].repeat(3)
    );
    assert_eq!(current_id(&connector).await, 4);
    connector.close().await;
}
