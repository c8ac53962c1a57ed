//! Loading connector settings from JSON.

#![cfg(feature = "serde")]

use std::io;
use std::time::Duration;

use pretty_assertions::assert_eq;
use rstest::rstest;
use tether_connector::{Config, ConfigError, ConnectorState, Settings, StateChange};

#[rstest]
#[case("{}", 2_000, 1_000)]
#[case(r#"{ "fix_retry_delay_ms": 10 }"#, 10, 1_000)]
#[case(r#"{ "recovery_delay_ms": 0 }"#, 2_000, 0)]
#[case(r#"{ "fix_retry_delay_ms": 250, "recovery_delay_ms": 50 }"#, 250, 50)]
fn settings_fill_missing_fields_with_defaults(
    #[case] json: &str,
    #[case] fix_ms: u64,
    #[case] recovery_ms: u64,
) {
    let settings: Settings = serde_json::from_str(json).unwrap();
    let config = settings.into_config::<io::Error>().unwrap();

    assert_eq!(config.fix_retry_delay, Duration::from_millis(fix_ms));
    assert_eq!(config.recovery_delay, Duration::from_millis(recovery_ms));
}

#[rstest]
#[case(r#"{ "fix_retry_delay_ms": -5 }"#, "fix_retry_delay_ms", -5)]
#[case(r#"{ "recovery_delay_ms": -1 }"#, "recovery_delay_ms", -1)]
fn negative_delays_are_rejected(
    #[case] json: &str,
    #[case] field: &'static str,
    #[case] value: i64,
) {
    let settings: Settings = serde_json::from_str(json).unwrap();

    let err = Config::<io::Error>::builder().apply(&settings).unwrap_err();
    assert_eq!(err, ConfigError::NegativeDelay { field, value });
    assert!(err.to_string().contains(field));
}

#[test]
fn settings_round_trip_through_config() {
    let config = Config::<io::Error>::builder()
        .fix_retry_delay(Duration::from_millis(75))
        .recovery_delay(Duration::from_millis(5))
        .build();

    let json = serde_json::to_value(config.settings()).unwrap();
    assert_eq!(
        json,
        serde_json::json!({ "fix_retry_delay_ms": 75, "recovery_delay_ms": 5 })
    );
}

#[test]
fn states_and_events_serialize_in_snake_case() {
    assert_eq!(
        serde_json::to_string(&ConnectorState::Disconnected).unwrap(),
        r#""disconnected""#
    );
    assert_eq!(serde_json::to_string(&StateChange::Fixed).unwrap(), r#""fixed""#);
}
