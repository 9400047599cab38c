//! Layered settings.

use std::io::Write;

use pretty_assertions::assert_eq;

use sinistre::{
    Error,
    settings::{LogSettings, PublisherSettings, QuerySettings, Settings},
};

#[test]
fn defaults() {
    let settings = Settings::from_toml("").expect("empty file");
    assert_eq!(settings.publisher.exchange, "bsp.events");
    assert_eq!(settings.publisher.exchange_name(), "bsp.events");
    assert_eq!(settings.query, QuerySettings { default_limit: 50 });
    assert_eq!(
        settings.log,
        LogSettings {
            filter: "info".to_owned(),
            json: false
        }
    );
    assert!(!settings.resilience.retry_enabled);
    assert!(!settings.resilience.breaker_enabled);
    assert_eq!(settings.resilience.retry_initial_interval_ms, 2_000);
    assert_eq!(settings.nats.url, "nats://localhost:4222");
}

#[test]
fn toml_overrides_defaults() {
    let settings = Settings::from_toml(
        r#"
        [publisher]
        exchange = "claims"
        environment = "recette"

        [query]
        default_limit = 25

        [resilience]
        retry_enabled = true
        breaker_failure_threshold = 3

        [log]
        json = true
        "#,
    )
    .expect("valid toml");

    assert_eq!(settings.publisher.exchange_name(), "claims.recette");
    assert_eq!(settings.query.default_limit, 25);
    assert!(settings.resilience.retry_enabled);
    assert_eq!(settings.resilience.breaker_failure_threshold, 3);
    assert_eq!(settings.resilience.breaker_open_ms, 30_000);
    assert!(settings.log.json);
    assert_eq!(settings.log.filter, "info");
}

#[test]
fn blank_environment_keeps_the_base_exchange() {
    let publisher = PublisherSettings {
        environment: Some("  ".to_owned()),
        ..PublisherSettings::default()
    };
    assert_eq!(publisher.exchange_name(), "bsp.events");
}

#[test]
fn ill_typed_values_are_config_errors() {
    let err = Settings::from_toml("[query]\ndefault_limit = \"many\"").expect_err("not a number");
    assert!(matches!(err, Error::Config(_)));
    assert_eq!(err.kind(), "CONFIGURATION_ERROR");
}

#[test]
fn loads_from_a_file() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp file");
    writeln!(file, "[nats]\nurl = \"nats://broker:4222\"").expect("write");

    let settings = Settings::load(Some(file.path())).expect("load");
    assert_eq!(settings.nats.url, "nats://broker:4222");
}

#[test]
fn missing_file_is_an_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let err = Settings::load(Some(&dir.path().join("absent.toml"))).expect_err("missing");
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn no_file_means_defaults() {
    let settings = Settings::load(None).expect("defaults");
    assert_eq!(settings.publisher.pool_size, 8);
}

#[test]
fn telemetry_installs_once() {
    let log = LogSettings::default();
    let _ = sinistre::telemetry::init(&log);
    assert!(!sinistre::telemetry::init(&log), "a subscriber is already installed");
}
