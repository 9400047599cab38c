//! Layered settings: an optional TOML file overridden by `SINISTRE__*`
//! environment variables.
//!
//! `SINISTRE__PUBLISHER__EXCHANGE=bsp.events` overrides
//! `publisher.exchange`, and so on for every key.

use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::{Error, Result, broker::DEFAULT_POOL_SIZE};

/// All settings, each section falling back to its defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Broker publication.
    pub publisher: PublisherSettings,
    /// Read-side queries.
    pub query: QuerySettings,
    /// Retry and circuit breaking around infrastructure calls.
    pub resilience: ResilienceSettings,
    /// Log output.
    pub log: LogSettings,
    /// NATS connection.
    pub nats: NatsSettings,
}

impl Settings {
    /// Loads settings from `path` (if given) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        Self::finish(builder)
    }

    /// Loads settings from a TOML string and the environment.
    pub fn from_toml(toml: &str) -> Result<Self> {
        Self::finish(Config::builder().add_source(File::from_str(toml, FileFormat::Toml)))
    }

    fn finish(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        builder
            .add_source(
                Environment::with_prefix("SINISTRE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| Error::Config(e.to_string()))
    }
}

/// Where and how facts are published.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PublisherSettings {
    /// Base exchange name.
    pub exchange: String,
    /// Deployment environment. When set, the exchange becomes
    /// `{exchange}.{environment}`.
    pub environment: Option<String>,
    /// CloudEvents `source` override. Defaults to each payload's own source.
    pub source: Option<String>,
    /// Maximum number of idle broker channels kept for reuse.
    pub pool_size: usize,
}

impl PublisherSettings {
    /// The exchange facts are published to.
    pub fn exchange_name(&self) -> String {
        match self.environment.as_deref().map(str::trim) {
            Some(environment) if !environment.is_empty() => {
                format!("{}.{environment}", self.exchange)
            }
            _ => self.exchange.clone(),
        }
    }
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            exchange: "bsp.events".to_owned(),
            environment: None,
            source: None,
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

/// Paging defaults for searches.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    /// Page size used when a search does not give one.
    pub default_limit: i64,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self { default_limit: 50 }
    }
}

/// Retry and circuit-breaker tuning. Both are off unless enabled.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ResilienceSettings {
    /// Retry transient failures.
    pub retry_enabled: bool,
    /// First retry delay.
    pub retry_initial_interval_ms: u64,
    /// Growth factor between retry delays.
    pub retry_multiplier: f64,
    /// Give up once this much time has passed.
    pub retry_max_elapsed_ms: u64,
    /// Guard calls with a circuit breaker.
    pub breaker_enabled: bool,
    /// Consecutive transient failures that open the breaker.
    pub breaker_failure_threshold: u32,
    /// How long an open breaker rejects calls.
    pub breaker_open_ms: u64,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            retry_enabled: false,
            retry_initial_interval_ms: 2_000,
            retry_multiplier: 2.0,
            retry_max_elapsed_ms: 14_000,
            breaker_enabled: false,
            breaker_failure_threshold: 5,
            breaker_open_ms: 30_000,
        }
    }
}

/// Log output.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Default filter directive, used when `RUST_LOG` is unset.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_owned(),
            json: false,
        }
    }
}

/// NATS connection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NatsSettings {
    /// Server URL.
    pub url: String,
}

impl Default for NatsSettings {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_owned(),
        }
    }
}
