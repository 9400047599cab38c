//! Installs the global `tracing` subscriber.

use tracing_subscriber::{
    EnvFilter,
    filter::{Directive, LevelFilter},
};

use crate::settings::LogSettings;

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `settings.filter`.
///
/// Returns `false` when a global subscriber was already installed, which
/// leaves the existing one in place.
pub fn init(settings: &LogSettings) -> bool {
    let default_directive = settings
        .filter
        .parse::<Directive>()
        .unwrap_or_else(|_| LevelFilter::INFO.into());
    let filter = EnvFilter::builder()
        .with_default_directive(default_directive)
        .from_env_lossy();

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match settings.json {
        true => builder.json().try_init().is_ok(),
        false => builder.try_init().is_ok(),
    }
}
