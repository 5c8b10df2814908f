//! Tracing subscriber setup.
//!
//! servekit itself only emits `tracing` events. Applications that do not
//! bring their own subscriber can call [`init`] once at startup.

use tracing_subscriber::EnvFilter;

use crate::config::Environment;

const DEFAULT_FILTER: &str = "info";

/// Installs a global fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// Production gets one JSON object per line; every other environment gets
/// the compact human format. Returns `false` if a global subscriber was
/// already installed, in which case nothing changes.
pub fn init(environment: Environment) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    let installed = if environment.is_production() {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
    installed.is_ok()
}
