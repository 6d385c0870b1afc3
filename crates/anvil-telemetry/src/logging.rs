//! Tracing initialisation for anvil binaries.
//!
//! Call [`init_tracing`] once at program start. Later calls are ignored
//! because the global subscriber can only be set once per process.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialise the global tracing subscriber.
///
/// * `json`: emit newline-delimited JSON instead of human-readable lines.
/// * `level`: default verbosity when `RUST_LOG` is not set.
///
/// The telemetry disclosure is logged through this subscriber, so `level`
/// should not be stricter than `INFO` for interactive use.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).without_time())
            .try_init()
            .ok();
    }
}

/// `level` for anvil itself; the HTTP stack stays at `warn`.
fn default_directives(level: Level) -> String {
    format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn",
        level.as_str().to_ascii_lowercase()
    )
}
