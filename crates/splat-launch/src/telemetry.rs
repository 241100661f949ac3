//! Tracing subscriber setup for the launcher binary.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Crates whose events follow the requested level; everything else stays at `warn`.
const LAUNCH_TARGETS: [&str; 2] = ["splat_launch", "splat_launch_cli"];

/// Default filter when `RUST_LOG` is unset.
fn default_filter(level: Level) -> EnvFilter {
    let directives = LAUNCH_TARGETS
        .iter()
        .map(|target| format!("{target}={}", level.as_str().to_lowercase()))
        .chain(std::iter::once("warn".to_string()))
        .collect::<Vec<_>>()
        .join(",");
    EnvFilter::new(directives)
}

/// Install the global subscriber, writing to stderr so stdout carries only
/// command output. Returns `false` if a subscriber was already installed.
pub fn init_tracing(json: bool, level: Level) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level));

    let json_layer = json.then(|| {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr)
    });
    let text_layer = (!json).then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .is_ok()
}
