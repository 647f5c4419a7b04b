//! Opt-in tracing subscriber wired up for progress bars.

use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Install a global subscriber that renders step and task progress bars
/// while keeping log lines readable alongside them.
///
/// The filter honors `RUST_LOG` and defaults to `info`. Call this once at
/// startup; embedding applications with their own subscriber should skip it.
pub fn init() {
    let indicatif_layer = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(indicatif_layer.get_stderr_writer()))
        .with(indicatif_layer)
        .init();
}
