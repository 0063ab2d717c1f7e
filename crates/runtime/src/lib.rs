//! Process bootstrap shared by the service binaries: tracing and metrics.

use tracing::Level;

pub mod metrics;

pub use metrics::{MetricsRegistry, MetricsSnapshot, Stopwatch};

/// Installs the fmt subscriber. `RUST_LOG` refines the filter; calling this
/// more than once is harmless.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_max_level(Level::INFO)
        .try_init();
}
