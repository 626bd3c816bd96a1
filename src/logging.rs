//! Diagnostics via `RUST_LOG`, written to stderr so `--json` output on stdout stays clean.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Defaults to `warn` when `RUST_LOG` is unset.
///
/// ```bash
/// RUST_LOG=woodshed=debug woodshed practice start interleave
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
