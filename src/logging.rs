//! `tracing` subscriber setup for the CLI.

use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs a console subscriber filtered by `filter` (`debug` when `verbose`).
///
/// Safe to call more than once; later calls keep the existing subscriber.
pub fn init(filter: &str, verbose: bool) {
    let directive = if verbose { "debug" } else { filter };
    let env_filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::registry().with(
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter),
    );

    if subscriber.try_init().is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
