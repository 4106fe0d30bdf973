//! Tracing subscriber setup for binaries and tests.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Env var read first for the log filter, before `RUST_LOG`.
pub const LOG_ENV: &str = "DISPATCH_LOG";
pub const DEFAULT_FILTER: &str = "info";

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Resolves the filter directive: `DISPATCH_LOG`, then `RUST_LOG`, then `fallback`.
pub fn filter_directive(fallback: &str) -> String {
    [LOG_ENV, "RUST_LOG"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|value| !value.trim().is_empty()))
        .unwrap_or_else(|| fallback.to_string())
}

/// Installs a fmt subscriber once per process. Later calls, or a subscriber
/// installed elsewhere, leave the existing one in place.
pub fn init_tracing() {
    init_tracing_with(DEFAULT_FILTER);
}

pub fn init_tracing_with(fallback: &str) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let directive = filter_directive(fallback);
        let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        let subscriber = tracing_subscriber::registry().with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_filter(filter),
        );
        if subscriber.try_init().is_err() {
            tracing::debug!("global tracing subscriber already set");
        }
        tracing::debug!(filter = %directive, "tracing initialized");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_tracing_with("warn");
        init_tracing();
    }
}
