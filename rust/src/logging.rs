//! Log setup for the binary. The configured `debugLevel` applies to this
//! crate's targets unless `RUST_LOG` is set, and a level that does not parse
//! falls back to `info`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::DEFAULT_DEBUG_LEVEL;

/// Builds the filter used by the binary from the process environment.
pub fn env_filter(default_level: &str) -> EnvFilter {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    filter_from(rust_log.as_deref(), default_level)
}

/// `rust_log` wins when it is non-empty and parses; then the configured
/// level; then `info`.
pub fn filter_from(rust_log: Option<&str>, default_level: &str) -> EnvFilter {
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_new(format!("cookie_signer={default_level}")).ok())
        .unwrap_or_else(|| EnvFilter::new(format!("cookie_signer={DEFAULT_DEBUG_LEVEL}")))
}

/// Installs a compact stderr subscriber. Returns `false` when a global
/// subscriber was already set.
pub fn init_logging(default_level: &str) -> bool {
    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .try_init()
        .is_ok()
}
