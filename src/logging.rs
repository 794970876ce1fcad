//! Tracing setup for the `qemu-runner` binary
//!
//! Filter precedence: `--verbose` > `RUST_LOG` > config `log_level` > "warn".
//! Events go to stderr so dry-run output on stdout stays clean.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Default filter when nothing else is configured
pub const DEFAULT_FILTER: &str = "warn";

/// Pick the filter directive.
pub fn filter_directive(verbose: bool, rust_log: Option<&str>, config_level: Option<&str>) -> String {
    if verbose {
        return "debug".to_string();
    }
    rust_log
        .filter(|v| !v.trim().is_empty())
        .or(config_level)
        .unwrap_or(DEFAULT_FILTER)
        .to_string()
}

/// Install the global subscriber. Calling it twice is a no-op.
pub fn init(verbose: bool, config_level: Option<&str>) {
    let rust_log = std::env::var("RUST_LOG").ok();
    let directive = filter_directive(verbose, rust_log.as_deref(), config_level);
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(filter);

    let _ = tracing_subscriber::registry().with(layer).try_init();
}
