/// Logging setup utilities
use anyhow::{Error, anyhow};
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber with the crate's default filter.
///
/// `RUST_LOG` overrides the default when set. Installing twice fails; test
/// harnesses that call this per-test should discard the error.
pub fn init_logging() -> Result<(), Error> {
    init_logging_with("info,polite_crawler=debug")
}

/// Install the global tracing subscriber with explicit filter directives.
pub fn init_logging_with(directives: &str) -> Result<(), Error> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|error| anyhow!("failed to install tracing subscriber: {}", error))
}

/// Log crawl batch summary
pub fn log_crawl_summary(total_urls: usize, successful: usize, failed: usize, duration_ms: u64) {
    tracing::info!(
        total_urls = total_urls,
        successful = successful,
        failed = failed,
        duration_ms = duration_ms,
        "Crawl batch completed"
    );
}
