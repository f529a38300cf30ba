// Shared helpers: canonical URL handling and logging setup

pub mod logging;
pub mod url;

pub use logging::{init_logging, init_logging_with, log_crawl_summary};
pub use url::{canonicalize, epoch_millis, trace_id};
