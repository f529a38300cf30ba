use std::collections::HashMap;
use std::sync::Arc;

use crate::behaviors::StreamProcessor;

/// Factory invoked once per fetch to produce the byte-stream processors
/// attached to that request.
pub type ProcessorFactory = Arc<dyn Fn() -> Vec<Box<dyn StreamProcessor>> + Send + Sync>;

/// Per-crawl configuration merged onto every trace before execution.
#[derive(Clone)]
pub struct CrawlOptions {
    pub user_agent: String,
    pub accept: String,
    pub accept_language: String,
    pub accept_charset: String,
    /// Upper bound on captured decoded content per fetch, in bytes.
    pub fetch_limit: usize,
    /// Extra outgoing headers merged onto every trace.
    pub headers: HashMap<String, String>,
    /// Redirect chains longer than this are cut with an error on the trace.
    pub max_redirects: u32,
    /// Eviction grace for host sessions, captured at factory `get` time.
    pub session_grace_ms: u64,
    /// Eviction grace for per-IP schedulers.
    pub scheduler_grace_ms: u64,
    pub processors: Option<ProcessorFactory>,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            user_agent: defaults::USER_AGENT.to_string(),
            accept: defaults::ACCEPT_HEADER.to_string(),
            accept_language: defaults::ACCEPT_LANGUAGE_HEADER.to_string(),
            accept_charset: defaults::ACCEPT_CHARSET_HEADER.to_string(),
            fetch_limit: defaults::FETCH_LIMIT_BYTES,
            headers: HashMap::new(),
            max_redirects: defaults::MAX_REDIRECTS,
            session_grace_ms: defaults::SESSION_GRACE_MS,
            scheduler_grace_ms: defaults::SCHEDULER_GRACE_MS,
            processors: None,
        }
    }
}

impl CrawlOptions {
    pub fn builder() -> CrawlOptionsBuilder {
        CrawlOptionsBuilder::default()
    }
}

/// Builder for [`CrawlOptions`]
#[derive(Default)]
pub struct CrawlOptionsBuilder {
    options: CrawlOptions,
}

impl CrawlOptionsBuilder {
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.options.user_agent = user_agent.into();
        self
    }

    pub fn fetch_limit(mut self, bytes: usize) -> Self {
        self.options.fetch_limit = bytes;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.headers.insert(name.into(), value.into());
        self
    }

    pub fn max_redirects(mut self, hops: u32) -> Self {
        self.options.max_redirects = hops;
        self
    }

    pub fn processors(mut self, factory: ProcessorFactory) -> Self {
        self.options.processors = Some(factory);
        self
    }

    pub fn build(self) -> CrawlOptions {
        self.options
    }
}

pub mod defaults {
    // Politeness timing
    pub const DEFAULT_CRAWL_DELAY_MS: u64 = 1000;
    pub const DEFAULT_SCHEDULER_DELAY_MS: u64 = 500;
    pub const DEFAULT_CONNECTION_LIMIT: usize = 4;

    // Factory eviction grace windows
    pub const SESSION_GRACE_MS: u64 = 1000;
    pub const SCHEDULER_GRACE_MS: u64 = 500;

    // Fetch settings
    pub const FETCH_LIMIT_BYTES: usize = 5 * 1024 * 1024;
    pub const MAX_REDIRECTS: u32 = 10;
    pub const REQUEST_TIMEOUT_SECS: u64 = 30;
    pub const CONNECTION_POOL_SIZE: usize = 10;

    // Outgoing header defaults inherited by every trace
    pub const USER_AGENT: &str = "PoliteCrawler/0.1";
    pub const ACCEPT_HEADER: &str =
        "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
    pub const ACCEPT_LANGUAGE_HEADER: &str = "en-US,en;q=0.9";
    pub const ACCEPT_CHARSET_HEADER: &str = "utf-8, iso-8859-1;q=0.5";
    pub const ACCEPT_ENCODING_HEADER: &str = "gzip, deflate";

    // IP rotation: every Nth issued request goes to a random non-primary IP
    pub const IP_ROTATION_PERIOD: u64 = 10;
}
