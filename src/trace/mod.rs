// Per-URL workflow record threaded through the crawl pipeline

use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

use crate::config::{CrawlOptions, ProcessorFactory};
use crate::core::{FetchResult, StageTiming, TraceError};
use crate::scheduler::RequestScheduler;
use crate::session::HostSession;
use crate::utils;

/// Stable stage names used as timing keys on every trace.
pub mod stages {
    pub const RESOLVE_HOST: &str = "resolveHost";
    pub const LOAD_CACHED_PAGE: &str = "loadCachedPage";
    pub const CREATE_HOST_SESSION: &str = "createHostSession";
    pub const CREATE_SCHEDULER: &str = "createScheduler";
    pub const LOAD_COOKIES: &str = "loadCookies";
    pub const SCHEDULING: &str = "scheduling";
    pub const FETCH_PAGE_CONTENT: &str = "fetchPageContent";
    pub const STORE_PAGE_CONTENT: &str = "storePageContent";
    pub const STORE_COOKIES: &str = "storeCookies";
    pub const STORE_CACHED_PAGE: &str = "storeCachedPage";
}

/// The per-URL record: inputs, acquired resources, outputs, timings and
/// errors, carried through every pipeline stage.
///
/// Sessions and schedulers are owned by their factories; a trace only holds
/// shared references to them.
#[derive(Clone)]
pub struct Trace {
    /// SHA-1 of the canonical href; the URL's stable identity.
    pub id: String,
    pub url: Url,
    /// IP selected for the fetch; unset until preparation completes.
    pub ip: Option<String>,
    /// Creation timestamp, milliseconds since the Unix epoch.
    pub start: u64,
    /// Outgoing request headers.
    pub request: HashMap<String, String>,
    pub response: Option<FetchResult>,
    /// Failures in the order they were recorded.
    pub errors: Vec<TraceError>,
    /// Per-stage wall-clock timings keyed by the names in [`stages`].
    pub timings: HashMap<&'static str, StageTiming>,
    /// IPs returned by host resolution.
    pub ip_list: Vec<String>,
    pub session: Option<Arc<HostSession>>,
    pub scheduler: Option<Arc<RequestScheduler>>,
    /// Target of a redirect response, once one is detected.
    pub redirect_location: Option<Url>,
    /// Upper bound on captured decoded content, in bytes.
    pub fetch_limit: usize,
    pub processors: Option<ProcessorFactory>,
}

impl Trace {
    pub fn new(url: Url, options: &CrawlOptions) -> Self {
        let id = utils::trace_id(&url);

        let mut request = HashMap::new();
        request.insert("user-agent".to_string(), options.user_agent.clone());
        request.insert("accept".to_string(), options.accept.clone());
        request.insert(
            "accept-language".to_string(),
            options.accept_language.clone(),
        );
        request.insert("accept-charset".to_string(), options.accept_charset.clone());
        for (name, value) in &options.headers {
            request.insert(name.to_ascii_lowercase(), value.clone());
        }

        Self {
            id,
            url,
            ip: None,
            start: utils::epoch_millis(),
            request,
            response: None,
            errors: Vec::new(),
            timings: HashMap::new(),
            ip_list: Vec::new(),
            session: None,
            scheduler: None,
            redirect_location: None,
            fetch_limit: options.fetch_limit,
            processors: options.processors.clone(),
        }
    }

    pub fn add_error(&mut self, error: TraceError) {
        self.errors.push(error);
    }

    pub fn add_generic_error(&mut self, message: impl Into<String>) {
        self.errors.push(TraceError::generic(message));
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn record_timing(&mut self, stage: &'static str, timing: StageTiming) {
        self.timings.insert(stage, timing);
    }

    pub fn user_agent(&self) -> &str {
        self.request
            .get("user-agent")
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Status of the fetch response, when one exists.
    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|response| response.status)
    }
}

impl std::fmt::Debug for Trace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trace")
            .field("id", &self.id)
            .field("url", &self.url.as_str())
            .field("ip", &self.ip)
            .field("status", &self.status())
            .field("errors", &self.errors)
            .field("redirect_location", &self.redirect_location.as_ref().map(Url::as_str))
            .finish()
    }
}
