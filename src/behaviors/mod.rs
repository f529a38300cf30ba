// Named async operations the engine invokes at each pipeline stage

pub mod processors;

use anyhow::Error;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

use crate::config::defaults;
use crate::core::FetchResult;
use crate::network::{dns, fetch};
use crate::scheduler::RequestScheduler;
use crate::session::HostSession;
use crate::trace::Trace;

/// Incremental consumer of decoded response bytes. A processor's final
/// output lands in `FetchResult::processed` under its name; an output named
/// `redirect` is honored by the engine like a `location` header.
pub trait StreamProcessor: Send {
    fn name(&self) -> &str;
    fn on_chunk(&mut self, chunk: &[u8]);
    fn finish(&mut self) -> Option<serde_json::Value>;
}

/// The engine's named operations. Every method has a default matching the
/// engine's stock behavior, except `fetch_page_content`, which needs an HTTP
/// client; [`DefaultBehaviors`] supplies that one. Implementers override any
/// subset, delegating the rest to a wrapped [`DefaultBehaviors`] when the
/// stock transport is wanted.
#[async_trait]
pub trait Behaviors: Send + Sync {
    /// Resolve the trace's hostname to a list of IP strings.
    async fn resolve_host(&self, trace: &Trace) -> Result<Vec<String>, Error> {
        dns::resolve_host_ips(trace.url.host_str().unwrap_or_default()).await
    }

    async fn create_host_session(&self, _trace: &Trace) -> Result<Arc<HostSession>, Error> {
        Ok(Arc::new(HostSession::new(Duration::from_millis(
            defaults::DEFAULT_CRAWL_DELAY_MS,
        ))))
    }

    /// Called when a host session is evicted from its factory.
    async fn dispose_host_session(
        &self,
        _host: &str,
        _session: Arc<HostSession>,
    ) -> Result<(), Error> {
        Ok(())
    }

    async fn create_scheduler(&self, _trace: &Trace) -> Result<Arc<RequestScheduler>, Error> {
        Ok(RequestScheduler::with_defaults())
    }

    /// Called when a scheduler is evicted from its factory.
    async fn dispose_scheduler(
        &self,
        _ip: &str,
        _scheduler: Arc<RequestScheduler>,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// A cached copy of the page, or `None` on cache miss. A cached page
    /// stands in for the fetch and short-circuits scheduling.
    async fn load_cached_page(&self, _trace: &Trace) -> Result<Option<FetchResult>, Error> {
        Ok(None)
    }

    async fn store_cached_page(&self, _trace: &Trace) -> Result<(), Error> {
        Ok(())
    }

    async fn load_cookies(&self, _trace: &Trace) -> Result<(), Error> {
        Ok(())
    }

    async fn store_cookies(&self, _trace: &Trace) -> Result<(), Error> {
        Ok(())
    }

    /// Fetch the page for an admitted request.
    async fn fetch_page_content(&self, trace: &Trace) -> Result<FetchResult, Error>;

    async fn store_page_content(&self, _trace: &Trace) -> Result<(), Error> {
        Ok(())
    }
}

/// Stock behaviors: system DNS resolution and the streaming HTTP fetch.
pub struct DefaultBehaviors {
    client: Client,
}

impl DefaultBehaviors {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            client: fetch::build_client()?,
        })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Behaviors for DefaultBehaviors {
    async fn fetch_page_content(&self, trace: &Trace) -> Result<FetchResult, Error> {
        fetch::fetch_page(&self.client, trace).await
    }
}
