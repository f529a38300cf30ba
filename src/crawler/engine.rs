use anyhow::{Error, anyhow};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::behaviors::{Behaviors, DefaultBehaviors};
use crate::config::CrawlOptions;
use crate::core::{FetchResult, StageTiming, TraceError};
use crate::crawler::builder::{
    CrawlEntry, CrawlReport, CrawlSequence, JsonSummaryBuilder, ResultBuilder,
};
use crate::factory::TemporaryFactory;
use crate::scheduler::RequestScheduler;
use crate::session::HostSession;
use crate::trace::{Trace, stages};
use crate::utils;

type SequenceFuture = Shared<BoxFuture<'static, CrawlSequence>>;
type DnsFuture = Shared<BoxFuture<'static, Result<Arc<Vec<String>>, Arc<Error>>>>;

/// Measure one stage's wall-clock window around a pending operation.
async fn timed<T, F>(operation: F) -> (T, StageTiming)
where
    F: std::future::Future<Output = T>,
{
    let start = utils::epoch_millis();
    let output = operation.await;
    (
        output,
        StageTiming {
            start,
            end: utils::epoch_millis(),
        },
    )
}

/// Per-batch DNS coalescing: one pending resolution per hostname, shared by
/// every trace in the batch. Resolved lists are immutable.
#[derive(Default)]
struct BatchContext {
    dns: Mutex<HashMap<String, DnsFuture>>,
}

impl BatchContext {
    async fn resolve(
        &self,
        behaviors: Arc<dyn Behaviors>,
        trace: &Trace,
    ) -> Result<Vec<String>, Error> {
        let host = trace.url.host_str().unwrap_or_default().to_string();
        let pending = {
            let mut dns = self.dns.lock().await;
            match dns.get(&host) {
                Some(existing) => existing.clone(),
                None => {
                    let snapshot = trace.clone();
                    let fresh: DnsFuture = async move {
                        behaviors
                            .resolve_host(&snapshot)
                            .await
                            .map(Arc::new)
                            .map_err(Arc::new)
                    }
                    .boxed()
                    .shared();
                    dns.insert(host, fresh.clone());
                    fresh
                }
            }
        };
        match pending.await {
            Ok(ips) => Ok(ips.as_ref().clone()),
            Err(error) => Err(anyhow!("{}", error)),
        }
    }
}

struct Engine {
    behaviors: Arc<dyn Behaviors>,
    options: CrawlOptions,
    builder: Arc<dyn ResultBuilder>,
    sessions: TemporaryFactory<String, HostSession>,
    schedulers: TemporaryFactory<String, RequestScheduler>,
    // Global in-flight map: one pipeline per trace id, shared by duplicate
    // inputs and by concurrent crawl batches.
    inflight: Mutex<HashMap<String, SequenceFuture>>,
}

/// The crawl workflow engine.
///
/// Drives each input URL through resolve, prepare, schedule, fetch and
/// completion, composing per-host sessions, per-IP schedulers and the
/// eviction-governed caches that own them.
#[derive(Clone)]
pub struct Crawler {
    inner: Arc<Engine>,
}

impl Crawler {
    /// Engine with the stock behaviors and result builder.
    pub fn new(options: CrawlOptions) -> Result<Self, Error> {
        Ok(Self::assemble(
            options,
            Arc::new(DefaultBehaviors::new()?),
            Arc::new(JsonSummaryBuilder),
        ))
    }

    pub fn with_behaviors(options: CrawlOptions, behaviors: Arc<dyn Behaviors>) -> Self {
        Self::assemble(options, behaviors, Arc::new(JsonSummaryBuilder))
    }

    pub fn with_parts(
        options: CrawlOptions,
        behaviors: Arc<dyn Behaviors>,
        builder: Arc<dyn ResultBuilder>,
    ) -> Self {
        Self::assemble(options, behaviors, builder)
    }

    fn assemble(
        options: CrawlOptions,
        behaviors: Arc<dyn Behaviors>,
        builder: Arc<dyn ResultBuilder>,
    ) -> Self {
        let sessions = TemporaryFactory::new({
            let behaviors = Arc::clone(&behaviors);
            Arc::new(move |host: String, session: Arc<HostSession>| {
                let behaviors = Arc::clone(&behaviors);
                async move {
                    if let Err(error) = behaviors.dispose_host_session(&host, session).await {
                        warn!(host = %host, error = %error, "host session disposal failed");
                    }
                }
                .boxed()
            })
        });

        let schedulers = TemporaryFactory::new({
            let behaviors = Arc::clone(&behaviors);
            Arc::new(move |ip: String, scheduler: Arc<RequestScheduler>| {
                let behaviors = Arc::clone(&behaviors);
                async move {
                    if let Err(error) = behaviors.dispose_scheduler(&ip, scheduler).await {
                        warn!(ip = %ip, error = %error, "scheduler disposal failed");
                    }
                }
                .boxed()
            })
        });

        Self {
            inner: Arc::new(Engine {
                behaviors,
                options,
                builder,
                sessions,
                schedulers,
                inflight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn options(&self) -> &CrawlOptions {
        &self.inner.options
    }

    /// Crawl a batch of URLs. Returns one entry per input, in client order;
    /// duplicate inputs share a single pipeline run.
    pub async fn crawl(&self, urls: &[&str]) -> CrawlReport {
        Engine::crawl(&self.inner, urls).await
    }
}

impl Engine {
    async fn crawl(engine: &Arc<Engine>, urls: &[&str]) -> CrawlReport {
        let started = Instant::now();
        let batch = Arc::new(BatchContext::default());
        info!(url_count = urls.len(), "crawl batch started");

        let mut jobs = Vec::with_capacity(urls.len());
        for input in urls {
            match utils::canonicalize(input) {
                Ok(url) => {
                    let id = utils::trace_id(&url);
                    let pending =
                        Engine::sequence_for(engine, url, Arc::clone(&batch), 0, None, None).await;
                    jobs.push(((*input).to_string(), Some(id), Ok(pending)));
                }
                Err(error) => {
                    jobs.push(((*input).to_string(), None, Err(error)));
                }
            }
        }

        let mut entries = Vec::with_capacity(jobs.len());
        for (input, id, job) in jobs {
            let entry = match job {
                Ok(pending) => {
                    let sequence = pending.await;
                    match engine.builder.assemble(&input, &sequence).await {
                        Ok(rendered) => CrawlEntry {
                            input,
                            id,
                            sequence,
                            rendered: Some(rendered),
                            error: None,
                        },
                        Err(error) => {
                            warn!(input = %input, error = %error, "result assembly failed");
                            CrawlEntry {
                                input,
                                id,
                                sequence,
                                rendered: None,
                                error: Some(error.to_string()),
                            }
                        }
                    }
                }
                Err(error) => CrawlEntry {
                    input,
                    id,
                    sequence: Arc::new(Vec::new()),
                    rendered: None,
                    error: Some(error.to_string()),
                },
            };
            entries.push(entry);
        }

        let processed = entries.len();
        let succeeded = entries.iter().filter(|entry| entry.succeeded()).count();
        let failed = processed - succeeded;
        utils::log_crawl_summary(
            processed,
            succeeded,
            failed,
            started.elapsed().as_millis() as u64,
        );

        CrawlReport {
            entries,
            processed,
            succeeded,
            failed,
        }
    }

    /// The dedup path: one pipeline per trace id. A second request for an
    /// in-flight id returns the same shared sequence future.
    async fn sequence_for(
        engine: &Arc<Engine>,
        url: Url,
        batch: Arc<BatchContext>,
        hops: u32,
        inherited_ips: Option<Vec<String>>,
        inherited_session: Option<Arc<HostSession>>,
    ) -> SequenceFuture {
        let id = utils::trace_id(&url);
        let mut inflight = engine.inflight.lock().await;
        if let Some(existing) = inflight.get(&id) {
            debug!(id = %id, url = %url, "joined in-flight pipeline");
            return existing.clone();
        }

        let pipeline_engine = Arc::clone(engine);
        let done_id = id.clone();
        let pipeline: BoxFuture<'static, CrawlSequence> = Box::pin(async move {
            let sequence = Engine::run_pipeline(
                Arc::clone(&pipeline_engine),
                url,
                batch,
                hops,
                inherited_ips,
                inherited_session,
            )
            .await;
            pipeline_engine.inflight.lock().await.remove(&done_id);
            Arc::new(sequence)
        });

        let handle = tokio::spawn(pipeline);
        let shared: SequenceFuture = handle
            .map(|joined| joined.unwrap_or_else(|_| Arc::new(Vec::new())))
            .boxed()
            .shared();
        inflight.insert(id, shared.clone());
        shared
    }

    /// One URL's trip through the pipeline, plus the sequences of any
    /// redirects it leads to. Boxed because redirects recurse.
    fn run_pipeline(
        engine: Arc<Engine>,
        url: Url,
        batch: Arc<BatchContext>,
        hops: u32,
        inherited_ips: Option<Vec<String>>,
        inherited_session: Option<Arc<HostSession>>,
    ) -> BoxFuture<'static, Vec<Trace>> {
        Box::pin(async move {
            let mut trace = Trace::new(url, &engine.options);
            debug!(id = %trace.id, url = %trace.url, "pipeline started");

            let cached = engine
                .prepare(&mut trace, &batch, inherited_ips, inherited_session)
                .await;

            let from_cache = cached.is_some();
            if let Some(page) = cached {
                debug!(id = %trace.id, "serving cached page");
                trace.response = Some(page);
            }

            if !trace.has_errors() && !from_cache {
                engine.init(&mut trace).await;
                if !trace.has_errors() {
                    engine.schedule_and_fetch(&mut trace).await;
                }
            }

            if !trace.has_errors()
                && let Some(child) = Engine::complete(&engine, &mut trace, &batch, hops).await
            {
                let child_sequence = child.await;
                let mut sequence = vec![trace];
                sequence.extend(child_sequence.iter().cloned());
                return sequence;
            }

            vec![trace]
        })
    }

    /// Resolve the host, probe the page cache and acquire the host session,
    /// all concurrently; then pick the IP the fetch will use.
    async fn prepare(
        &self,
        trace: &mut Trace,
        batch: &Arc<BatchContext>,
        inherited_ips: Option<Vec<String>>,
        inherited_session: Option<Arc<HostSession>>,
    ) -> Option<FetchResult> {
        let host = trace.url.host_str().unwrap_or_default().to_string();
        let snapshot = trace.clone();
        let session_grace = Duration::from_millis(self.options.session_grace_ms);

        let resolve_branch = async {
            match inherited_ips {
                Some(ips) => (Ok(ips), None),
                None => {
                    let (result, timing) =
                        timed(batch.resolve(Arc::clone(&self.behaviors), &snapshot)).await;
                    (result, Some(timing))
                }
            }
        };

        let cached_branch = async { timed(self.behaviors.load_cached_page(&snapshot)).await };

        let session_branch = async {
            match inherited_session {
                Some(session) => (Ok(session), None),
                None => {
                    let behaviors = Arc::clone(&self.behaviors);
                    let build_snapshot = snapshot.clone();
                    let build = move || {
                        let behaviors = Arc::clone(&behaviors);
                        let snapshot = build_snapshot.clone();
                        async move { behaviors.create_host_session(&snapshot).await }
                    };
                    let (result, timing) =
                        timed(self.sessions.get(session_grace, host.clone(), build)).await;
                    (result, Some(timing))
                }
            }
        };

        let ((resolved, resolve_timing), (cached, cached_timing), (session, session_timing)) =
            tokio::join!(resolve_branch, cached_branch, session_branch);

        if let Some(timing) = resolve_timing {
            trace.record_timing(stages::RESOLVE_HOST, timing);
        }
        trace.record_timing(stages::LOAD_CACHED_PAGE, cached_timing);
        if let Some(timing) = session_timing {
            trace.record_timing(stages::CREATE_HOST_SESSION, timing);
        }

        match resolved {
            Ok(ips) => trace.ip_list = ips,
            Err(error) => trace.add_generic_error(error.to_string()),
        }
        let cached_page = match cached {
            Ok(page) => page,
            Err(error) => {
                trace.add_generic_error(error.to_string());
                None
            }
        };
        match session {
            Ok(session) => trace.session = Some(session),
            Err(error) => trace.add_generic_error(error.to_string()),
        }

        if !trace.has_errors() {
            if let Some(session) = &trace.session
                && !trace.ip_list.is_empty()
            {
                match session.select_ip(&trace.ip_list) {
                    Ok(ip) => trace.ip = Some(ip),
                    Err(error) => trace.add_generic_error(error.to_string()),
                }
            }
            if !trace.has_errors() && trace.ip.is_none() && cached_page.is_none() {
                trace.add_error(TraceError::no_ip_available());
            }
        }

        if let Some(session) = &trace.session
            && session.is_empty()
        {
            let _ = self.sessions.destroy(&host).await;
        }

        cached_page
    }

    /// Acquire the per-IP scheduler and load cookies, concurrently.
    async fn init(&self, trace: &mut Trace) {
        let snapshot = trace.clone();
        let scheduler_grace = Duration::from_millis(self.options.scheduler_grace_ms);
        let ip = trace.ip.clone();

        let scheduler_branch = async {
            match &ip {
                Some(ip) => {
                    let behaviors = Arc::clone(&self.behaviors);
                    let build_snapshot = snapshot.clone();
                    let build = move || {
                        let behaviors = Arc::clone(&behaviors);
                        let snapshot = build_snapshot.clone();
                        async move { behaviors.create_scheduler(&snapshot).await }
                    };
                    let (result, timing) =
                        timed(self.schedulers.get(scheduler_grace, ip.clone(), build)).await;
                    (Some(result), Some(timing))
                }
                None => (None, None),
            }
        };

        let cookies_branch = async { timed(self.behaviors.load_cookies(&snapshot)).await };

        let ((scheduler, scheduler_timing), (cookies, cookies_timing)) =
            tokio::join!(scheduler_branch, cookies_branch);

        if let Some(timing) = scheduler_timing {
            trace.record_timing(stages::CREATE_SCHEDULER, timing);
        }
        trace.record_timing(stages::LOAD_COOKIES, cookies_timing);

        match scheduler {
            Some(Ok(scheduler)) => trace.scheduler = Some(scheduler),
            Some(Err(error)) => trace.add_generic_error(error.to_string()),
            None => {}
        }
        if let Err(error) = cookies {
            trace.add_generic_error(error.to_string());
        }

        if !trace.has_errors() && (trace.ip.is_none() || trace.scheduler.is_none()) {
            trace.add_error(TraceError::missing_scheduling_info());
        }

        if !trace.has_errors()
            && let Some(session) = &trace.session
            && let Some(header) = session.cookie_jar().header_for(&trace.url).await
        {
            trace.request.insert("cookie".to_string(), header);
        }

        if let (Some(scheduler), Some(ip)) = (&trace.scheduler, &trace.ip)
            && scheduler.is_empty().await
        {
            let _ = self.schedulers.destroy(ip).await;
        }
    }

    /// Wait for admission, then fetch. The admitted request settles exactly
    /// once on both the session and the scheduler, success or failure.
    async fn schedule_and_fetch(&self, trace: &mut Trace) {
        let (Some(session), Some(scheduler)) = (trace.session.clone(), trace.scheduler.clone())
        else {
            return;
        };

        let (admitted, timing) =
            timed(scheduler.schedule(Arc::clone(&session), trace.url.clone())).await;
        trace.record_timing(stages::SCHEDULING, timing);
        match admitted {
            Ok(waited_ms) => {
                debug!(id = %trace.id, waited_ms = waited_ms, "request admitted");
            }
            Err(error) => {
                trace.add_generic_error(error.to_string());
                return;
            }
        }

        let snapshot = trace.clone();
        let (fetched, timing) = timed(self.behaviors.fetch_page_content(&snapshot)).await;
        trace.record_timing(stages::FETCH_PAGE_CONTENT, timing);

        session.request_end();
        scheduler.request_end().await;

        match fetched {
            Ok(result) => {
                let set_cookies = result.header_values("set-cookie").to_vec();
                if !set_cookies.is_empty() {
                    session.cookie_jar().store(&trace.url, set_cookies).await;
                }
                trace.response = Some(result);
            }
            Err(error) => trace.add_generic_error(error.to_string()),
        }

        if session.is_empty()
            && let Some(host) = trace.url.host_str()
        {
            let _ = self.sessions.destroy(&host.to_string()).await;
        }
        if scheduler.is_empty().await
            && let Some(ip) = &trace.ip
        {
            let _ = self.schedulers.destroy(ip).await;
        }
    }

    /// Store results, then follow a redirect into a child pipeline.
    async fn complete(
        engine: &Arc<Engine>,
        trace: &mut Trace,
        batch: &Arc<BatchContext>,
        hops: u32,
    ) -> Option<SequenceFuture> {
        let snapshot = trace.clone();
        let (page, cookies, cached) = tokio::join!(
            timed(engine.behaviors.store_page_content(&snapshot)),
            timed(engine.behaviors.store_cookies(&snapshot)),
            timed(engine.behaviors.store_cached_page(&snapshot)),
        );

        trace.record_timing(stages::STORE_PAGE_CONTENT, page.1);
        trace.record_timing(stages::STORE_COOKIES, cookies.1);
        trace.record_timing(stages::STORE_CACHED_PAGE, cached.1);
        for outcome in [page.0, cookies.0, cached.0] {
            if let Err(error) = outcome {
                trace.add_generic_error(error.to_string());
            }
        }

        let location = trace
            .response
            .as_ref()
            .and_then(|response| response.redirect_target().map(str::to_string))?;

        let target = match trace.url.join(&location) {
            Ok(target) => target,
            Err(error) => {
                trace.add_generic_error(format!(
                    "invalid redirect location `{}`: {}",
                    location, error
                ));
                return None;
            }
        };

        if hops + 1 > engine.options.max_redirects {
            trace.add_generic_error(format!(
                "redirect limit of {} exceeded at {}",
                engine.options.max_redirects, target
            ));
            return None;
        }

        trace.redirect_location = Some(target.clone());
        info!(from = %trace.url, to = %target, hop = hops + 1, "following redirect");

        // same-host redirects reuse the resolved IPs and session
        let same_host = target.host_str() == trace.url.host_str();
        let inherited_ips = (same_host && !trace.ip_list.is_empty()).then(|| trace.ip_list.clone());
        let inherited_session = if same_host {
            trace.session.clone()
        } else {
            None
        };

        Some(
            Engine::sequence_for(
                engine,
                target,
                Arc::clone(batch),
                hops + 1,
                inherited_ips,
                inherited_session,
            )
            .await,
        )
    }
}
