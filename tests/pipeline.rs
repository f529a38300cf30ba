/// End-to-end pipeline behavior with scripted behaviors: workflow errors,
/// dedup, redirects, cached pages and result assembly.
use anyhow::{Error, anyhow};
use async_trait::async_trait;
use polite_crawler::{
    Behaviors, CrawlOptions, Crawler, FetchResult, HostSession, NO_IP_AVAILABLE, RequestScheduler,
    ResultBuilder, Trace, stages,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn init_test_logging() {
    let _ = polite_crawler::init_logging_with("warn");
}

fn page(status: u16) -> FetchResult {
    FetchResult {
        version: "HTTP/1.1".to_string(),
        status,
        status_text: "OK".to_string(),
        ..FetchResult::default()
    }
}

fn redirect_to(location: &str) -> FetchResult {
    let mut result = page(301);
    result.status_text = "Moved Permanently".to_string();
    result
        .headers
        .insert("location".to_string(), vec![location.to_string()]);
    result
}

/// Behaviors resolving every host to 127.0.0.1 with short politeness
/// delays, serving scripted responses keyed by URL path.
struct Scripted {
    responses: HashMap<String, FetchResult>,
    fetches: Arc<AtomicUsize>,
}

impl Scripted {
    fn new(responses: HashMap<String, FetchResult>) -> (Arc<Self>, Arc<AtomicUsize>) {
        let fetches = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(Self {
                responses,
                fetches: Arc::clone(&fetches),
            }),
            fetches,
        )
    }
}

#[async_trait]
impl Behaviors for Scripted {
    async fn resolve_host(&self, _trace: &Trace) -> Result<Vec<String>, Error> {
        Ok(vec!["127.0.0.1".to_string()])
    }

    async fn create_host_session(&self, _trace: &Trace) -> Result<Arc<HostSession>, Error> {
        Ok(Arc::new(HostSession::new(Duration::from_millis(10))))
    }

    async fn create_scheduler(&self, _trace: &Trace) -> Result<Arc<RequestScheduler>, Error> {
        Ok(RequestScheduler::new(Duration::from_millis(5), 4))
    }

    async fn fetch_page_content(&self, trace: &Trace) -> Result<FetchResult, Error> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.responses
            .get(trace.url.path())
            .cloned()
            .ok_or_else(|| anyhow!("no scripted response for {}", trace.url.path()))
    }
}

#[tokio::test(start_paused = true)]
async fn empty_resolution_records_the_no_ip_workflow_error() {
    init_test_logging();

    struct NoRecords;

    #[async_trait]
    impl Behaviors for NoRecords {
        async fn resolve_host(&self, _trace: &Trace) -> Result<Vec<String>, Error> {
            Ok(Vec::new())
        }

        async fn fetch_page_content(&self, _trace: &Trace) -> Result<FetchResult, Error> {
            unreachable!("fetch must not run without an IP")
        }
    }

    let crawler = Crawler::with_behaviors(CrawlOptions::default(), Arc::new(NoRecords));
    let report = crawler.crawl(&["http://example.com/"]).await;

    assert_eq!(report.processed, 1);
    assert_eq!(report.failed, 1);
    let entry = &report.entries[0];
    assert_eq!(entry.sequence.len(), 1);

    let trace = &entry.sequence[0];
    assert_eq!(trace.errors.len(), 1);
    assert_eq!(trace.errors[0].code(), Some(NO_IP_AVAILABLE));
    assert!(trace.ip.is_none());
    assert!(trace.ip_list.is_empty());
}

#[tokio::test(start_paused = true)]
async fn failing_scheduler_behavior_keeps_the_selected_ip() {
    struct BrokenScheduler;

    #[async_trait]
    impl Behaviors for BrokenScheduler {
        async fn resolve_host(&self, _trace: &Trace) -> Result<Vec<String>, Error> {
            Ok(vec!["127.0.0.1".to_string()])
        }

        async fn create_scheduler(&self, _trace: &Trace) -> Result<Arc<RequestScheduler>, Error> {
            Err(anyhow!("test"))
        }

        async fn fetch_page_content(&self, _trace: &Trace) -> Result<FetchResult, Error> {
            unreachable!("fetch must not run without a scheduler")
        }
    }

    let crawler = Crawler::with_behaviors(CrawlOptions::default(), Arc::new(BrokenScheduler));
    let report = crawler.crawl(&["http://example.com/"]).await;

    let entry = &report.entries[0];
    assert_eq!(entry.sequence.len(), 1);
    let trace = &entry.sequence[0];

    assert_eq!(trace.ip.as_deref(), Some("127.0.0.1"));
    assert_eq!(trace.errors.len(), 1);
    assert!(!trace.errors[0].is_workflow());
    assert_eq!(trace.errors[0].message(), "test");
}

#[tokio::test(start_paused = true)]
async fn duplicate_inputs_share_one_pipeline_run() {
    let mut responses = HashMap::new();
    responses.insert("/page".to_string(), page(200));
    let (behaviors, fetches) = Scripted::new(responses);

    let crawler = Crawler::with_behaviors(CrawlOptions::default(), behaviors);
    let report = crawler
        .crawl(&["http://dup.example/page", "http://dup.example/page"])
        .await;

    assert_eq!(report.processed, 2);
    assert_eq!(report.succeeded, 2);
    assert_eq!(fetches.load(Ordering::SeqCst), 1);

    assert_eq!(report.entries[0].id, report.entries[1].id);
    assert!(Arc::ptr_eq(
        &report.entries[0].sequence,
        &report.entries[1].sequence
    ));
}

#[tokio::test(start_paused = true)]
async fn redirects_append_child_traces_to_the_sequence() {
    init_test_logging();

    let mut responses = HashMap::new();
    responses.insert("/start".to_string(), redirect_to("/target"));
    responses.insert("/target".to_string(), page(200));
    let (behaviors, fetches) = Scripted::new(responses);

    let crawler = Crawler::with_behaviors(CrawlOptions::default(), behaviors);
    let report = crawler.crawl(&["http://redir.example/start"]).await;

    let entry = &report.entries[0];
    assert!(entry.succeeded());
    assert_eq!(entry.sequence.len(), 2);

    let parent = &entry.sequence[0];
    let child = &entry.sequence[1];
    assert_eq!(
        parent.redirect_location.as_ref().map(|u| u.as_str()),
        Some("http://redir.example/target")
    );
    assert_eq!(child.url.path(), "/target");
    assert_eq!(child.status(), Some(200));
    // same-host redirect inherits the resolved IPs
    assert_eq!(child.ip_list, parent.ip_list);
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn redirect_chains_are_cut_at_the_hop_limit() {
    let mut responses = HashMap::new();
    responses.insert("/start".to_string(), redirect_to("/hop1"));
    responses.insert("/hop1".to_string(), redirect_to("/hop2"));
    responses.insert("/hop2".to_string(), redirect_to("/hop3"));
    responses.insert("/hop3".to_string(), page(200));
    let (behaviors, _) = Scripted::new(responses);

    let options = CrawlOptions::builder().max_redirects(2).build();
    let crawler = Crawler::with_behaviors(options, behaviors);
    let report = crawler.crawl(&["http://loop.example/start"]).await;

    let entry = &report.entries[0];
    assert_eq!(entry.sequence.len(), 3);
    let last = entry.sequence.last().unwrap();
    assert!(last.has_errors());
    assert!(last.errors[0].message().contains("redirect limit"));
    assert!(!entry.succeeded());
}

#[tokio::test(start_paused = true)]
async fn processor_outputs_can_drive_redirects() {
    let mut start = page(200);
    start
        .processed
        .insert("redirect".to_string(), json!("/moved"));

    let mut responses = HashMap::new();
    responses.insert("/start".to_string(), start);
    responses.insert("/moved".to_string(), page(200));
    let (behaviors, _) = Scripted::new(responses);

    let crawler = Crawler::with_behaviors(CrawlOptions::default(), behaviors);
    let report = crawler.crawl(&["http://proc.example/start"]).await;

    let entry = &report.entries[0];
    assert!(entry.succeeded());
    assert_eq!(entry.sequence.len(), 2);
    assert_eq!(entry.sequence[1].url.path(), "/moved");
}

#[tokio::test(start_paused = true)]
async fn cookies_accumulate_across_same_host_redirects() {
    let mut start = redirect_to("/target");
    start
        .headers
        .insert("set-cookie".to_string(), vec!["sid=42; Path=/".to_string()]);

    let mut responses = HashMap::new();
    responses.insert("/start".to_string(), start);
    responses.insert("/target".to_string(), page(200));
    let (behaviors, _) = Scripted::new(responses);

    let crawler = Crawler::with_behaviors(CrawlOptions::default(), behaviors);
    let report = crawler.crawl(&["http://cookie.example/start"]).await;

    let entry = &report.entries[0];
    assert!(entry.succeeded());
    let child = &entry.sequence[1];
    assert_eq!(child.request.get("cookie").map(String::as_str), Some("sid=42"));
}

#[tokio::test(start_paused = true)]
async fn cached_pages_stand_in_for_the_fetch() {
    struct CachedOnly {
        fetches: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Behaviors for CachedOnly {
        async fn resolve_host(&self, _trace: &Trace) -> Result<Vec<String>, Error> {
            Ok(Vec::new())
        }

        async fn load_cached_page(&self, _trace: &Trace) -> Result<Option<FetchResult>, Error> {
            Ok(Some(page(200)))
        }

        async fn fetch_page_content(&self, _trace: &Trace) -> Result<FetchResult, Error> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(page(200))
        }
    }

    let fetches = Arc::new(AtomicUsize::new(0));
    let behaviors = Arc::new(CachedOnly {
        fetches: Arc::clone(&fetches),
    });
    let crawler = Crawler::with_behaviors(CrawlOptions::default(), behaviors);
    let report = crawler.crawl(&["http://cache.example/"]).await;

    let entry = &report.entries[0];
    assert!(entry.succeeded(), "cached page avoids the -7 error");
    assert_eq!(entry.sequence[0].status(), Some(200));
    assert!(entry.sequence[0].ip.is_none());
    assert_eq!(fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn builder_failures_do_not_suppress_other_entries() {
    struct PickyBuilder;

    #[async_trait]
    impl ResultBuilder for PickyBuilder {
        async fn assemble(&self, input: &str, _sequence: &[Trace]) -> Result<Value, Error> {
            if input.contains("bad") {
                Err(anyhow!("render failed"))
            } else {
                Ok(json!({ "input": input }))
            }
        }
    }

    let mut responses = HashMap::new();
    responses.insert("/bad".to_string(), page(200));
    responses.insert("/ok".to_string(), page(200));
    let (behaviors, _) = Scripted::new(responses);

    let crawler = Crawler::with_parts(CrawlOptions::default(), behaviors, Arc::new(PickyBuilder));
    let report = crawler
        .crawl(&["http://a.example/bad", "http://b.example/ok"])
        .await;

    assert_eq!(report.entries[0].error.as_deref(), Some("render failed"));
    assert!(report.entries[0].rendered.is_none());
    assert!(report.entries[1].rendered.is_some());
    assert!(report.entries[1].error.is_none());
}

#[tokio::test(start_paused = true)]
async fn every_stage_records_a_consistent_timing_window() {
    let mut responses = HashMap::new();
    responses.insert("/".to_string(), page(200));
    let (behaviors, _) = Scripted::new(responses);

    let crawler = Crawler::with_behaviors(CrawlOptions::default(), behaviors);
    let report = crawler.crawl(&["http://timed.example/"]).await;

    let trace = &report.entries[0].sequence[0];
    for stage in [
        stages::RESOLVE_HOST,
        stages::LOAD_CACHED_PAGE,
        stages::CREATE_HOST_SESSION,
        stages::CREATE_SCHEDULER,
        stages::LOAD_COOKIES,
        stages::SCHEDULING,
        stages::FETCH_PAGE_CONTENT,
        stages::STORE_PAGE_CONTENT,
        stages::STORE_COOKIES,
        stages::STORE_CACHED_PAGE,
    ] {
        let timing = trace
            .timings
            .get(stage)
            .unwrap_or_else(|| panic!("missing timing for {stage}"));
        assert!(timing.end >= timing.start, "inverted window for {stage}");
    }
}

#[tokio::test(start_paused = true)]
async fn invalid_inputs_produce_error_entries_in_client_order() {
    let mut responses = HashMap::new();
    responses.insert("/".to_string(), page(200));
    let (behaviors, _) = Scripted::new(responses);

    let crawler = Crawler::with_behaviors(CrawlOptions::default(), behaviors);
    let report = crawler.crawl(&["not a url", "http://ok.example/"]).await;

    assert_eq!(report.processed, 2);
    assert_eq!(report.entries[0].input, "not a url");
    assert!(report.entries[0].error.is_some());
    assert!(report.entries[0].sequence.is_empty());
    assert!(report.entries[1].succeeded());
}
