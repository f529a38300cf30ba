use anyhow::Error;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use url::Url;

use crate::trace::Trace;

/// A full crawl sequence: the trace for one URL followed by the traces of
/// every redirect it led to.
pub type CrawlSequence = Arc<Vec<Trace>>;

/// Assembles the deliverable for one input URL from its crawl sequence.
/// A builder failure on one entry never suppresses the others.
#[async_trait]
pub trait ResultBuilder: Send + Sync {
    async fn assemble(&self, input: &str, sequence: &[Trace]) -> Result<Value, Error>;
}

/// Default builder: a compact JSON rendering of each trace in the sequence.
pub struct JsonSummaryBuilder;

#[async_trait]
impl ResultBuilder for JsonSummaryBuilder {
    async fn assemble(&self, input: &str, sequence: &[Trace]) -> Result<Value, Error> {
        let traces: Vec<Value> = sequence.iter().map(trace_json).collect();
        Ok(json!({
            "input": input,
            "traces": traces,
        }))
    }
}

fn trace_json(trace: &Trace) -> Value {
    let errors: Vec<Value> = trace
        .errors
        .iter()
        .map(|error| {
            json!({
                "code": error.code(),
                "message": error.message(),
            })
        })
        .collect();

    let timings: serde_json::Map<String, Value> = trace
        .timings
        .iter()
        .map(|(stage, timing)| {
            (
                stage.to_string(),
                json!({ "start": timing.start, "end": timing.end }),
            )
        })
        .collect();

    let response = trace.response.as_ref().map(|response| {
        json!({
            "version": response.version,
            "status": response.status,
            "statusText": response.status_text,
            "headers": response.headers,
            "receivedSize": response.received_size,
            "logicalSize": response.logical_size,
            "processed": response.processed,
            "timings": {
                "connect": response.timings.connect,
                "send": response.timings.send,
                "wait": response.timings.wait,
                "receive": response.timings.receive,
            },
        })
    });

    json!({
        "id": trace.id,
        "url": trace.url.as_str(),
        "ip": trace.ip,
        "start": trace.start,
        "ipList": trace.ip_list,
        "request": trace.request,
        "response": response,
        "errors": errors,
        "timings": Value::Object(timings),
        "redirectLocation": trace.redirect_location.as_ref().map(Url::as_str),
    })
}

/// Outcome of one input URL.
#[derive(Debug)]
pub struct CrawlEntry {
    /// The raw input string, in client order.
    pub input: String,
    /// Trace identity, when the input parsed to a canonical URL.
    pub id: Option<String>,
    pub sequence: CrawlSequence,
    /// The builder's rendering, when it succeeded.
    pub rendered: Option<Value>,
    /// Input rejection or builder failure.
    pub error: Option<String>,
}

impl CrawlEntry {
    /// True when the input produced a sequence free of trace errors.
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
            && !self.sequence.is_empty()
            && self.sequence.iter().all(|trace| !trace.has_errors())
    }
}

/// Result of a whole crawl batch, one entry per input in client order.
#[derive(Debug)]
pub struct CrawlReport {
    pub entries: Vec<CrawlEntry>,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}
