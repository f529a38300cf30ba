use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;

/// Start/end of one pipeline stage, in milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageTiming {
    pub start: u64,
    pub end: u64,
}

/// Transport-phase timings of a single fetch, in milliseconds.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct FetchTimings {
    pub connect: u64,
    pub send: u64,
    pub wait: u64,
    pub receive: u64,
}

/// Outcome of a `fetch_page_content` behavior, shaped for the result builder.
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    /// HTTP version string, e.g. "HTTP/1.1".
    pub version: String,
    pub status: u16,
    pub status_text: String,
    /// Response headers; repeated headers keep every value.
    pub headers: HashMap<String, Vec<String>>,
    /// Bytes received on the wire, before content decoding.
    pub received_size: u64,
    /// Bytes after decoding the content encoding.
    pub logical_size: u64,
    /// Decoded content chunks, capped by the trace's fetch limit.
    pub content: Vec<Bytes>,
    /// Free-form outputs of the byte-stream processors, keyed by name.
    pub processed: HashMap<String, serde_json::Value>,
    pub timings: FetchTimings,
}

impl FetchResult {
    /// First value of a response header, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        let wanted = name.to_ascii_lowercase();
        self.headers
            .get(&wanted)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values of a response header, case-insensitive.
    pub fn header_values(&self, name: &str) -> &[String] {
        let wanted = name.to_ascii_lowercase();
        self.headers.get(&wanted).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Redirect target carried by this response, either as an HTTP 301/302
    /// `location` header or as a `redirect` value emitted by a processor.
    pub fn redirect_target(&self) -> Option<&str> {
        if matches!(self.status, 301 | 302)
            && let Some(location) = self.header("location")
        {
            return Some(location);
        }
        self.processed.get("redirect").and_then(|v| v.as_str())
    }

    /// Whole decoded body as one buffer.
    pub fn body(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.logical_size as usize);
        for chunk in &self.content {
            out.extend_from_slice(chunk);
        }
        out
    }
}
