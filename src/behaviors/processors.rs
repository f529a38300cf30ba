use serde_json::{Value, json};
use sha1::{Digest, Sha1};

use super::StreamProcessor;

/// SHA-1 digest of the decoded content, for change detection between
/// crawls of the same URL.
#[derive(Default)]
pub struct ContentDigest {
    hasher: Sha1,
    bytes: u64,
}

impl ContentDigest {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamProcessor for ContentDigest {
    fn name(&self) -> &str {
        "digest"
    }

    fn on_chunk(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes += chunk.len() as u64;
    }

    fn finish(&mut self) -> Option<Value> {
        Some(json!({
            "sha1": hex::encode(self.hasher.finalize_reset()),
            "bytes": self.bytes,
        }))
    }
}

const DEFAULT_SNIFF_WINDOW: usize = 8 * 1024;

/// Detects `<meta http-equiv="refresh">` client-side redirects in the
/// leading bytes of an HTML body. Its output is named `redirect`, which the
/// engine follows like a `location` header.
pub struct MetaRefreshSniffer {
    window: Vec<u8>,
    limit: usize,
}

impl Default for MetaRefreshSniffer {
    fn default() -> Self {
        Self::new(DEFAULT_SNIFF_WINDOW)
    }
}

impl MetaRefreshSniffer {
    pub fn new(window_limit: usize) -> Self {
        Self {
            window: Vec::new(),
            limit: window_limit,
        }
    }

    fn extract_target(&self) -> Option<String> {
        let original = String::from_utf8_lossy(&self.window).into_owned();
        // ASCII lowercasing keeps byte offsets aligned with the original.
        let lowered = original.to_ascii_lowercase();

        let refresh = lowered
            .find("http-equiv=\"refresh\"")
            .or_else(|| lowered.find("http-equiv='refresh'"))?;
        let tag_end = lowered[refresh..].find('>').map(|i| refresh + i)?;

        // The content attribute may precede or follow http-equiv; search the
        // whole tag around the match.
        let tag_start = lowered[..refresh].rfind('<')?;
        let tag_lower = &lowered[tag_start..tag_end];
        let content_at = tag_lower.find("content=")?;
        let value_start = tag_start + content_at + "content=".len();

        let quote = original.as_bytes().get(value_start).copied()?;
        if quote != b'"' && quote != b'\'' {
            return None;
        }
        let value_end = lowered[value_start + 1..]
            .find(quote as char)
            .map(|i| value_start + 1 + i)?;
        let value = &original[value_start + 1..value_end];

        // content looks like `5; url=/next` or just a delay with no target
        let lowered_value = value.to_ascii_lowercase();
        let url_at = lowered_value.find("url=")?;
        let target = value[url_at + "url=".len()..].trim();
        (!target.is_empty()).then(|| target.to_string())
    }
}

impl StreamProcessor for MetaRefreshSniffer {
    fn name(&self) -> &str {
        "redirect"
    }

    fn on_chunk(&mut self, chunk: &[u8]) {
        if self.window.len() >= self.limit {
            return;
        }
        let room = self.limit - self.window.len();
        self.window.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    fn finish(&mut self) -> Option<Value> {
        self.extract_target().map(Value::String)
    }
}
