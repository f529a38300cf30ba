use anyhow::Error;
use bytes::Bytes;
use flate2::write::{GzDecoder, ZlibDecoder};
use futures::StreamExt;
use reqwest::{Client, redirect::Policy};
use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::config::defaults;
use crate::core::{FetchResult, FetchTimings};
use crate::trace::Trace;

/// Client used by the default fetch behavior. Redirects are handled by the
/// engine, never by the transport.
pub fn build_client() -> Result<Client, Error> {
    Ok(Client::builder()
        .redirect(Policy::none())
        .timeout(Duration::from_secs(defaults::REQUEST_TIMEOUT_SECS))
        .pool_max_idle_per_host(defaults::CONNECTION_POOL_SIZE)
        .build()?)
}

/// Streaming decoder for the negotiated content encodings. Decoding runs
/// chunk by chunk so processors see decoded bytes as they arrive and the
/// wire and decoded byte counts stay independently observable.
enum ContentDecoder {
    Identity,
    Gzip(GzDecoder<Vec<u8>>),
    Deflate(ZlibDecoder<Vec<u8>>),
}

impl ContentDecoder {
    fn for_encoding(encoding: &str) -> Self {
        match encoding.trim().to_ascii_lowercase().as_str() {
            "gzip" | "x-gzip" => ContentDecoder::Gzip(GzDecoder::new(Vec::new())),
            "deflate" => ContentDecoder::Deflate(ZlibDecoder::new(Vec::new())),
            _ => ContentDecoder::Identity,
        }
    }

    fn decode(&mut self, chunk: &[u8]) -> Result<Bytes, Error> {
        match self {
            ContentDecoder::Identity => Ok(Bytes::copy_from_slice(chunk)),
            ContentDecoder::Gzip(decoder) => {
                decoder.write_all(chunk)?;
                Ok(Bytes::from(std::mem::take(decoder.get_mut())))
            }
            ContentDecoder::Deflate(decoder) => {
                decoder.write_all(chunk)?;
                Ok(Bytes::from(std::mem::take(decoder.get_mut())))
            }
        }
    }

    fn finish(self) -> Result<Bytes, Error> {
        match self {
            ContentDecoder::Identity => Ok(Bytes::new()),
            ContentDecoder::Gzip(decoder) => Ok(Bytes::from(decoder.finish()?)),
            ContentDecoder::Deflate(decoder) => Ok(Bytes::from(decoder.finish()?)),
        }
    }
}

/// Default `fetch_page_content` behavior: HTTP GET with gzip/deflate
/// decoding and streaming content capture bounded by the trace's fetch
/// limit.
pub async fn fetch_page(client: &Client, trace: &Trace) -> Result<FetchResult, Error> {
    let mut processors = trace
        .processors
        .as_ref()
        .map(|factory| factory())
        .unwrap_or_default();

    let mut request = client.get(trace.url.clone());
    for (name, value) in &trace.request {
        request = request.header(name.as_str(), value.as_str());
    }
    request = request.header("accept-encoding", defaults::ACCEPT_ENCODING_HEADER);

    let sent_at = Instant::now();
    let response = request.send().await?;
    // reqwest pools connections: the connect and send phases are not
    // separately observable, so only wait and receive carry real durations.
    let wait = sent_at.elapsed().as_millis() as u64;

    let version = format!("{:?}", response.version());
    let status = response.status().as_u16();
    let status_text = response
        .status()
        .canonical_reason()
        .unwrap_or_default()
        .to_string();

    let mut headers: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in response.headers() {
        headers
            .entry(name.as_str().to_ascii_lowercase())
            .or_default()
            .push(value.to_str().unwrap_or_default().to_string());
    }

    let encoding = headers
        .get("content-encoding")
        .and_then(|values| values.first())
        .cloned()
        .unwrap_or_default();
    let mut decoder = ContentDecoder::for_encoding(&encoding);

    let mut received_size = 0u64;
    let mut logical_size = 0u64;
    let mut content = Vec::new();
    let limit = trace.fetch_limit as u64;
    let mut truncated = false;

    let receive_started = Instant::now();
    let mut stream = response.bytes_stream();
    while let Some(next) = stream.next().await {
        let chunk = next?;
        received_size += chunk.len() as u64;
        let decoded = decoder.decode(&chunk)?;
        if !decoded.is_empty() {
            logical_size += decoded.len() as u64;
            for processor in processors.iter_mut() {
                processor.on_chunk(&decoded);
            }
            content.push(decoded);
        }
        if logical_size >= limit {
            truncated = true;
            break;
        }
    }

    if !truncated {
        let tail = decoder.finish()?;
        if !tail.is_empty() {
            logical_size += tail.len() as u64;
            for processor in processors.iter_mut() {
                processor.on_chunk(&tail);
            }
            content.push(tail);
        }
    }
    let receive = receive_started.elapsed().as_millis() as u64;

    let mut processed = HashMap::new();
    for processor in processors.iter_mut() {
        if let Some(output) = processor.finish() {
            processed.insert(processor.name().to_string(), output);
        }
    }

    debug!(
        url = %trace.url,
        status = status,
        received = received_size,
        logical = logical_size,
        truncated = truncated,
        "page fetched"
    );

    Ok(FetchResult {
        version,
        status,
        status_text,
        headers,
        received_size,
        logical_size,
        content,
        processed,
        timings: FetchTimings {
            connect: 0,
            send: 0,
            wait,
            receive,
        },
    })
}

/// Decode helper exposed for tests exercising the streaming decoders.
#[cfg(test)]
pub(crate) fn decode_all(encoding: &str, parts: &[&[u8]]) -> Result<Vec<u8>, Error> {
    let mut decoder = ContentDecoder::for_encoding(encoding);
    let mut out = Vec::new();
    for part in parts {
        out.extend_from_slice(&decoder.decode(part)?);
    }
    out.extend_from_slice(&decoder.finish()?);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::{GzEncoder, ZlibEncoder};

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn gzip_bodies_decode_across_chunk_boundaries() {
        let body = b"hello compressed crawler world".repeat(50);
        let wire = gzip(&body);
        let (head, tail) = wire.split_at(wire.len() / 2);

        let decoded = decode_all("gzip", &[head, tail]).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn deflate_bodies_decode() {
        let body = b"deflated payload".to_vec();
        let wire = deflate(&body);
        let decoded = decode_all("deflate", &[&wire]).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn unknown_encodings_pass_through() {
        let decoded = decode_all("identity", &[b"plain", b" bytes"]).unwrap();
        assert_eq!(decoded, b"plain bytes");
    }
}
