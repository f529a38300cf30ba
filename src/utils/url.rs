use anyhow::{Error, anyhow};
use sha1::{Digest, Sha1};
use url::Url;

/// Canonicalize a raw input address into the form all identity checks use.
///
/// The `url` crate already lowercases the scheme and host, punycodes
/// international hostnames and normalizes the path, so two spellings of the
/// same address map to one canonical href.
pub fn canonicalize(input: &str) -> Result<Url, Error> {
    let url = Url::parse(input.trim()).map_err(|e| anyhow!("invalid URL `{}`: {}", input, e))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(anyhow!("unsupported scheme `{}` in `{}`", other, input)),
    }

    if url.host_str().is_none() {
        return Err(anyhow!("URL `{}` has no host", input));
    }

    Ok(url)
}

/// Stable identity of a request: SHA-1 of the canonical href, hex encoded.
pub fn trace_id(url: &Url) -> String {
    let mut hasher = Sha1::new();
    hasher.update(url.as_str().as_bytes());
    hex::encode(hasher.finalize())
}

/// Milliseconds since the Unix epoch.
pub fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
