use std::collections::HashMap;
use tokio::sync::RwLock;
use url::Url;

/// Per-host cookie storage shared by every concurrent request to the host.
///
/// Reads take the shared lock so lookups run concurrently; writes are
/// serialized through the exclusive lock.
#[derive(Debug, Default)]
pub struct CookieJar {
    entries: RwLock<HashMap<String, Vec<String>>>,
}

fn jar_key(url: &Url) -> String {
    url.host_str().unwrap_or_default().to_string()
}

/// Cookie name from a `Set-Cookie` style `name=value; attrs` string.
fn cookie_name(cookie: &str) -> &str {
    cookie
        .split(';')
        .next()
        .and_then(|pair| pair.split('=').next())
        .map(str::trim)
        .unwrap_or(cookie)
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store cookies for a URL's host, replacing earlier values of the same
    /// cookie name.
    pub async fn store(&self, url: &Url, cookies: impl IntoIterator<Item = String>) {
        let mut entries = self.entries.write().await;
        let stored = entries.entry(jar_key(url)).or_default();
        for cookie in cookies {
            let name = cookie_name(&cookie).to_string();
            stored.retain(|existing| cookie_name(existing) != name);
            stored.push(cookie);
        }
    }

    /// All cookies stored for a URL's host.
    pub async fn cookies_for(&self, url: &Url) -> Vec<String> {
        let entries = self.entries.read().await;
        entries.get(&jar_key(url)).cloned().unwrap_or_default()
    }

    /// Value for an outgoing `cookie` header, or `None` when the host has no
    /// cookies: attribute parts are stripped, pairs joined with `; `.
    pub async fn header_for(&self, url: &Url) -> Option<String> {
        let entries = self.entries.read().await;
        let stored = entries.get(&jar_key(url))?;
        if stored.is_empty() {
            return None;
        }
        let pairs: Vec<&str> = stored
            .iter()
            .filter_map(|cookie| cookie.split(';').next())
            .map(str::trim)
            .collect();
        Some(pairs.join("; "))
    }
}
