use anyhow::{Error, anyhow};
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

use crate::config::defaults;
use crate::session::CookieJar;

/// Robots-derived allowance rules for one host. The parser lives outside the
/// engine; sessions only consult the verdict.
pub trait RobotsRules: Send + Sync {
    fn is_allowed(&self, agent: &str, url: &Url) -> bool;
}

/// Per-hostname crawl state: politeness delay, request counters, IP rotation
/// policy, cookies and robots allowance.
///
/// Counter updates are atomic so the scheduler can drive them from inside its
/// own critical section without taking another lock.
pub struct HostSession {
    created: Instant,
    crawl_delay: Duration,
    total_requests: AtomicU64,
    active_requests: AtomicU64,
    awaiting_requests: AtomicU64,
    // Nanoseconds since `created`; 0 is the never-requested sentinel.
    last_request_nanos: AtomicU64,
    cookie_jar: CookieJar,
    rules: Option<Arc<dyn RobotsRules>>,
}

impl HostSession {
    pub fn new(crawl_delay: Duration) -> Self {
        Self {
            created: Instant::now(),
            crawl_delay,
            total_requests: AtomicU64::new(0),
            active_requests: AtomicU64::new(0),
            awaiting_requests: AtomicU64::new(0),
            last_request_nanos: AtomicU64::new(0),
            cookie_jar: CookieJar::new(),
            rules: None,
        }
    }

    pub fn with_rules(crawl_delay: Duration, rules: Arc<dyn RobotsRules>) -> Self {
        Self {
            rules: Some(rules),
            ..Self::new(crawl_delay)
        }
    }

    /// Time since this session was created.
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    pub fn crawl_delay(&self) -> Duration {
        self.crawl_delay
    }

    /// How long until the next request to this host is permissible.
    pub fn time_to_wait(&self) -> Duration {
        let last = self.last_request_nanos.load(Ordering::Acquire);
        if last == 0 {
            return Duration::ZERO;
        }
        let ready = self.created + Duration::from_nanos(last) + self.crawl_delay;
        ready.saturating_duration_since(Instant::now())
    }

    /// Robots allowance for a URL; hosts without rules allow everything.
    pub fn is_allowed(&self, agent: &str, url: &Url) -> bool {
        match &self.rules {
            Some(rules) => rules.is_allowed(agent, url),
            None => true,
        }
    }

    /// Pick one IP from a resolved list.
    ///
    /// Single-entry lists are returned as-is. Longer lists are sorted
    /// lexicographically and the first entry is used, except on every 10th
    /// issued request, which goes to a uniformly random entry from the rest
    /// of the list. Rotating off the primary IP lets a caller notice
    /// per-IP bans.
    pub fn select_ip(&self, ips: &[String]) -> Result<String, Error> {
        match ips {
            [] => Err(anyhow!("cannot select an IP from an empty list")),
            [only] => Ok(only.clone()),
            _ => {
                let mut sorted: Vec<&String> = ips.iter().collect();
                sorted.sort();

                let total = self.total_requests.load(Ordering::Acquire);
                let awaiting = self.awaiting_requests.load(Ordering::Acquire);
                let issued = total.saturating_sub(awaiting) + 1;

                if issued % defaults::IP_ROTATION_PERIOD == 0 {
                    let index = rand::thread_rng().gen_range(1..sorted.len());
                    Ok(sorted[index].clone())
                } else {
                    Ok(sorted[0].clone())
                }
            }
        }
    }

    /// A request for this host entered a scheduler queue.
    pub fn request_added(&self) {
        self.total_requests.fetch_add(1, Ordering::AcqRel);
        self.awaiting_requests.fetch_add(1, Ordering::AcqRel);
    }

    /// A queued request was admitted at `at`: it moves from awaiting to
    /// active and stamps the host's last-request time.
    pub fn request_begin(&self, at: Instant) {
        let nanos = at.saturating_duration_since(self.created).as_nanos() as u64;
        // 0 is reserved for "never requested"
        self.last_request_nanos.store(nanos.max(1), Ordering::Release);
        let _ = self
            .awaiting_requests
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(v.saturating_sub(1))
            });
        self.active_requests.fetch_add(1, Ordering::AcqRel);
    }

    /// An admitted request finished.
    pub fn request_end(&self) {
        let _ = self
            .active_requests
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(v.saturating_sub(1))
            });
    }

    /// No active and no awaiting requests: the precondition for eviction.
    pub fn is_empty(&self) -> bool {
        self.active_requests.load(Ordering::Acquire) == 0
            && self.awaiting_requests.load(Ordering::Acquire) == 0
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Acquire)
    }

    pub fn active_requests(&self) -> u64 {
        self.active_requests.load(Ordering::Acquire)
    }

    pub fn awaiting_requests(&self) -> u64 {
        self.awaiting_requests.load(Ordering::Acquire)
    }

    pub fn cookie_jar(&self) -> &CookieJar {
        &self.cookie_jar
    }
}

impl std::fmt::Debug for HostSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostSession")
            .field("crawl_delay", &self.crawl_delay)
            .field("total_requests", &self.total_requests)
            .field("active_requests", &self.active_requests)
            .field("awaiting_requests", &self.awaiting_requests)
            .field("has_rules", &self.rules.is_some())
            .finish()
    }
}
