use anyhow::{Error, anyhow};
use indexmap::IndexMap;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;
use url::Url;

use crate::config::defaults;
use crate::session::HostSession;

/// One URL waiting for admission.
struct QueuedRequest {
    url: Url,
    enqueued_at: Instant,
    admitted: oneshot::Sender<u64>,
}

/// FIFO queue of requests for one hostname, with the session that gates it.
struct HostQueue {
    session: Arc<HostSession>,
    items: VecDeque<QueuedRequest>,
}

struct ArmedTimer {
    target: Instant,
    generation: u64,
    handle: JoinHandle<()>,
}

struct SchedulerState {
    total_requests: u64,
    active_requests: u64,
    awaiting_requests: u64,
    connections_in_use: usize,
    last_request: Option<Instant>,
    // Host queues iterate in insertion order; that order is the documented
    // tie-break when two hosts are ready at the same instant.
    queues: IndexMap<String, HostQueue>,
    timer: Option<ArmedTimer>,
    timer_generation: u64,
    // Admission is blocked on a free connection; the next request_end kicks it.
    connection_waiter: bool,
}

/// Per-IP admission control.
///
/// Each scheduled URL is admitted at a moment satisfying both this
/// scheduler's inter-request `delay` and the owning host session's
/// `time_to_wait`, with at most `connection_limit` admitted requests
/// outstanding. A single mutex serializes every state transition; a single
/// generation-counted timer drives admission ticks.
pub struct RequestScheduler {
    delay: Duration,
    connection_limit: usize,
    state: Mutex<SchedulerState>,
    // Handle the timer tasks use to call back into the scheduler.
    this: Weak<RequestScheduler>,
}

impl RequestScheduler {
    pub fn new(delay: Duration, connection_limit: usize) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            delay,
            connection_limit,
            state: Mutex::new(SchedulerState {
                total_requests: 0,
                active_requests: 0,
                awaiting_requests: 0,
                connections_in_use: 0,
                last_request: None,
                queues: IndexMap::new(),
                timer: None,
                timer_generation: 0,
                connection_waiter: false,
            }),
            this: this.clone(),
        })
    }

    /// Scheduler with the default politeness settings.
    pub fn with_defaults() -> Arc<Self> {
        Self::new(
            Duration::from_millis(defaults::DEFAULT_SCHEDULER_DELAY_MS),
            defaults::DEFAULT_CONNECTION_LIMIT,
        )
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn connection_limit(&self) -> usize {
        self.connection_limit
    }

    /// Queue a URL for admission. Resolves once the request may be sent,
    /// returning the time it spent waiting in milliseconds.
    pub async fn schedule(&self, session: Arc<HostSession>, url: Url) -> Result<u64, Error> {
        let (admitted_tx, admitted_rx) = oneshot::channel();
        {
            let mut state = self.state.lock().await;

            session.request_added();
            state.total_requests += 1;
            state.awaiting_requests += 1;

            let host = url.host_str().unwrap_or_default().to_string();
            let target = Instant::now() + session.time_to_wait();
            state
                .queues
                .entry(host)
                .or_insert_with(|| HostQueue {
                    session,
                    items: VecDeque::new(),
                })
                .items
                .push_back(QueuedRequest {
                    url,
                    enqueued_at: Instant::now(),
                    admitted: admitted_tx,
                });

            // While blocked on connections no timer runs; request_end resumes
            // admission. Otherwise arm, or pull an armed timer earlier.
            if !state.connection_waiter {
                let should_arm = match &state.timer {
                    Some(timer) => target < timer.target,
                    None => true,
                };
                if should_arm {
                    self.arm_timer(&mut state, target);
                }
            }
        }

        admitted_rx
            .await
            .map_err(|_| anyhow!("scheduler dropped before the request was admitted"))
    }

    /// Notification that a previously admitted request has finished.
    pub async fn request_end(&self) {
        let mut state = self.state.lock().await;
        state.connections_in_use = state.connections_in_use.saturating_sub(1);
        state.active_requests = state.active_requests.saturating_sub(1);
        if state.connection_waiter {
            state.connection_waiter = false;
            self.arm_timer(&mut state, Instant::now());
        }
    }

    /// No active and no awaiting requests: the precondition for eviction.
    pub async fn is_empty(&self) -> bool {
        let state = self.state.lock().await;
        state.active_requests == 0 && state.awaiting_requests == 0
    }

    pub async fn available_connections(&self) -> usize {
        let state = self.state.lock().await;
        self.connection_limit - state.connections_in_use
    }

    /// Target of the armed admission timer, if one is pending.
    pub async fn next_time(&self) -> Option<Instant> {
        let state = self.state.lock().await;
        state.timer.as_ref().map(|timer| timer.target)
    }

    pub async fn total_requests(&self) -> u64 {
        self.state.lock().await.total_requests
    }

    pub async fn awaiting_requests(&self) -> u64 {
        self.state.lock().await.awaiting_requests
    }

    pub async fn active_requests(&self) -> u64 {
        self.state.lock().await.active_requests
    }

    /// Replace any armed timer with one firing at `target`. The generation
    /// counter keeps an aborted timer's task from ticking after replacement.
    fn arm_timer(&self, state: &mut SchedulerState, target: Instant) {
        let Some(scheduler) = self.this.upgrade() else {
            return;
        };
        if let Some(previous) = state.timer.take() {
            previous.handle.abort();
        }
        state.timer_generation += 1;
        let generation = state.timer_generation;
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(target).await;
            scheduler.tick(generation).await;
        });
        state.timer = Some(ArmedTimer {
            target,
            generation,
            handle,
        });
    }

    async fn tick(&self, generation: u64) {
        let mut state = self.state.lock().await;
        let is_current = matches!(
            &state.timer,
            Some(timer) if timer.generation == generation
        );
        if !is_current {
            return; // replaced while this task was waking up
        }
        state.timer = None;
        self.run_admission(&mut state);
    }

    /// One admission attempt. Runs entirely inside the state lock.
    fn run_admission(&self, state: &mut SchedulerState) {
        let available = self.connection_limit - state.connections_in_use;
        if available == 0 {
            state.connection_waiter = true;
            return;
        }

        let now = Instant::now();
        if let Some(last) = state.last_request {
            let ready_at = last + self.delay;
            if ready_at > now {
                self.arm_timer(state, ready_at);
                return;
            }
        }

        if state.awaiting_requests == 0 {
            return;
        }

        // Single scan: the first host ready right now wins; among hosts that
        // still have to wait, remember the earliest wake-up.
        let mut selected: Option<usize> = None;
        let mut next_wake_up: Option<Duration> = None;
        for (index, queue) in state.queues.values().enumerate() {
            let wait = queue.session.time_to_wait();
            if wait == Duration::ZERO {
                if selected.is_none() {
                    selected = Some(index);
                }
            } else {
                next_wake_up = Some(next_wake_up.map_or(wait, |earliest| earliest.min(wait)));
            }
        }

        let Some(index) = selected else {
            if let Some(wait) = next_wake_up {
                self.arm_timer(state, now + wait);
            }
            return;
        };

        let host = state
            .queues
            .get_index(index)
            .map(|(host, _)| host.clone())
            .unwrap_or_default();
        let Some((_, queue)) = state.queues.get_index_mut(index) else {
            return;
        };
        let Some(item) = queue.items.pop_front() else {
            return;
        };
        let session = Arc::clone(&queue.session);
        if queue.items.is_empty() {
            state.queues.shift_remove(&host);
        }

        session.request_begin(now);
        state.active_requests += 1;
        state.connections_in_use += 1;
        state.awaiting_requests = state.awaiting_requests.saturating_sub(1);
        state.last_request = Some(now);

        let waited = now.saturating_duration_since(item.enqueued_at).as_millis() as u64;
        trace!(
            host = %host,
            url = %item.url,
            waited_ms = waited,
            connections_in_use = state.connections_in_use,
            "request admitted"
        );
        let _ = item.admitted.send(waited);

        if available - 1 == 0 {
            state.connection_waiter = true;
        } else if state.awaiting_requests > 0 {
            let pause = next_wake_up.map_or(self.delay, |wake| wake.max(self.delay));
            self.arm_timer(state, now + pause);
        }
    }
}

impl std::fmt::Debug for RequestScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestScheduler")
            .field("delay", &self.delay)
            .field("connection_limit", &self.connection_limit)
            .finish()
    }
}
