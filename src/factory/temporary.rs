use anyhow::{Error, anyhow};
use futures::FutureExt;
use futures::TryFutureExt;
use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::core::FactoryError;

/// Signal that resolves once a key's destruction has completed.
pub type Destruction = Shared<BoxFuture<'static, ()>>;

/// Action run against the evicted value once the grace window elapses.
pub type DestroyAction<K, V> = Arc<dyn Fn(K, Arc<V>) -> BoxFuture<'static, ()> + Send + Sync>;

type BuildShared<V> = Shared<BoxFuture<'static, Result<Arc<V>, Arc<Error>>>>;

struct ArmedEviction {
    generation: u64,
    handle: JoinHandle<()>,
    signal: Destruction,
}

struct AliveEntry<V> {
    value: Arc<V>,
    // Grace window captured at `get` time; used when destruction is requested.
    grace: Duration,
    eviction: Option<ArmedEviction>,
}

enum Entry<V> {
    Building(BuildShared<V>),
    Alive(AliveEntry<V>),
    Destroying(Destruction),
}

enum GetStep<V> {
    Ready(Arc<V>),
    Wait(BuildShared<V>),
    Drain(Destruction),
}

struct FactoryInner<K, V> {
    entries: Mutex<HashMap<K, Entry<V>>>,
    destroy_action: DestroyAction<K, V>,
    eviction_generation: AtomicU64,
}

/// Cache of async-built objects with delayed, cancellable eviction.
///
/// Builds on miss, serves on hit, and destroys a key only after its grace
/// window has elapsed without a resurrecting `get`. Build and destroy are
/// serialized per key: at most one of either is in flight at any moment.
pub struct TemporaryFactory<K, V> {
    inner: Arc<FactoryInner<K, V>>,
}

impl<K, V> Clone for TemporaryFactory<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> TemporaryFactory<K, V>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new(destroy_action: DestroyAction<K, V>) -> Self {
        Self {
            inner: Arc::new(FactoryInner {
                entries: Mutex::new(HashMap::new()),
                destroy_action,
                eviction_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Factory whose destroy action does nothing.
    pub fn without_disposal() -> Self {
        Self::new(Arc::new(|_key, _value| async {}.boxed()))
    }

    /// Whether the key currently has an entry. Presence does not guarantee a
    /// following `get` returns the same instance: a destroy may be in flight.
    pub async fn has(&self, key: &K) -> bool {
        self.inner.entries.lock().await.contains_key(key)
    }

    /// Fetch or build the object for `key`.
    ///
    /// A miss runs `build` and shares the pending value with concurrent
    /// callers; a failed build is removed from the cache before the error is
    /// exposed. A hit inside the eviction grace window cancels the pending
    /// eviction and returns the same instance. A hit while destruction is
    /// running waits for it to finish and then builds anew.
    pub async fn get<F, Fut>(&self, grace: Duration, key: K, build: F) -> Result<Arc<V>, Error>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Arc<V>, Error>> + Send + 'static,
    {
        loop {
            let step = {
                let mut entries = self.inner.entries.lock().await;
                match entries.get_mut(&key) {
                    None => {
                        let shared: BuildShared<V> = build().map_err(Arc::new).boxed().shared();
                        entries.insert(key.clone(), Entry::Building(shared.clone()));
                        GetStep::Wait(shared)
                    }
                    Some(Entry::Building(shared)) => GetStep::Wait(shared.clone()),
                    Some(Entry::Alive(alive)) => {
                        if let Some(armed) = alive.eviction.take() {
                            armed.handle.abort();
                            debug!(key = %key, "eviction cancelled by get");
                        }
                        alive.grace = grace;
                        GetStep::Ready(Arc::clone(&alive.value))
                    }
                    Some(Entry::Destroying(signal)) => GetStep::Drain(signal.clone()),
                }
            };

            match step {
                GetStep::Ready(value) => return Ok(value),
                GetStep::Wait(shared) => {
                    let result = shared.clone().await;
                    self.settle_build(&key, &shared, &result, grace).await;
                    return match result {
                        Ok(value) => Ok(value),
                        Err(error) => Err(anyhow!("{}", error)),
                    };
                }
                GetStep::Drain(signal) => {
                    signal.await;
                    // destruction finished; rebuild on the next pass
                }
            }
        }
    }

    /// Request delayed destruction of `key`. Returns the destruction signal;
    /// repeated requests for the same key return the same signal.
    pub async fn destroy(&self, key: &K) -> Result<Destruction, Error> {
        let mut entries = self.inner.entries.lock().await;
        match entries.get_mut(key) {
            None => Err(FactoryError::Missing(key.to_string()).into()),
            Some(Entry::Building(_)) => Err(FactoryError::BuildInProgress(key.to_string()).into()),
            Some(Entry::Destroying(signal)) => Ok(signal.clone()),
            Some(Entry::Alive(alive)) => {
                if let Some(armed) = &alive.eviction {
                    return Ok(armed.signal.clone());
                }

                let (done_tx, done_rx) = oneshot::channel::<()>();
                let signal: Destruction = done_rx.map(|_| ()).boxed().shared();
                let generation = self.inner.eviction_generation.fetch_add(1, Ordering::AcqRel) + 1;
                let grace = alive.grace;
                let inner = Arc::clone(&self.inner);
                let task_key = key.clone();
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    FactoryInner::finish_destroy(inner, task_key, generation, done_tx).await;
                });
                alive.eviction = Some(ArmedEviction {
                    generation,
                    handle,
                    signal: signal.clone(),
                });
                debug!(key = %key, grace_ms = grace.as_millis() as u64, "eviction armed");
                Ok(signal)
            }
        }
    }

    /// Transition a finished build out of the Building state. Every waiter
    /// calls this; only the first call for a given shared future acts.
    async fn settle_build(
        &self,
        key: &K,
        shared: &BuildShared<V>,
        result: &Result<Arc<V>, Arc<Error>>,
        grace: Duration,
    ) {
        let mut entries = self.inner.entries.lock().await;
        let is_current = matches!(
            entries.get(key),
            Some(Entry::Building(existing)) if existing.ptr_eq(shared)
        );
        if !is_current {
            return;
        }
        match result {
            Ok(value) => {
                entries.insert(
                    key.clone(),
                    Entry::Alive(AliveEntry {
                        value: Arc::clone(value),
                        grace,
                        eviction: None,
                    }),
                );
            }
            Err(_) => {
                // failed builds leave the cache before the error is exposed
                entries.remove(key);
            }
        }
    }
}

impl<K, V> FactoryInner<K, V>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    async fn finish_destroy(
        inner: Arc<Self>,
        key: K,
        generation: u64,
        done_tx: oneshot::Sender<()>,
    ) {
        let value = {
            let mut entries = inner.entries.lock().await;
            let taken = match entries.get(&key) {
                Some(Entry::Alive(alive)) => match &alive.eviction {
                    Some(armed) if armed.generation == generation => {
                        Some((Arc::clone(&alive.value), armed.signal.clone()))
                    }
                    _ => None,
                },
                _ => None,
            };
            let Some((value, signal)) = taken else {
                // resurrected or replaced while this timer was waking up
                return;
            };
            entries.insert(key.clone(), Entry::Destroying(signal));
            value
        };

        (inner.destroy_action)(key.clone(), value).await;
        inner.entries.lock().await.remove(&key);
        debug!(key = %key, "entry destroyed");
        let _ = done_tx.send(());
    }
}
