//!
//! Sharing of in-flight operations between concurrent callers.
//!
use crate::{Error, Result};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

type SharedResult<T> = std::result::Result<T, Arc<Error>>;

struct Entry<T> {
    generation: u64,
    future: Shared<BoxFuture<'static, SharedResult<T>>>,
}

/// Runs at most one operation per key at a time. Callers arriving while an
/// operation for their key is in flight await that operation instead of
/// starting another one. The entry is removed once it settles, so the next
/// call after that starts fresh.
pub struct Deduplicator<T> {
    inflight: Mutex<HashMap<String, Entry<T>>>,
    next_generation: AtomicU64,
}

impl<T> std::fmt::Debug for Deduplicator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_list().entries(inflight.keys()).finish()
    }
}

impl<T> Default for Deduplicator<T> {
    fn default() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Deduplicator<T> {
    /// Create an empty deduplicator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the operation produced by `factory` under `key`, or join the one
    /// already running. `factory` is only invoked when nothing is in flight.
    pub async fn run<F, Fut>(&self, key: &str, factory: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (generation, future) = {
            let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = inflight.get(key) {
                tracing::trace!("joining in-flight {}", key);
                (entry.generation, entry.future.clone())
            } else {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let future = factory().map(|r| r.map_err(Arc::new)).boxed().shared();
                inflight.insert(
                    key.to_string(),
                    Entry {
                        generation,
                        future: future.clone(),
                    },
                );
                (generation, future)
            }
        };

        let result = future.await;

        {
            let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            if inflight
                .get(key)
                .is_some_and(|entry| entry.generation == generation)
            {
                inflight.remove(key);
            }
        }

        result.map_err(|e| Arc::try_unwrap(e).unwrap_or_else(Error::Shared))
    }

    /// True while an operation for `key` is running
    #[must_use]
    pub fn in_flight(&self, key: &str) -> bool {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_run() {
        let dedup = Deduplicator::<u32>::new();
        let started = Arc::new(AtomicUsize::new(0));

        let op = || {
            let started = started.clone();
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(7)
            }
        };

        let (a, b) = tokio::join!(dedup.run("k", op), dedup.run("k", op));
        assert_eq!(a.unwrap(), 7);
        assert_eq!(b.unwrap(), 7);
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert!(!dedup.in_flight("k"));

        dedup.run("k", op).await.unwrap();
        assert_eq!(started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn different_keys_run_independently() {
        let dedup = Deduplicator::<u32>::new();
        let (a, b) = tokio::join!(
            dedup.run("a", || async { Ok(1) }),
            dedup.run("b", || async { Ok(2) })
        );
        assert_eq!((a.unwrap(), b.unwrap()), (1, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn errors_reach_every_caller() {
        let dedup = Deduplicator::<u32>::new();
        let op = || async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err(Error::WebServer(500, "boom".into()))
        };
        let (a, b) = tokio::join!(dedup.run("k", op), dedup.run("k", op));
        assert!(a.unwrap_err().is_transport());
        assert!(b.unwrap_err().is_transport());
        assert!(!dedup.in_flight("k"));
    }
}
