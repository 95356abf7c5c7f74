//!
//! Short per-node series of recent samples, refreshed independently of the
//! status reconciler.
//!
use crate::registry::online_ids;
use crate::rpc::RemoteApi;
use crate::types::{SampleField, Snapshot, StatusRecord};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// A series needs at least this many samples to replace a cached one
pub const MIN_SAMPLES: usize = 2;

/// [`SparklineCache`] options
#[derive(Clone, Copy, Debug)]
pub struct SparklineOptions {
    /// Concurrent requests per batch
    pub batch_size: usize,
    /// Periodic refresh cadence
    pub interval: Duration,
    /// Scalar extracted from each report
    pub field: SampleField,
    /// Only the newest samples are kept
    pub max_samples: usize,
}

impl Default for SparklineOptions {
    fn default() -> Self {
        Self {
            batch_size: 4,
            interval: Duration::from_secs(30),
            field: SampleField::Cpu,
            max_samples: 60,
        }
    }
}

/// Membership key independent of input order and duplicates: the sorted,
/// deduplicated ids, each kept whole.
pub fn stable_key<S: AsRef<str>>(ids: &[S]) -> Vec<String> {
    let mut ids: Vec<String> = ids.iter().map(|id| id.as_ref().to_string()).collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Recent-sample cache keyed by node id
pub struct SparklineCache {
    api: RemoteApi,
    options: SparklineOptions,
    membership: Mutex<Vec<String>>,
    series: RwLock<HashMap<String, Vec<f64>>>,
}

impl std::fmt::Debug for SparklineCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SparklineCache")
            .field("options", &self.options)
            .field("series", &self.len())
            .finish_non_exhaustive()
    }
}

impl SparklineCache {
    /// Create an empty cache
    #[must_use]
    pub fn new(api: RemoteApi, options: SparklineOptions) -> Self {
        Self {
            api,
            options,
            membership: Mutex::default(),
            series: RwLock::default(),
        }
    }

    /// Options in use
    #[must_use]
    pub fn options(&self) -> &SparklineOptions {
        &self.options
    }

    /// Record the online nodes. Returns true only if the set differs from
    /// the previous one; order and duplicates do not count.
    pub fn set_online<S: AsRef<str>>(&self, ids: &[S]) -> bool {
        let ids = stable_key(ids);
        let mut membership = self
            .membership
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *membership == ids {
            return false;
        }
        tracing::debug!("sparkline membership {} -> {} nodes", membership.len(), ids.len());
        *membership = ids;
        true
    }

    /// Record the online nodes and refresh if membership changed. Returns
    /// true if a refresh ran.
    pub async fn update<S: AsRef<str>>(&self, ids: &[S]) -> bool {
        if self.set_online(ids) {
            self.refresh().await;
            true
        } else {
            false
        }
    }

    /// Fetch recent samples for every online node and store them. Returns
    /// the number of series replaced.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn refresh(&self) -> usize {
        let fetched = self.fetch().await;
        self.store(fetched)
    }

    /// Batches run one after another; requests within a batch run
    /// concurrently.
    async fn fetch(&self) -> Vec<(String, Vec<f64>)> {
        let ids = self
            .membership
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut fetched = Vec::with_capacity(ids.len());
        for batch in ids.chunks(self.options.batch_size.max(1)) {
            let results = join_all(batch.iter().map(|id| self.fetch_one(id))).await;
            fetched.extend(results);
        }
        fetched
    }

    async fn fetch_one(&self, id: &str) -> (String, Vec<f64>) {
        let samples = match self.api.get_recent_status(id).await {
            Ok(reports) => {
                let skip = reports.len().saturating_sub(self.options.max_samples);
                reports
                    .iter()
                    .skip(skip)
                    .map(|raw| self.options.field.read(&StatusRecord::from(raw)))
                    .collect()
            }
            Err(e) => {
                tracing::warn!("recent status for {} failed: {}", id, e);
                Vec::new()
            }
        };
        (id.to_string(), samples)
    }

    fn store(&self, fetched: Vec<(String, Vec<f64>)>) -> usize {
        let mut series = self.series.write().unwrap_or_else(PoisonError::into_inner);
        let mut replaced = 0;
        for (id, samples) in fetched {
            if samples.len() < MIN_SAMPLES {
                tracing::trace!("{} has {} samples, keeping cached series", id, samples.len());
                continue;
            }
            series.insert(id, samples);
            replaced += 1;
        }
        replaced
    }

    /// Cached series of a node
    #[must_use]
    pub fn series(&self, id: &str) -> Option<Vec<f64>> {
        self.series
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Number of cached series
    #[must_use]
    pub fn len(&self) -> usize {
        self.series
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True if nothing is cached
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Follow registry membership and refresh on change and every
    /// `options.interval`, until `shutdown` flips to true.
    pub async fn run(
        self: Arc<Self>,
        mut nodes: watch::Receiver<Snapshot>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(self.options.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.set_online(&online_ids(&nodes.borrow_and_update()));

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = nodes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let ids = online_ids(&nodes.borrow_and_update());
                    if !self.set_online(&ids) {
                        continue;
                    }
                }
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            let fetched = self.fetch().await;
            if *shutdown.borrow() {
                break;
            }
            self.store(fetched);
        }
        tracing::debug!("sparkline refresh stopped");
    }
}
