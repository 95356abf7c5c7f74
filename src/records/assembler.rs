use super::merge::{merge_records, sort_records};
use super::{
    check_range, delta_hours, Clock, RecordsOptions, Series, TimeSeriesResult, MAX_RANGE_HOURS,
};
use crate::dedup::Deduplicator;
use crate::rpc::RemoteApi;
use crate::Result;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

/// Called with the node id and the new aggregate after every recompute
pub type Reporter<S> = Arc<dyn Fn(&str, &<S as Series>::Summary) + Send + Sync>;

/// Called after the whole cache was dropped
pub type ClearListener = Arc<dyn Fn() + Send + Sync>;

struct CacheState<S: Series> {
    range_hours: u32,
    /// Bumped on every clear; fetches started under an older epoch are not
    /// stored.
    epoch: u64,
    entries: HashMap<String, Arc<TimeSeriesResult<S>>>,
    /// Per-node counterpart of `epoch`, bumped when one entry is forced or
    /// invalidated.
    revisions: HashMap<String, u64>,
    visible: HashSet<String>,
}

impl<S: Series> CacheState<S> {
    fn clear(&mut self) {
        self.entries.clear();
        self.revisions.clear();
        self.epoch += 1;
    }

    fn revision(&self, id: &str) -> u64 {
        self.revisions.get(id).copied().unwrap_or(0)
    }

    fn drop_entry(&mut self, id: &str) -> bool {
        *self.revisions.entry(id.to_string()).or_insert(0) += 1;
        self.entries.remove(id).is_some()
    }
}

struct Plan<S: Series> {
    hours: u32,
    base: Option<Arc<TimeSeriesResult<S>>>,
    epoch: u64,
    revision: u64,
}

enum Lookup<S: Series> {
    Fresh(Arc<TimeSeriesResult<S>>),
    Fetch(Plan<S>),
}

/// Incremental time-series cache for one [`Series`]
pub struct TimeSeriesAssembler<S: Series> {
    api: RemoteApi,
    options: RecordsOptions,
    clock: Clock,
    state: Mutex<CacheState<S>>,
    inflight: Deduplicator<Arc<TimeSeriesResult<S>>>,
    reporters: RwLock<Vec<Reporter<S>>>,
    clear_listeners: RwLock<Vec<ClearListener>>,
}

impl<S: Series> std::fmt::Debug for TimeSeriesAssembler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("TimeSeriesAssembler")
            .field("kind", &S::KIND)
            .field("range_hours", &state.range_hours)
            .field("cached", &state.entries.len())
            .field("visible", &state.visible.len())
            .finish_non_exhaustive()
    }
}

impl<S: Series> TimeSeriesAssembler<S> {
    /// Create an empty assembler using the system clock
    #[must_use]
    pub fn new(api: RemoteApi, options: RecordsOptions) -> Self {
        Self::with_clock(api, options, Arc::new(Utc::now))
    }

    /// Create an empty assembler reading time from `clock`. The initial
    /// range is clamped to `1..=MAX_RANGE_HOURS`.
    #[must_use]
    pub fn with_clock(api: RemoteApi, mut options: RecordsOptions, clock: Clock) -> Self {
        options.range_hours = options.range_hours.clamp(1, MAX_RANGE_HOURS);
        Self {
            api,
            options,
            clock,
            state: Mutex::new(CacheState {
                range_hours: options.range_hours,
                epoch: 0,
                entries: HashMap::new(),
                revisions: HashMap::new(),
                visible: HashSet::new(),
            }),
            inflight: Deduplicator::new(),
            reporters: RwLock::default(),
            clear_listeners: RwLock::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<S>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn plan(
        &self,
        id: &str,
        range_hours: u32,
        force: bool,
        now: DateTime<Utc>,
    ) -> (Lookup<S>, bool) {
        let mut state = self.lock();
        let cleared = state.range_hours != range_hours;
        if cleared {
            tracing::info!(
                "{} range {}h -> {}h, clearing cache",
                S::KIND,
                state.range_hours,
                range_hours
            );
            state.range_hours = range_hours;
            state.clear();
        }
        if force {
            state.drop_entry(id);
        }

        let epoch = state.epoch;
        let revision = state.revision(id);
        let Some(cached) = state.entries.get(id) else {
            let plan = Plan {
                hours: range_hours,
                base: None,
                epoch,
                revision,
            };
            return (Lookup::Fetch(plan), cleared);
        };

        let age = (now - cached.fetched_at).to_std().unwrap_or(Duration::ZERO);
        if age < self.options.refetch_after {
            return (Lookup::Fresh(Arc::clone(cached)), cleared);
        }
        let hours = if age < self.options.incremental_window {
            delta_hours(age, range_hours)
        } else {
            range_hours
        };
        let plan = Plan {
            hours,
            base: Some(Arc::clone(cached)),
            epoch,
            revision,
        };
        (Lookup::Fetch(plan), cleared)
    }

    /// Return the merged series of `id` over `range_hours`, fetching only
    /// what is missing from the cache. Requesting another range than the
    /// active one clears the whole cache; `force` drops this node's entry
    /// and fetches the whole range. If the fetch fails the cached result
    /// is returned unchanged when there is one. Ranges outside
    /// `1..=MAX_RANGE_HOURS` are rejected without touching the cache.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn get_or_refresh(
        self: &Arc<Self>,
        id: &str,
        range_hours: u32,
        force: bool,
    ) -> Result<Arc<TimeSeriesResult<S>>> {
        check_range(range_hours)?;
        let now = (self.clock)();
        let (lookup, cleared) = self.plan(id, range_hours, force, now);
        if cleared {
            self.notify_cleared();
        }
        let plan = match lookup {
            Lookup::Fresh(result) => return Ok(result),
            Lookup::Fetch(plan) => plan,
        };

        let key = format!(
            "{id}@{range_hours}#{}.{}{}",
            plan.epoch,
            plan.revision,
            if plan.base.is_none() { "/full" } else { "" }
        );
        let this = Arc::clone(self);
        let node = id.to_string();
        let fetched = self
            .inflight
            .run(&key, move || async move {
                this.fetch(node, range_hours, plan).await
            })
            .await;

        match fetched {
            Ok(result) => Ok(result),
            Err(e) => {
                let cached = self.lock().entries.get(id).cloned();
                if let Some(cached) = cached {
                    tracing::warn!("{} records for {} failed, serving cached: {}", S::KIND, id, e);
                    Ok(cached)
                } else {
                    tracing::warn!("{} records for {} failed: {}", S::KIND, id, e);
                    Err(e)
                }
            }
        }
    }

    async fn fetch(
        &self,
        node: String,
        range_hours: u32,
        plan: Plan<S>,
    ) -> Result<Arc<TimeSeriesResult<S>>> {
        let page = self
            .api
            .get_records::<S::Record>(S::KIND, &node, plan.hours)
            .await?;
        let now = (self.clock)();
        let fetched = page.records.len();

        let (base_records, base_tasks) = match &plan.base {
            Some(base) => (base.records.as_slice(), base.tasks.as_slice()),
            None => (&[][..], &[][..]),
        };
        let mut records = merge_records(base_records, &page.records, range_hours, now);
        sort_records(&mut records);
        let tasks = if page.tasks.is_empty() {
            base_tasks.to_vec()
        } else {
            page.tasks
        };
        let summary = S::summarize(&records, &tasks, range_hours, now);

        tracing::debug!(
            "{} {}: {} records from {}h fetch, {} in window",
            S::KIND,
            node,
            fetched,
            plan.hours,
            records.len()
        );

        let result = Arc::new(TimeSeriesResult {
            node,
            range_hours,
            records,
            tasks,
            summary,
            fetched_at: now,
        });

        let stored = {
            let mut state = self.lock();
            if state.epoch == plan.epoch
                && state.range_hours == range_hours
                && state.revision(&result.node) == plan.revision
            {
                state
                    .entries
                    .insert(result.node.clone(), Arc::clone(&result));
                true
            } else {
                false
            }
        };
        if stored {
            self.report(&result);
        } else {
            tracing::debug!("{} entry dropped while fetching, result not kept", result.node);
        }
        Ok(result)
    }

    fn report(&self, result: &TimeSeriesResult<S>) {
        let reporters = self.reporters.read().unwrap_or_else(PoisonError::into_inner);
        for reporter in reporters.iter() {
            reporter(&result.node, &result.summary);
        }
    }

    /// Register a callback receiving every recomputed aggregate
    pub fn on_result<F>(&self, reporter: F)
    where
        F: Fn(&str, &S::Summary) + Send + Sync + 'static,
    {
        self.reporters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(reporter));
    }

    /// Register a callback run whenever the whole cache is dropped, by a
    /// range switch or an explicit clear
    pub fn on_clear<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.clear_listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    fn notify_cleared(&self) {
        let listeners = self
            .clear_listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            listener();
        }
    }

    /// Mark `id` visible and return its series for the active range,
    /// fetching it on first sight.
    pub async fn show(self: &Arc<Self>, id: &str) -> Result<Arc<TimeSeriesResult<S>>> {
        let range_hours = {
            let mut state = self.lock();
            state.visible.insert(id.to_string());
            state.range_hours
        };
        self.get_or_refresh(id, range_hours, false).await
    }

    /// Stop refreshing `id` in the background. Its cache entry is kept.
    pub fn hide(&self, id: &str) -> bool {
        self.lock().visible.remove(id)
    }

    /// True if `id` is visible
    #[must_use]
    pub fn is_visible(&self, id: &str) -> bool {
        self.lock().visible.contains(id)
    }

    /// Visible node ids, sorted
    #[must_use]
    pub fn visible(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().visible.iter().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Active range
    #[must_use]
    pub fn range_hours(&self) -> u32 {
        self.lock().range_hours
    }

    /// Switch the active range, clearing the cache if it differs. Returns
    /// true if it did.
    pub fn set_range(&self, range_hours: u32) -> Result<bool> {
        check_range(range_hours)?;
        {
            let mut state = self.lock();
            if state.range_hours == range_hours {
                return Ok(false);
            }
            tracing::info!("{} range {}h -> {}h", S::KIND, state.range_hours, range_hours);
            state.range_hours = range_hours;
            state.clear();
        }
        self.notify_cleared();
        Ok(true)
    }

    /// Drop the cache entry of one node. A fetch of it already in flight
    /// is not stored.
    pub fn invalidate(&self, id: &str) -> bool {
        self.lock().drop_entry(id)
    }

    /// Drop every cache entry
    pub fn clear(&self) {
        self.lock().clear();
        self.notify_cleared();
    }

    /// Cached series of a node, without fetching
    #[must_use]
    pub fn cached(&self, id: &str) -> Option<Arc<TimeSeriesResult<S>>> {
        self.lock().entries.get(id).cloned()
    }

    /// Number of cached nodes
    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Clear the whole cache and fetch every visible node again. Returns
    /// the number of successful fetches.
    pub async fn refresh_all(self: &Arc<Self>) -> usize {
        let range_hours = {
            let mut state = self.lock();
            state.clear();
            state.range_hours
        };
        self.notify_cleared();
        let ids = self.visible();
        tracing::info!("{} refresh of {} visible nodes", S::KIND, ids.len());
        join_all(ids.iter().map(|id| self.get_or_refresh(id, range_hours, false)))
            .await
            .iter()
            .filter(|r| r.is_ok())
            .count()
    }

    /// Incrementally refresh every node that is visible and already
    /// cached. Returns the number of nodes refreshed.
    pub async fn refresh_visible(self: &Arc<Self>) -> usize {
        let (ids, range_hours) = {
            let state = self.lock();
            let mut ids: Vec<String> = state
                .visible
                .iter()
                .filter(|id| state.entries.contains_key(*id))
                .cloned()
                .collect();
            ids.sort_unstable();
            (ids, state.range_hours)
        };
        join_all(ids.iter().map(|id| self.get_or_refresh(id, range_hours, false)))
            .await
            .iter()
            .filter(|r| r.is_ok())
            .count()
    }

    /// Refresh visible nodes every `options.refresh_interval` until
    /// `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = self.options.refresh_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
            let refreshed = self.refresh_visible().await;
            tracing::trace!("{} background refresh of {} nodes", S::KIND, refreshed);
        }
        tracing::debug!("{} background refresh stopped", S::KIND);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::records::{LoadSeries, PingSeries};
    use crate::rpc::methods;
    use crate::testing::ScriptedRpc;
    use crate::types::TimedRecord;
    use crate::Error;
    use chrono::TimeZone;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Now = Arc<Mutex<DateTime<Utc>>>;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn setup<S: Series>() -> (Arc<ScriptedRpc>, Now, Arc<TimeSeriesAssembler<S>>) {
        let rpc = ScriptedRpc::new();
        let now: Now = Arc::new(Mutex::new(start()));
        let clock_now = Arc::clone(&now);
        let clock: Clock = Arc::new(move || *clock_now.lock().unwrap());
        let api = RemoteApi::new(rpc.clone());
        let assembler = TimeSeriesAssembler::with_clock(api, RecordsOptions::default(), clock);
        (rpc, now, Arc::new(assembler))
    }

    fn advance(now: &Now, minutes: i64) {
        *now.lock().unwrap() += chrono::Duration::minutes(minutes);
    }

    fn load_page(minutes: &[i64]) -> Value {
        let records: Vec<Value> = minutes
            .iter()
            .map(|m| {
                let time = start() + chrono::Duration::minutes(*m);
                json!({ "time": time.to_rfc3339(), "cpu": 5 })
            })
            .collect();
        json!({ "records": records })
    }

    #[tokio::test]
    async fn refreshes_fetch_only_elapsed_hours() {
        let (rpc, now, assembler) = setup::<LoadSeries>();
        rpc.push_ok(methods::GET_RECORDS, load_page(&[-30, -10]));

        let first = assembler.get_or_refresh("a", 24, false).await.unwrap();
        assert_eq!(first.records.len(), 2);
        assert_eq!(
            rpc.calls(methods::GET_RECORDS)[0],
            json!({ "type": "load", "uuid": "a", "hours": 24 })
        );

        advance(&now, 1);
        rpc.push_ok(methods::GET_RECORDS, load_page(&[-10, 1]));
        let second = assembler.get_or_refresh("a", 24, false).await.unwrap();
        assert_eq!(rpc.calls(methods::GET_RECORDS)[1]["hours"], 2);
        assert_eq!(second.records.len(), 3);
        assert!(second.records.windows(2).all(|w| w[0].time() <= w[1].time()));

        advance(&now, 45);
        rpc.push_ok(methods::GET_RECORDS, load_page(&[]));
        let third = assembler.get_or_refresh("a", 24, false).await.unwrap();
        assert_eq!(rpc.calls(methods::GET_RECORDS)[2]["hours"], 24);
        assert_eq!(third.records.len(), 3);
    }

    #[tokio::test]
    async fn fresh_entries_are_served_without_fetch() {
        let (rpc, now, assembler) = setup::<LoadSeries>();
        rpc.push_ok(methods::GET_RECORDS, load_page(&[-5]));

        let first = assembler.get_or_refresh("a", 24, false).await.unwrap();
        *now.lock().unwrap() += chrono::Duration::seconds(30);
        let again = assembler.get_or_refresh("a", 24, false).await.unwrap();

        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(rpc.call_count(methods::GET_RECORDS), 1);
    }

    #[tokio::test]
    async fn failure_serves_cached_result() {
        let (rpc, now, assembler) = setup::<LoadSeries>();
        rpc.push_ok(methods::GET_RECORDS, load_page(&[-5]));
        let first = assembler.get_or_refresh("a", 24, false).await.unwrap();

        advance(&now, 2);
        rpc.push_err(methods::GET_RECORDS);
        let fallback = assembler.get_or_refresh("a", 24, false).await.unwrap();

        assert!(Arc::ptr_eq(&first, &fallback));
        assert_eq!(rpc.call_count(methods::GET_RECORDS), 2);
    }

    #[tokio::test]
    async fn failure_without_cache_is_an_error() {
        let (rpc, _now, assembler) = setup::<LoadSeries>();
        rpc.push_err(methods::GET_RECORDS);

        let err = assembler.get_or_refresh("a", 24, false).await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(assembler.cached_len(), 0);
    }

    #[tokio::test]
    async fn range_switch_clears_cache() {
        let (rpc, _now, assembler) = setup::<LoadSeries>();
        rpc.always_ok(methods::GET_RECORDS, load_page(&[-5]));

        assembler.get_or_refresh("a", 24, false).await.unwrap();
        assembler.get_or_refresh("b", 24, false).await.unwrap();
        assert_eq!(assembler.cached_len(), 2);

        let week = assembler.get_or_refresh("a", 168, false).await.unwrap();
        assert_eq!(week.range_hours, 168);
        assert_eq!(week.summary.slot_hours, 6);
        assert_eq!(assembler.range_hours(), 168);
        assert_eq!(assembler.cached_len(), 1);
        assert!(assembler.cached("b").is_none());
        assert_eq!(rpc.calls(methods::GET_RECORDS)[2]["hours"], 168);
    }

    #[tokio::test(start_paused = true)]
    async fn result_is_not_kept_after_range_switch() {
        let (rpc, _now, assembler) = setup::<LoadSeries>();
        rpc.push_delayed_ok(methods::GET_RECORDS, Duration::from_millis(100), load_page(&[-5]));

        let task = tokio::spawn({
            let assembler = Arc::clone(&assembler);
            async move { assembler.get_or_refresh("a", 24, false).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(assembler.set_range(168).unwrap());

        let result = task.await.unwrap().unwrap();
        assert_eq!(result.range_hours, 24);
        assert!(assembler.cached("a").is_none());
    }

    #[tokio::test]
    async fn oversized_range_is_rejected() {
        let (rpc, _now, assembler) = setup::<LoadSeries>();
        rpc.always_ok(methods::GET_RECORDS, load_page(&[-5]));
        assembler.get_or_refresh("a", 24, false).await.unwrap();

        let err = assembler.get_or_refresh("a", u32::MAX, false).await.unwrap_err();
        assert!(matches!(err, Error::General(_)));
        assert!(matches!(assembler.set_range(0), Err(Error::General(_))));
        assert_eq!(assembler.range_hours(), 24);
        assert_eq!(assembler.cached_len(), 1);
        assert_eq!(rpc.call_count(methods::GET_RECORDS), 1);

        let year = assembler.get_or_refresh("a", MAX_RANGE_HOURS, false).await.unwrap();
        assert_eq!(year.range_hours, MAX_RANGE_HOURS);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_result_is_not_overwritten_by_older_fetch() {
        let (rpc, now, assembler) = setup::<LoadSeries>();
        rpc.push_ok(methods::GET_RECORDS, load_page(&[-5]));
        assembler.get_or_refresh("a", 24, false).await.unwrap();

        advance(&now, 2);
        rpc.push_delayed_ok(methods::GET_RECORDS, Duration::from_millis(100), load_page(&[1]));
        rpc.push_ok(methods::GET_RECORDS, load_page(&[-5, 1, 2]));

        let delta = tokio::spawn({
            let assembler = Arc::clone(&assembler);
            async move { assembler.get_or_refresh("a", 24, false).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let forced = assembler.get_or_refresh("a", 24, true).await.unwrap();
        assert_eq!(forced.records.len(), 3);

        let older = delta.await.unwrap().unwrap();
        assert!(!Arc::ptr_eq(&older, &forced));
        assert!(Arc::ptr_eq(&assembler.cached("a").unwrap(), &forced));
        let calls = rpc.calls(methods::GET_RECORDS);
        assert_eq!(calls[1]["hours"], 2);
        assert_eq!(calls[2]["hours"], 24);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidated_entry_is_not_restored_by_inflight_fetch() {
        let (rpc, _now, assembler) = setup::<LoadSeries>();
        rpc.push_delayed_ok(methods::GET_RECORDS, Duration::from_millis(100), load_page(&[-5]));

        let task = tokio::spawn({
            let assembler = Arc::clone(&assembler);
            async move { assembler.get_or_refresh("a", 24, false).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!assembler.invalidate("a"));

        task.await.unwrap().unwrap();
        assert!(assembler.cached("a").is_none());
    }

    #[tokio::test]
    async fn clear_listeners_follow_every_cache_clear() {
        let (rpc, _now, assembler) = setup::<LoadSeries>();
        rpc.always_ok(methods::GET_RECORDS, load_page(&[-5]));
        let clears = Arc::new(AtomicUsize::new(0));
        assembler.on_clear({
            let clears = Arc::clone(&clears);
            move || {
                clears.fetch_add(1, Ordering::SeqCst);
            }
        });

        assembler.get_or_refresh("a", 24, false).await.unwrap();
        assert_eq!(clears.load(Ordering::SeqCst), 0);
        assembler.get_or_refresh("a", 168, false).await.unwrap();
        assert_eq!(clears.load(Ordering::SeqCst), 1);
        assert!(!assembler.set_range(168).unwrap());
        assert_eq!(clears.load(Ordering::SeqCst), 1);
        assert!(assembler.set_range(24).unwrap());
        assembler.clear();
        assembler.refresh_all().await;
        assert_eq!(clears.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_requests_share_one_fetch() {
        let (rpc, _now, assembler) = setup::<LoadSeries>();
        rpc.push_delayed_ok(methods::GET_RECORDS, Duration::from_millis(50), load_page(&[-5]));

        let (a, b) = tokio::join!(
            assembler.get_or_refresh("a", 24, false),
            assembler.get_or_refresh("a", 24, false)
        );

        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(rpc.call_count(methods::GET_RECORDS), 1);
    }

    #[tokio::test]
    async fn force_fetches_whole_range() {
        let (rpc, now, assembler) = setup::<LoadSeries>();
        rpc.always_ok(methods::GET_RECORDS, load_page(&[-5]));

        let first = assembler.get_or_refresh("a", 24, false).await.unwrap();
        *now.lock().unwrap() += chrono::Duration::seconds(10);
        let forced = assembler.get_or_refresh("a", 24, true).await.unwrap();

        assert!(!Arc::ptr_eq(&first, &forced));
        assert_eq!(rpc.calls(methods::GET_RECORDS)[1]["hours"], 24);
    }

    #[tokio::test]
    async fn refresh_all_refetches_visible_nodes() {
        let (rpc, _now, assembler) = setup::<LoadSeries>();
        rpc.always_ok(methods::GET_RECORDS, load_page(&[-5]));

        assembler.show("a").await.unwrap();
        assembler.show("b").await.unwrap();
        assert!(assembler.hide("b"));
        assert_eq!(assembler.visible(), vec!["a".to_string()]);

        assert_eq!(assembler.refresh_all().await, 1);
        let calls = rpc.calls(methods::GET_RECORDS);
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[2]["uuid"], "a");
        assert_eq!(calls[2]["hours"], 24);
        assert_eq!(assembler.cached_len(), 1);
    }

    #[tokio::test]
    async fn background_refresh_covers_visible_cached_nodes() {
        let (rpc, now, assembler) = setup::<LoadSeries>();
        rpc.always_ok(methods::GET_RECORDS, load_page(&[-5]));

        assembler.show("a").await.unwrap();
        assembler.show("b").await.unwrap();
        assembler.hide("b");
        advance(&now, 5);

        assert_eq!(assembler.refresh_visible().await, 1);
        let calls = rpc.calls(methods::GET_RECORDS);
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[2], json!({ "type": "load", "uuid": "a", "hours": 2 }));
    }

    #[tokio::test]
    async fn reporters_see_recomputed_summaries() {
        let (rpc, now, assembler) = setup::<LoadSeries>();
        rpc.always_ok(methods::GET_RECORDS, load_page(&[-5]));
        let seen = Arc::new(AtomicUsize::new(0));
        assembler.on_result({
            let seen = Arc::clone(&seen);
            move |id, summary| {
                assert_eq!(id, "a");
                assert_eq!(summary.online, 1);
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });

        assembler.get_or_refresh("a", 24, false).await.unwrap();
        assembler.get_or_refresh("a", 24, false).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        advance(&now, 2);
        assembler.get_or_refresh("a", 24, false).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn ping_series_keeps_tasks_across_deltas() {
        let (rpc, now, assembler) = setup::<PingSeries>();
        let at = |m: i64| (start() + chrono::Duration::minutes(m)).to_rfc3339();
        rpc.push_ok(
            methods::GET_RECORDS,
            json!({
                "records": [
                    { "task_id": 1, "time": at(-3), "value": 20 },
                    { "task_id": 1, "time": at(-2), "value": -1 }
                ],
                "tasks": [{ "id": 1, "name": "edge", "interval": 60 }]
            }),
        );
        assembler.get_or_refresh("a", 24, false).await.unwrap();

        advance(&now, 2);
        rpc.push_ok(
            methods::GET_RECORDS,
            json!({ "records": [{ "task_id": 1, "time": at(1), "value": 40 }] }),
        );
        let result = assembler.get_or_refresh("a", 24, false).await.unwrap();

        assert_eq!(rpc.calls(methods::GET_RECORDS)[1]["type"], "ping");
        assert_eq!(result.tasks.len(), 1);
        let task = &result.summary.tasks[0];
        assert_eq!(task.task.name, "edge");
        assert_eq!(task.stats.samples, 3);
        assert_eq!(task.stats.lost, 1);
    }
}
