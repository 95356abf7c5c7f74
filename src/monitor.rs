//!
//! Wires the registry, the reconciler, the sparkline cache and the
//! time-series assemblers to one endpoint and runs their loops.
//!
//! ```no_run
//! # async fn doc(client: telemetry_sync::rpc::http::Client) -> telemetry_sync::Result<()> {
//! use std::time::Duration;
//! use telemetry_sync::monitor::Monitor;
//!
//! let monitor = Monitor::builder(client)
//!     .status_interval(Duration::from_secs(5))
//!     .range_hours(72)
//!     .start()
//!     .await?;
//! println!("{} nodes online", monitor.registry().online_count());
//! monitor.shutdown();
//! # Ok(())
//! # }
//! ```
use crate::reconciler::{self, StatusReconciler};
use crate::records::{FleetUptime, LoadSeries, PingSeries, RecordsOptions, TimeSeriesAssembler};
use crate::registry::NodeRegistry;
use crate::rpc::{ConnectionState, RemoteApi, Rpc};
use crate::sparkline::{SparklineCache, SparklineOptions};
use crate::Result;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing_futures::Instrument;

/// Cadences and component options of a [`Monitor`]
#[derive(Clone, Copy, Debug)]
pub struct MonitorOptions {
    /// Status poll cadence
    pub status_interval: Duration,
    /// Cadence of authoritative node list reloads
    pub registry_interval: Duration,
    pub sparkline: SparklineOptions,
    pub records: RecordsOptions,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            status_interval: reconciler::DEFAULT_INTERVAL,
            registry_interval: Duration::from_secs(60),
            sparkline: SparklineOptions::default(),
            records: RecordsOptions::default(),
        }
    }
}

/// [`Monitor`] builder
pub struct MonitorBuilder {
    rpc: Arc<dyn Rpc>,
    options: MonitorOptions,
}

impl std::fmt::Debug for MonitorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorBuilder")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl MonitorBuilder {
    /// Builder over a shared endpoint
    #[must_use]
    pub fn new(rpc: Arc<dyn Rpc>) -> Self {
        Self {
            rpc,
            options: MonitorOptions::default(),
        }
    }

    /// Replace every option at once
    #[must_use]
    pub fn options(self, options: MonitorOptions) -> Self {
        Self { options, ..self }
    }

    /// Status poll cadence
    #[must_use]
    pub fn status_interval(mut self, interval: Duration) -> Self {
        self.options.status_interval = interval;
        self
    }

    /// Node list reload cadence
    #[must_use]
    pub fn registry_interval(mut self, interval: Duration) -> Self {
        self.options.registry_interval = interval;
        self
    }

    /// Sparkline cache options
    #[must_use]
    pub fn sparkline(mut self, options: SparklineOptions) -> Self {
        self.options.sparkline = options;
        self
    }

    /// Time-series options
    #[must_use]
    pub fn records(mut self, options: RecordsOptions) -> Self {
        self.options.records = options;
        self
    }

    /// Initial time-series range
    #[must_use]
    pub fn range_hours(mut self, range_hours: u32) -> Self {
        self.options.records.range_hours = range_hours;
        self
    }

    /// Load the node list, apply a first status poll and spawn the
    /// background loops. Fails if the node list cannot be loaded; nothing
    /// is spawned in that case and the call can be retried.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn start(self) -> Result<Monitor> {
        let api = RemoteApi::new(self.rpc);
        let options = self.options;

        let registry = Arc::new(NodeRegistry::new(api.clone()));
        registry.load().await?;

        let reconciler = Arc::new(StatusReconciler::new(Arc::clone(&registry), api.clone()));
        let outcome = reconciler.tick().await;
        tracing::debug!("initial status poll: {:?}", outcome);

        let sparklines = Arc::new(SparklineCache::new(api.clone(), options.sparkline));
        let load_records = Arc::new(TimeSeriesAssembler::<LoadSeries>::new(
            api.clone(),
            options.records,
        ));
        let ping_records = Arc::new(TimeSeriesAssembler::<PingSeries>::new(
            api.clone(),
            options.records,
        ));
        let fleet = FleetUptime::new();
        fleet.attach(&load_records);

        let (shutdown, _) = watch::channel(false);
        let mut tasks = Vec::new();

        tasks.push(spawn(
            "status",
            Arc::clone(&reconciler).run(options.status_interval, shutdown.subscribe()),
        ));
        tasks.push(spawn(
            "registry",
            refresh_registry(
                Arc::clone(&registry),
                options.registry_interval,
                shutdown.subscribe(),
            ),
        ));
        tasks.push(spawn(
            "connection",
            watch_connection(api.connection(), Arc::clone(&reconciler), shutdown.subscribe()),
        ));
        tasks.push(spawn(
            "sparkline",
            Arc::clone(&sparklines).run(registry.subscribe(), shutdown.subscribe()),
        ));
        tasks.push(spawn(
            "load",
            Arc::clone(&load_records).run(shutdown.subscribe()),
        ));
        tasks.push(spawn(
            "ping",
            Arc::clone(&ping_records).run(shutdown.subscribe()),
        ));

        tracing::info!(
            "monitor started with {} nodes, {} online",
            registry.snapshot().len(),
            registry.online_count()
        );

        Ok(Monitor {
            api,
            registry,
            reconciler,
            sparklines,
            load_records,
            ping_records,
            fleet,
            shutdown,
            tasks: Mutex::new(tasks),
        })
    }
}

fn spawn<F>(name: &'static str, task: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(task.instrument(tracing::info_span!("monitor", task = name)))
}

async fn refresh_registry(
    registry: Arc<NodeRegistry>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
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
        if let Err(e) = registry.refresh().await {
            tracing::warn!("node list refresh failed, keeping previous list: {}", e);
        }
    }
    tracing::debug!("registry refresh stopped");
}

async fn watch_connection(
    mut connection: watch::Receiver<ConnectionState>,
    reconciler: Arc<StatusReconciler>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut previous = *connection.borrow_and_update();
    loop {
        tokio::select! {
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }

        let state = *connection.borrow_and_update();
        tracing::debug!("connection {:?} -> {:?}", previous, state);
        if state == ConnectionState::Connected && previous != ConnectionState::Connected {
            tracing::info!("connection restored, polling status");
            reconciler.arm_bootstrap();
        }
        previous = state;
    }
    tracing::debug!("connection watcher stopped");
}

/// Running synchronization layer. Dropping it stops every loop.
pub struct Monitor {
    api: RemoteApi,
    registry: Arc<NodeRegistry>,
    reconciler: Arc<StatusReconciler>,
    sparklines: Arc<SparklineCache>,
    load_records: Arc<TimeSeriesAssembler<LoadSeries>>,
    ping_records: Arc<TimeSeriesAssembler<PingSeries>>,
    fleet: FleetUptime,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("registry", &self.registry)
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

impl Monitor {
    /// Start building a monitor over `rpc`
    #[must_use]
    pub fn builder<R: Rpc + 'static>(rpc: R) -> MonitorBuilder {
        MonitorBuilder::new(Arc::new(rpc))
    }

    /// Endpoint operations
    #[must_use]
    pub fn api(&self) -> &RemoteApi {
        &self.api
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn reconciler(&self) -> &Arc<StatusReconciler> {
        &self.reconciler
    }

    #[must_use]
    pub fn sparklines(&self) -> &Arc<SparklineCache> {
        &self.sparklines
    }

    /// Load series, summarized as uptime
    #[must_use]
    pub fn load_records(&self) -> &Arc<TimeSeriesAssembler<LoadSeries>> {
        &self.load_records
    }

    /// Ping series, summarized as latency
    #[must_use]
    pub fn ping_records(&self) -> &Arc<TimeSeriesAssembler<PingSeries>> {
        &self.ping_records
    }

    /// Fleet-average uptime over the load series
    #[must_use]
    pub fn fleet(&self) -> &FleetUptime {
        &self.fleet
    }

    /// Switch both series to another range, clearing their caches and the
    /// fleet average
    pub fn set_range(&self, range_hours: u32) -> Result<()> {
        self.load_records.set_range(range_hours)?;
        self.ping_records.set_range(range_hours)?;
        Ok(())
    }

    /// Clear both series caches and fetch every visible node again.
    /// Returns the number of successful fetches.
    pub async fn refresh_records(&self) -> Result<usize> {
        if self.is_shut_down() {
            return Err(crate::Error::Closed);
        }
        let (load, ping) = tokio::join!(
            self.load_records.refresh_all(),
            self.ping_records.refresh_all()
        );
        Ok(load + ping)
    }

    /// Signal every background loop to stop. In-flight requests settle but
    /// their results are dropped.
    pub fn shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            tracing::info!("monitor shutting down");
        }
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Stop and wait until every loop has exited
    pub async fn stop(self) {
        self.shutdown();
        let tasks = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!("background loop failed: {}", e);
            }
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
