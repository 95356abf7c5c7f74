//!
//! Merges periodic status polls into the [`NodeRegistry`].
//!
//! A poll is only issued when at least one node is online, or when a
//! bootstrap poll is armed: after every registry load (which resets all
//! nodes to offline) and after the connection comes back. Every poll
//! carries a sequence number; a response older than the last applied one
//! is discarded.
//!
use crate::registry::NodeRegistry;
use crate::rpc::RemoteApi;
use crate::types::LatestStatus;
use crate::Result;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Reference poll cadence
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

/// What one reconciliation tick did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing online and no bootstrap armed, no request made
    Skipped,
    /// Response applied, `changed` if a new snapshot was published
    Applied {
        /// A new snapshot was published
        changed: bool,
    },
    /// A newer response was already applied
    Stale,
    /// The poll failed, previous snapshot retained
    Failed,
}

/// A poll that has been issued
#[derive(Clone, Copy, Debug)]
struct Ticket {
    seq: u64,
    bootstrap: bool,
}

/// Status reconciler
pub struct StatusReconciler {
    registry: Arc<NodeRegistry>,
    api: RemoteApi,
    issued: AtomicU64,
    applied: Mutex<u64>,
    seen_generation: AtomicU64,
    bootstrap: AtomicBool,
}

impl std::fmt::Debug for StatusReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusReconciler")
            .field("issued", &self.issued.load(Ordering::Relaxed))
            .field("bootstrap", &self.bootstrap.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl StatusReconciler {
    /// Create a reconciler writing into `registry`
    #[must_use]
    pub fn new(registry: Arc<NodeRegistry>, api: RemoteApi) -> Self {
        Self {
            registry,
            api,
            issued: AtomicU64::new(0),
            applied: Mutex::new(0),
            seen_generation: AtomicU64::new(0),
            bootstrap: AtomicBool::new(false),
        }
    }

    /// Force the next tick to poll even if nothing is online
    pub fn arm_bootstrap(&self) {
        self.bootstrap.store(true, Ordering::SeqCst);
    }

    /// Decide whether to poll and, if so, issue a sequence number
    fn begin(&self) -> Option<Ticket> {
        let generation = self.registry.generation();
        let reloaded = self.seen_generation.swap(generation, Ordering::SeqCst) != generation;
        let armed = self.bootstrap.swap(false, Ordering::SeqCst);
        let bootstrap = reloaded || armed;

        if !bootstrap && self.registry.online_count() == 0 {
            tracing::trace!("nothing online, not polling");
            return None;
        }

        let seq = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Some(Ticket { seq, bootstrap })
    }

    fn finish(&self, ticket: Ticket, result: Result<LatestStatus>) -> TickOutcome {
        match result {
            Err(e) => {
                tracing::warn!("status poll #{} failed: {}", ticket.seq, e);
                if ticket.bootstrap {
                    self.arm_bootstrap();
                }
                TickOutcome::Failed
            }
            Ok(latest) => {
                let mut applied = self.applied.lock().unwrap_or_else(PoisonError::into_inner);
                if ticket.seq <= *applied {
                    tracing::debug!(
                        "discarding status poll #{}, #{} already applied",
                        ticket.seq,
                        *applied
                    );
                    return TickOutcome::Stale;
                }
                *applied = ticket.seq;
                let changed = self.registry.apply_status(&latest);
                TickOutcome::Applied { changed }
            }
        }
    }

    /// Run one reconciliation cycle
    #[tracing::instrument(skip(self), level = "trace")]
    pub async fn tick(&self) -> TickOutcome {
        let Some(ticket) = self.begin() else {
            return TickOutcome::Skipped;
        };
        let result = self.api.get_latest_status().await;
        self.finish(ticket, result)
    }

    /// Tick every `interval` until `shutdown` flips to true. A tick never
    /// overlaps the previous one; a response that arrives after shutdown
    /// is dropped.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            let Some(ticket) = self.begin() else {
                continue;
            };
            let result = self.api.get_latest_status().await;
            if *shutdown.borrow() {
                break;
            }
            self.finish(ticket, result);
        }
        tracing::debug!("status reconciler stopped");
    }
}
