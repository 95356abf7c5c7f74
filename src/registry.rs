//!
//! Authoritative set of monitored nodes.
//!
//! The registry owns node identity and descriptive attributes. It publishes
//! immutable [`Snapshot`]s through a `watch` channel: a new snapshot is
//! only sent when something changed, and nodes that did not change keep
//! their pointer identity from one snapshot to the next.
//!
//! A cold [`NodeRegistry::load`] starts every node offline. Periodic
//! reloads go through [`NodeRegistry::reload`], which merges a status poll
//! before publishing so that live nodes never appear offline in between.
//!
use crate::dedup::Deduplicator;
use crate::rpc::RemoteApi;
use crate::types::{LatestStatus, Node, NodeInfo, Presence, Snapshot, StatusRecord};
use crate::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

const LOAD_KEY: &str = "load";

/// Registry of monitored nodes
pub struct NodeRegistry {
    api: RemoteApi,
    snapshot: watch::Sender<Snapshot>,
    generation: AtomicU64,
    loads: Deduplicator<Snapshot>,
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("nodes", &self.snapshot.borrow().len())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

impl NodeRegistry {
    /// Create an empty registry. Nothing is fetched until [`Self::load`].
    #[must_use]
    pub fn new(api: RemoteApi) -> Self {
        let (snapshot, _) = watch::channel(Snapshot::from(Vec::new()));
        Self {
            api,
            snapshot,
            generation: AtomicU64::new(0),
            loads: Deduplicator::new(),
        }
    }

    /// Fetch the node list and replace the registry with it. Nodes missing
    /// from the response are removed, surviving nodes get their attributes
    /// replaced and every node starts offline until the next status poll.
    /// On failure the registry is left untouched.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn load(&self) -> Result<Snapshot> {
        let nodes = self.api.get_nodes().await?;

        let mut infos: Vec<NodeInfo> = nodes.into_values().collect();
        infos.sort_by(NodeInfo::display_order);
        let snapshot: Snapshot = infos
            .into_iter()
            .map(|info| Arc::new(Node::unreported(Arc::new(info))))
            .collect();

        self.generation.fetch_add(1, Ordering::SeqCst);
        self.snapshot.send_replace(snapshot.clone());
        tracing::info!("loaded {} nodes", snapshot.len());
        Ok(snapshot)
    }

    /// Fetch the node list and a status poll, then publish both at once.
    /// Nodes missing from the list are removed; surviving nodes take their
    /// presence and status from the poll. If the poll fails they keep
    /// their last known state and new nodes start offline. Nothing is
    /// published when no node changed. On a node list failure the
    /// registry is left untouched.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn reload(&self) -> Result<Snapshot> {
        let nodes = self.api.get_nodes().await?;
        let latest = match self.api.get_latest_status().await {
            Ok(latest) => Some(latest),
            Err(e) => {
                tracing::warn!("status poll during reload failed, keeping last state: {}", e);
                None
            }
        };

        let mut infos: Vec<NodeInfo> = nodes.into_values().collect();
        infos.sort_by(NodeInfo::display_order);

        let published = self.snapshot.send_if_modified(|current| {
            let next: Vec<Arc<Node>> = {
                let previous: HashMap<&str, &Arc<Node>> =
                    current.iter().map(|n| (n.id(), n)).collect();
                infos
                    .into_iter()
                    .map(|info| {
                        let prev = previous.get(info.uuid.as_str()).copied();
                        let (presence, status) = match (&latest, prev) {
                            (Some(latest), _) => observe(
                                latest,
                                &info.uuid,
                                prev.and_then(|n| n.status.as_ref()),
                            ),
                            (None, Some(node)) => (node.presence, node.status.clone()),
                            (None, None) => (Presence::Offline, None),
                        };
                        match prev {
                            Some(node) if *node.info == info => {
                                if node.presence == presence && node.status == status {
                                    Arc::clone(node)
                                } else {
                                    Arc::new(Node {
                                        info: Arc::clone(&node.info),
                                        presence,
                                        status,
                                    })
                                }
                            }
                            _ => Arc::new(Node {
                                info: Arc::new(info),
                                presence,
                                status,
                            }),
                        }
                    })
                    .collect()
            };

            let unchanged = next.len() == current.len()
                && next.iter().zip(current.iter()).all(|(a, b)| Arc::ptr_eq(a, b));
            if unchanged {
                false
            } else {
                *current = next.into();
                true
            }
        });

        self.generation.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.snapshot();
        if published {
            tracing::info!("reloaded {} nodes", snapshot.len());
        } else {
            tracing::debug!("reloaded {} nodes, nothing changed", snapshot.len());
        }
        Ok(snapshot)
    }

    /// Same as [`Self::reload`], but concurrent callers share a single
    /// outstanding fetch.
    pub async fn refresh(self: &Arc<Self>) -> Result<Snapshot> {
        let this = Arc::clone(self);
        self.loads
            .run(LOAD_KEY, move || async move { this.reload().await })
            .await
    }

    /// Merge a status poll into the registry. Returns true if a new
    /// snapshot was published.
    pub fn apply_status(&self, latest: &LatestStatus) -> bool {
        self.snapshot.send_if_modified(|current| {
            let mut changed = 0usize;
            let next: Vec<Arc<Node>> = current
                .iter()
                .map(|node| {
                    let (presence, status) = observe(latest, node.id(), node.status.as_ref());

                    if presence == node.presence && status == node.status {
                        Arc::clone(node)
                    } else {
                        changed += 1;
                        Arc::new(Node {
                            info: Arc::clone(&node.info),
                            presence,
                            status,
                        })
                    }
                })
                .collect();

            if changed == 0 {
                false
            } else {
                tracing::trace!("{} of {} nodes changed", changed, next.len());
                *current = next.into();
                true
            }
        })
    }

    /// Current snapshot
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    /// Observe snapshot changes. Dropping the receiver unsubscribes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.subscribe()
    }

    /// Look up one node
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Node>> {
        self.snapshot.borrow().iter().find(|n| n.id() == id).cloned()
    }

    /// Ids of every node currently online
    #[must_use]
    pub fn online_ids(&self) -> Vec<String> {
        online_ids(&self.snapshot.borrow())
    }

    /// Number of nodes currently online
    #[must_use]
    pub fn online_count(&self) -> usize {
        self.snapshot.borrow().iter().filter(|n| n.is_online()).count()
    }

    /// Incremented by every successful load or reload
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

/// Presence and status of `id` after `latest`. Without a fresh report the
/// last known status is kept; presence alone comes from the online set.
fn observe(
    latest: &LatestStatus,
    id: &str,
    previous: Option<&StatusRecord>,
) -> (Presence, Option<StatusRecord>) {
    let presence = if latest.online.contains(id) {
        Presence::Online
    } else {
        Presence::Offline
    };
    let status = match latest.data.get(id) {
        Some(raw) => Some(StatusRecord::from(raw)),
        None => previous.cloned(),
    };
    (presence, status)
}

/// Ids of the online nodes of a snapshot
#[must_use]
pub fn online_ids(snapshot: &Snapshot) -> Vec<String> {
    snapshot
        .iter()
        .filter(|n| n.is_online())
        .map(|n| n.id().to_string())
        .collect()
}
