//!
//! Remote procedure contract consumed by the synchronization layer.
//!
//! The transport itself (persistent connection, reconnect, heartbeat) is
//! provided by an implementation of [`Rpc`]; [`http::Client`] is a thin
//! request/response one.
//!
use crate::types::{LatestStatus, NodeInfo, RawStatus, RecordsPage, SeriesKind};
use crate::Result;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

pub mod http;

/// Remote method names
pub mod methods {
    /// Descriptive list of every node
    pub const GET_NODES: &str = "common:getNodes";
    /// Presence set and latest status of every node
    pub const GET_LATEST_STATUS: &str = "common:getNodesLatestStatus";
    /// Short history of status reports for one node
    pub const GET_RECENT_STATUS: &str = "common:getNodeRecentStatus";
    /// Load or ping records for one node
    pub const GET_RECORDS: &str = "common:getRecords";
}

/// State of the connection to the remote endpoint
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection has been attempted
    #[default]
    Disconnected,
    /// First connection attempt in progress
    Connecting,
    /// The last exchange succeeded
    Connected,
    /// Trying again after a failure
    Reconnecting,
    /// The last exchange failed
    Error,
}

/// A remote procedure endpoint.
#[async_trait::async_trait]
pub trait Rpc: Send + Sync {
    /// Invoke `method` with `params`, returning the raw result.
    async fn call_value(&self, method: &str, params: serde_json::Value)
        -> Result<serde_json::Value>;

    /// Observe the connection state.
    fn connection(&self) -> watch::Receiver<ConnectionState>;
}

/// Typed call on top of [`Rpc::call_value`]
pub async fn call<P, R>(rpc: &dyn Rpc, method: &str, params: &P) -> Result<R>
where
    P: Serialize + ?Sized,
    R: DeserializeOwned,
{
    let params = serde_json::to_value(params)?;
    let value = rpc.call_value(method, params).await?;
    Ok(serde_json::from_value(value)?)
}

/// `getNodeRecentStatus` answers either with a bare list or wrapped in an
/// object.
#[derive(Deserialize)]
#[serde(untagged)]
enum RecentStatus {
    List(Vec<RawStatus>),
    Wrapped {
        #[serde(default)]
        records: Vec<RawStatus>,
    },
}

/// Typed access to the remote operations the synchronization layer needs.
#[derive(Clone)]
pub struct RemoteApi {
    rpc: Arc<dyn Rpc>,
}

impl std::fmt::Debug for RemoteApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteApi")
            .field("connection", &*self.rpc.connection().borrow())
            .finish()
    }
}

impl RemoteApi {
    /// Wrap an endpoint
    #[must_use]
    pub fn new(rpc: Arc<dyn Rpc>) -> Self {
        Self { rpc }
    }

    /// Observe the connection state of the underlying endpoint
    #[must_use]
    pub fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.rpc.connection()
    }

    /// Fetch the descriptive record of every node, keyed by node id
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn get_nodes(&self) -> Result<HashMap<String, NodeInfo>> {
        let mut nodes: HashMap<String, NodeInfo> =
            call(self.rpc.as_ref(), methods::GET_NODES, &json!({})).await?;
        // The map key is authoritative for the id.
        for (id, node) in &mut nodes {
            if node.uuid != *id {
                node.uuid.clone_from(id);
            }
        }
        Ok(nodes)
    }

    /// Fetch the presence set and the latest status of every node
    #[tracing::instrument(skip(self), level = "trace")]
    pub async fn get_latest_status(&self) -> Result<LatestStatus> {
        call(self.rpc.as_ref(), methods::GET_LATEST_STATUS, &json!({})).await
    }

    /// Fetch the recent status history of one node, oldest first
    #[tracing::instrument(skip(self), level = "trace")]
    pub async fn get_recent_status(&self, uuid: &str) -> Result<Vec<RawStatus>> {
        let recent: RecentStatus = call(
            self.rpc.as_ref(),
            methods::GET_RECENT_STATUS,
            &json!({ "uuid": uuid }),
        )
        .await?;
        Ok(match recent {
            RecentStatus::List(records) | RecentStatus::Wrapped { records } => records,
        })
    }

    /// Fetch `hours` of records of the given kind for one node
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn get_records<R: DeserializeOwned>(
        &self,
        kind: SeriesKind,
        uuid: &str,
        hours: u32,
    ) -> Result<RecordsPage<R>> {
        call(
            self.rpc.as_ref(),
            methods::GET_RECORDS,
            &json!({ "type": kind, "uuid": uuid, "hours": hours }),
        )
        .await
    }
}
