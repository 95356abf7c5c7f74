//!
//! Monitored nodes
//!
use super::lenient;
use super::status::StatusRecord;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::cmp::Ordering;
use std::sync::Arc;

/// Descriptive attributes of a node, returned from `getNodes`
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct NodeInfo {
    /// Unique node id
    #[serde(deserialize_with = "lenient::text")]
    pub uuid: String,
    /// Display name
    #[serde(deserialize_with = "lenient::text")]
    pub name: String,
    #[serde(deserialize_with = "lenient::text")]
    pub cpu_name: String,
    #[serde(deserialize_with = "lenient::unsigned")]
    pub cpu_cores: u64,
    #[serde(deserialize_with = "lenient::text")]
    pub arch: String,
    #[serde(deserialize_with = "lenient::text")]
    pub os: String,
    #[serde(deserialize_with = "lenient::text")]
    pub virtualization: String,
    #[serde(deserialize_with = "lenient::text")]
    pub region: String,
    /// Grouping label
    #[serde(deserialize_with = "lenient::text")]
    pub group: String,
    /// Semicolon separated tags, see [`NodeInfo::tags`]
    #[serde(rename = "tags", deserialize_with = "lenient::text")]
    pub raw_tags: String,
    /// Memory in bytes
    #[serde(deserialize_with = "lenient::unsigned")]
    pub mem_total: u64,
    /// Swap in bytes
    #[serde(deserialize_with = "lenient::unsigned")]
    pub swap_total: u64,
    /// Disk in bytes
    #[serde(deserialize_with = "lenient::unsigned")]
    pub disk_total: u64,
    /// Traffic allowance in bytes, 0 for unlimited
    #[serde(deserialize_with = "lenient::unsigned")]
    pub traffic_limit: u64,
    /// Which direction(s) count toward the allowance
    #[serde(deserialize_with = "lenient::text")]
    pub traffic_limit_type: String,
    /// Ordering weight, lower first
    #[serde(deserialize_with = "lenient::integer")]
    pub weight: i64,
    #[serde(deserialize_with = "lenient::flag")]
    pub hidden: bool,
    #[serde(deserialize_with = "lenient::float")]
    pub price: f64,
    /// Billing cycle in days
    #[serde(deserialize_with = "lenient::integer")]
    pub billing_cycle: i64,
    #[serde(deserialize_with = "lenient::text")]
    pub currency: String,
    #[serde(deserialize_with = "lenient::timestamp")]
    pub expired_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient::timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient::timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl NodeInfo {
    /// Tag labels, empty entries removed
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.raw_tags
            .split(';')
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Display ordering: weight, then name, then id
    #[must_use]
    pub fn display_order(&self, other: &Self) -> Ordering {
        self.weight
            .cmp(&other.weight)
            .then_with(|| self.name.cmp(&other.name))
            .then_with(|| self.uuid.cmp(&other.uuid))
    }
}

/// Reported presence of a node
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Presence {
    /// Listed in the latest online set
    Online,
    /// Not listed, or never reported
    #[default]
    Offline,
}

/// A node as published in a registry [`Snapshot`]
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    /// Descriptive attributes, owned by the registry
    pub info: Arc<NodeInfo>,
    /// Presence from the latest applied poll
    pub presence: Presence,
    /// Last known status, absent if never reported since the last load
    pub status: Option<StatusRecord>,
}

impl Node {
    /// A node that has not reported yet
    #[must_use]
    pub fn unreported(info: Arc<NodeInfo>) -> Self {
        Self {
            info,
            presence: Presence::Offline,
            status: None,
        }
    }

    /// Node id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.info.uuid
    }

    /// True if listed in the latest online set
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.presence == Presence::Online
    }
}

/// Immutable, ordered view of every registered node. Nodes that did not
/// change between two snapshots are shared by pointer.
pub type Snapshot = Arc<[Arc<Node>]>;
