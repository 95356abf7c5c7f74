//!
//! Time-series samples returned from `getRecords`
//!
use super::lenient;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Logical series
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesKind {
    /// Resource usage samples, used for uptime
    Load,
    /// Latency probe samples
    Ping,
}

impl std::fmt::Display for SeriesKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Load => "load",
            Self::Ping => "ping",
        })
    }
}

/// Identity of a sample within one node's series
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RecordKey {
    /// Exact wire timestamp
    Time(String),
    /// Probe task and exact wire timestamp
    Task(u64, String),
}

/// A sample placed in time
pub trait TimedRecord: Clone + DeserializeOwned + Send + Sync + 'static {
    /// Deduplication key
    fn key(&self) -> RecordKey;

    /// Wire timestamp, verbatim
    fn raw_time(&self) -> &str;

    /// Parsed timestamp, `None` if unparsable
    fn time(&self) -> Option<DateTime<Utc>> {
        lenient::parse_time(self.raw_time())
    }
}

/// Resource usage sample
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoadRecord {
    #[serde(deserialize_with = "lenient::text")]
    pub time: String,
    #[serde(deserialize_with = "lenient::float")]
    pub cpu: f64,
    #[serde(deserialize_with = "lenient::unsigned")]
    pub ram: u64,
    #[serde(deserialize_with = "lenient::unsigned")]
    pub ram_total: u64,
    #[serde(deserialize_with = "lenient::unsigned")]
    pub disk: u64,
    #[serde(deserialize_with = "lenient::unsigned")]
    pub disk_total: u64,
    #[serde(deserialize_with = "lenient::unsigned")]
    pub net_in: u64,
    #[serde(deserialize_with = "lenient::unsigned")]
    pub net_out: u64,
    #[serde(deserialize_with = "lenient::float")]
    pub load: f64,
    #[serde(deserialize_with = "lenient::unsigned")]
    pub process: u64,
    #[serde(deserialize_with = "lenient::unsigned")]
    pub connections: u64,
}

impl TimedRecord for LoadRecord {
    fn key(&self) -> RecordKey {
        RecordKey::Time(self.time.clone())
    }

    fn raw_time(&self) -> &str {
        &self.time
    }
}

/// Latency probe sample
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PingRecord {
    #[serde(deserialize_with = "lenient::unsigned")]
    pub task_id: u64,
    #[serde(deserialize_with = "lenient::text")]
    pub time: String,
    /// Round trip in milliseconds, negative when the probe was lost
    #[serde(deserialize_with = "lenient::float")]
    pub value: f64,
}

impl PingRecord {
    /// True if the probe got no answer
    #[must_use]
    pub fn is_lost(&self) -> bool {
        self.value < 0.0
    }
}

impl TimedRecord for PingRecord {
    fn key(&self) -> RecordKey {
        RecordKey::Task(self.task_id, self.time.clone())
    }

    fn raw_time(&self) -> &str {
        &self.time
    }
}

/// Latency probe definition
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PingTask {
    #[serde(deserialize_with = "lenient::unsigned")]
    pub id: u64,
    #[serde(deserialize_with = "lenient::text")]
    pub name: String,
    /// Probe interval in seconds
    #[serde(deserialize_with = "lenient::unsigned")]
    pub interval: u64,
}

/// Response of `getRecords`
#[derive(Clone, Debug, Deserialize)]
#[serde(bound(deserialize = "R: DeserializeOwned"))]
pub struct RecordsPage<R> {
    #[serde(default = "Vec::new")]
    pub records: Vec<R>,
    #[serde(default)]
    pub tasks: Vec<PingTask>,
}
