//!
//! Live status reports
//!
use super::lenient;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};

/// CPU group of a raw report
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawCpu {
    #[serde(deserialize_with = "lenient::number")]
    pub usage: Option<f64>,
}

/// Used/total pair of a raw report
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawUsage {
    #[serde(deserialize_with = "lenient::number")]
    pub total: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub used: Option<f64>,
}

/// Load averages of a raw report
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawLoad {
    #[serde(deserialize_with = "lenient::number")]
    pub load1: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub load5: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub load15: Option<f64>,
}

/// Network group of a raw report
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawNetwork {
    #[serde(deserialize_with = "lenient::number")]
    pub up: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub down: Option<f64>,
    #[serde(alias = "total_up", deserialize_with = "lenient::number")]
    pub total_up: Option<f64>,
    #[serde(alias = "total_down", deserialize_with = "lenient::number")]
    pub total_down: Option<f64>,
}

/// Connection counts of a raw report
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawConnections {
    #[serde(deserialize_with = "lenient::number")]
    pub tcp: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub udp: Option<f64>,
}

/// Status report as received, every field optional
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawStatus {
    #[serde(deserialize_with = "lenient::group")]
    pub cpu: RawCpu,
    #[serde(deserialize_with = "lenient::group")]
    pub ram: RawUsage,
    #[serde(deserialize_with = "lenient::group")]
    pub swap: RawUsage,
    #[serde(deserialize_with = "lenient::group")]
    pub disk: RawUsage,
    #[serde(deserialize_with = "lenient::group")]
    pub load: RawLoad,
    #[serde(deserialize_with = "lenient::group")]
    pub network: RawNetwork,
    #[serde(deserialize_with = "lenient::group")]
    pub connections: RawConnections,
    #[serde(deserialize_with = "lenient::number")]
    pub uptime: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub process: Option<f64>,
    #[serde(deserialize_with = "lenient::opt_text")]
    pub message: Option<String>,
    #[serde(deserialize_with = "lenient::timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Response of `getNodesLatestStatus`
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct LatestStatus {
    /// Ids of every node currently reporting
    pub online: HashSet<String>,
    /// Latest report per node id
    pub data: HashMap<String, RawStatus>,
}

/// Used/total pair
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Usage {
    pub total: u64,
    pub used: u64,
}

impl Usage {
    /// Used share of total, 0 when total is 0
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.used as f64 / self.total as f64 * 100.0
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LoadAverage {
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
}

/// Throughput in bytes per second, totals in bytes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Network {
    pub up: u64,
    pub down: u64,
    pub total_up: u64,
    pub total_down: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Connections {
    pub tcp: u64,
    pub udp: u64,
}

/// Normalized status of one node. Every numeric field is concrete: values
/// missing from the report are 0.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatusRecord {
    /// CPU usage in percent
    pub cpu: f64,
    pub ram: Usage,
    pub swap: Usage,
    pub disk: Usage,
    pub load: LoadAverage,
    pub network: Network,
    pub connections: Connections,
    /// Seconds since boot
    pub uptime: u64,
    /// Number of processes
    pub process: u64,
    pub message: String,
    pub updated_at: Option<DateTime<Utc>>,
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn count(v: Option<f64>) -> u64 {
    v.filter(|f| *f > 0.0).map_or(0, |f| f as u64)
}

fn usage(raw: &RawUsage) -> Usage {
    Usage {
        total: count(raw.total),
        used: count(raw.used),
    }
}

impl From<&RawStatus> for StatusRecord {
    fn from(raw: &RawStatus) -> Self {
        Self {
            cpu: raw.cpu.usage.unwrap_or(0.0),
            ram: usage(&raw.ram),
            swap: usage(&raw.swap),
            disk: usage(&raw.disk),
            load: LoadAverage {
                load1: raw.load.load1.unwrap_or(0.0),
                load5: raw.load.load5.unwrap_or(0.0),
                load15: raw.load.load15.unwrap_or(0.0),
            },
            network: Network {
                up: count(raw.network.up),
                down: count(raw.network.down),
                total_up: count(raw.network.total_up),
                total_down: count(raw.network.total_down),
            },
            connections: Connections {
                tcp: count(raw.connections.tcp),
                udp: count(raw.connections.udp),
            },
            uptime: count(raw.uptime),
            process: count(raw.process),
            message: raw.message.clone().unwrap_or_default(),
            updated_at: raw.updated_at,
        }
    }
}

impl StatusRecord {
    /// Memory usage in percent
    #[must_use]
    pub fn ram_percent(&self) -> f64 {
        self.ram.percent()
    }

    #[must_use]
    pub fn swap_percent(&self) -> f64 {
        self.swap.percent()
    }

    #[must_use]
    pub fn disk_percent(&self) -> f64 {
        self.disk.percent()
    }
}

/// Scalar extracted from a status report for sparklines
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SampleField {
    /// CPU usage in percent
    #[default]
    Cpu,
    /// Memory usage in percent
    Ram,
    /// One minute load average
    Load,
    /// Inbound throughput
    NetIn,
    /// Outbound throughput
    NetOut,
}

impl SampleField {
    /// Read this field from a normalized record
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn read(self, record: &StatusRecord) -> f64 {
        match self {
            Self::Cpu => record.cpu,
            Self::Ram => record.ram.percent(),
            Self::Load => record.load.load1,
            Self::NetIn => record.network.down as f64,
            Self::NetOut => record.network.up as f64,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn normalize(json: &str) -> StatusRecord {
        let raw: RawStatus = serde_json::from_str(json).unwrap();
        StatusRecord::from(&raw)
    }

    #[test]
    fn missing_total_up_defaults_to_zero() {
        let record = normalize(r#"{"network":{"up":10,"down":20,"totalDown":5}}"#);
        assert_eq!(record.network.total_up, 0);
        assert_eq!(record.network.total_down, 5);
        assert_eq!(record.network.up, 10);
    }

    #[test]
    fn empty_report_is_all_zero() {
        assert_eq!(normalize("{}"), StatusRecord::default());
        assert_eq!(
            normalize(r#"{"cpu":null,"ram":"bogus","load":{"load1":"NaN"}}"#),
            StatusRecord::default()
        );
    }

    #[test]
    fn snake_case_totals_are_accepted() {
        let record = normalize(r#"{"network":{"total_up":7}}"#);
        assert_eq!(record.network.total_up, 7);
    }

    #[test]
    fn equal_reports_compare_equal() {
        let json = r#"{"cpu":{"usage":12.5},"ram":{"total":100,"used":25},"message":"ok"}"#;
        assert_eq!(normalize(json), normalize(json));
        let record = normalize(json);
        assert!((record.ram_percent() - 25.0).abs() < f64::EPSILON);
        assert!(record.swap_percent().abs() < f64::EPSILON);
        assert_ne!(normalize(json), normalize(r#"{"cpu":{"usage":12.6}}"#));
    }

    #[test]
    fn sample_fields() {
        let record = normalize(r#"{"cpu":{"usage":3},"network":{"up":1,"down":2}}"#);
        assert!((SampleField::Cpu.read(&record) - 3.0).abs() < f64::EPSILON);
        assert!((SampleField::NetIn.read(&record) - 2.0).abs() < f64::EPSILON);
        assert!((SampleField::Ram.read(&record)).abs() < f64::EPSILON);
    }
}
