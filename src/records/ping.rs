//!
//! Latency statistics per probe task.
//!
use crate::types::{PingRecord, PingTask};
use std::collections::BTreeMap;

/// Latency of answered probes, milliseconds
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Latency {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Statistics over a set of probes
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PingStats {
    /// Probes sent
    pub samples: usize,
    /// Probes without an answer
    pub lost: usize,
    pub loss_percent: f64,
    /// `None` if no probe was answered
    pub latency: Option<Latency>,
}

/// Statistics of one probe task
#[derive(Clone, Debug, PartialEq)]
pub struct TaskPing {
    pub task: PingTask,
    pub stats: PingStats,
}

/// Latency summary of one node
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PingSummary {
    /// Ordered by task id
    pub tasks: Vec<TaskPing>,
    /// Every task together
    pub overall: PingStats,
}

/// Nearest-rank percentile of sorted values
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = (p / 100.0 * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Statistics over `records`
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn stats<'a, I: IntoIterator<Item = &'a PingRecord>>(records: I) -> PingStats {
    let mut samples = 0;
    let mut answered: Vec<f64> = Vec::new();
    for record in records {
        samples += 1;
        if !record.is_lost() {
            answered.push(record.value);
        }
    }
    if samples == 0 {
        return PingStats::default();
    }

    let lost = samples - answered.len();
    answered.sort_by(f64::total_cmp);
    let latency = (!answered.is_empty()).then(|| Latency {
        min: answered[0],
        max: answered[answered.len() - 1],
        avg: answered.iter().sum::<f64>() / answered.len() as f64,
        p50: percentile(&answered, 50.0),
        p95: percentile(&answered, 95.0),
        p99: percentile(&answered, 99.0),
    });

    PingStats {
        samples,
        lost,
        loss_percent: lost as f64 / samples as f64 * 100.0,
        latency,
    }
}

/// Per task and overall statistics. Tasks without records are listed with
/// empty statistics; records of unknown tasks get an unnamed task.
#[must_use]
pub fn summarize(records: &[PingRecord], tasks: &[PingTask]) -> PingSummary {
    let mut by_task: BTreeMap<u64, (PingTask, Vec<&PingRecord>)> = tasks
        .iter()
        .map(|t| (t.id, (t.clone(), Vec::new())))
        .collect();
    for record in records {
        by_task
            .entry(record.task_id)
            .or_insert_with(|| {
                (
                    PingTask {
                        id: record.task_id,
                        ..Default::default()
                    },
                    Vec::new(),
                )
            })
            .1
            .push(record);
    }

    PingSummary {
        tasks: by_task
            .into_values()
            .map(|(task, records)| TaskPing {
                task,
                stats: stats(records),
            })
            .collect(),
        overall: stats(records),
    }
}
