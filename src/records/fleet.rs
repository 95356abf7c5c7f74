//!
//! Fleet-wide uptime average over the most recent summary of every node.
//!
use super::{LoadSeries, TimeSeriesAssembler};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Latest uptime percentage per node, shared between clones
#[derive(Clone, Debug, Default)]
pub struct FleetUptime {
    percent: Arc<Mutex<HashMap<String, f64>>>,
}

impl FleetUptime {
    /// Create an empty aggregate
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest uptime of a node, replacing the previous one
    pub fn record(&self, id: &str, uptime_percent: f64) {
        self.percent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), uptime_percent);
    }

    /// Forget a node
    pub fn forget(&self, id: &str) -> bool {
        self.percent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
    }

    /// Forget every node, e.g. after the range changed
    pub fn clear(&self) {
        self.percent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of nodes contributing
    #[must_use]
    pub fn len(&self) -> usize {
        self.percent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True if no node has reported
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mean uptime over every recorded node
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn average(&self) -> Option<f64> {
        let percent = self.percent.lock().unwrap_or_else(PoisonError::into_inner);
        if percent.is_empty() {
            return None;
        }
        Some(percent.values().sum::<f64>() / percent.len() as f64)
    }

    /// Feed every summary recomputed by `assembler` into this aggregate,
    /// forgetting all nodes whenever its cache is dropped
    pub fn attach(&self, assembler: &TimeSeriesAssembler<LoadSeries>) {
        let fleet = self.clone();
        assembler.on_result(move |id, summary| fleet.record(id, summary.uptime_percent));
        let fleet = self.clone();
        assembler.on_clear(move || fleet.clear());
    }
}
