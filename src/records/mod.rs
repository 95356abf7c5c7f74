//!
//! Long-range time series assembled from incremental fetches.
//!
//! Each [`TimeSeriesAssembler`] caches one logical series (load or ping)
//! per node for a single active range. Refreshes only fetch the hours
//! elapsed since the previous fetch and merge them into the cached
//! samples; aggregates are recomputed from the merged set every time.
//!
use crate::types::{LoadRecord, PingRecord, PingTask, SeriesKind, TimedRecord};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

mod assembler;
mod fleet;
pub mod merge;
pub mod ping;
pub mod uptime;

pub use assembler::{Reporter, TimeSeriesAssembler};
pub use fleet::FleetUptime;
pub use merge::merge_records;
pub use ping::PingSummary;
pub use uptime::{compute_uptime, UptimeSummary};

/// A logical series and the aggregate computed over it
pub trait Series: Send + Sync + 'static {
    /// Series requested from `getRecords`
    const KIND: SeriesKind;
    /// Sample type
    type Record: TimedRecord;
    /// Aggregate over the retention window
    type Summary: Clone + std::fmt::Debug + Send + Sync + 'static;

    /// Compute the aggregate from merged, sorted samples
    fn summarize(
        records: &[Self::Record],
        tasks: &[PingTask],
        range_hours: u32,
        now: DateTime<Utc>,
    ) -> Self::Summary;
}

/// Load samples, summarized as uptime
#[derive(Debug)]
pub struct LoadSeries;

impl Series for LoadSeries {
    const KIND: SeriesKind = SeriesKind::Load;
    type Record = LoadRecord;
    type Summary = UptimeSummary;

    fn summarize(
        records: &[LoadRecord],
        _tasks: &[PingTask],
        range_hours: u32,
        now: DateTime<Utc>,
    ) -> UptimeSummary {
        compute_uptime(records, range_hours, now)
    }
}

/// Ping samples, summarized as latency statistics
#[derive(Debug)]
pub struct PingSeries;

impl Series for PingSeries {
    const KIND: SeriesKind = SeriesKind::Ping;
    type Record = PingRecord;
    type Summary = PingSummary;

    fn summarize(
        records: &[PingRecord],
        tasks: &[PingTask],
        _range_hours: u32,
        _now: DateTime<Utc>,
    ) -> PingSummary {
        ping::summarize(records, tasks)
    }
}

/// Merged samples and aggregate of one node
#[derive(Debug)]
pub struct TimeSeriesResult<S: Series> {
    /// Node id
    pub node: String,
    pub range_hours: u32,
    /// Samples inside the window, oldest first
    pub records: Vec<S::Record>,
    /// Probe tasks, empty for load series
    pub tasks: Vec<PingTask>,
    pub summary: S::Summary,
    /// When the samples were last fetched
    pub fetched_at: DateTime<Utc>,
}

/// Longest supported range, one leap year
pub const MAX_RANGE_HOURS: u32 = 24 * 366;

/// Reject ranges outside `1..=MAX_RANGE_HOURS`
pub fn check_range(range_hours: u32) -> Result<u32> {
    if (1..=MAX_RANGE_HOURS).contains(&range_hours) {
        Ok(range_hours)
    } else {
        Err(Error::General(format!(
            "range of {range_hours}h outside 1..={MAX_RANGE_HOURS}h"
        )))
    }
}

/// Source of the current time
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// [`TimeSeriesAssembler`] options
#[derive(Clone, Copy, Debug)]
pub struct RecordsOptions {
    /// Range used until another one is requested
    pub range_hours: u32,
    /// Entries younger than this are served without a fetch
    pub refetch_after: Duration,
    /// Entries younger than this are refreshed with a delta fetch,
    /// older ones with a fetch of the whole range
    pub incremental_window: Duration,
    /// Background refresh cadence for visible nodes
    pub refresh_interval: Duration,
}

impl Default for RecordsOptions {
    fn default() -> Self {
        Self {
            range_hours: 24,
            refetch_after: Duration::from_secs(60),
            incremental_window: Duration::from_secs(30 * 60),
            refresh_interval: Duration::from_secs(120),
        }
    }
}

/// Hours to fetch to cover `elapsed` since the previous fetch, capped at
/// the range
#[must_use]
pub fn delta_hours(elapsed: Duration, range_hours: u32) -> u32 {
    let hours = elapsed.as_secs().div_ceil(3600) + 1;
    u32::try_from(hours).unwrap_or(u32::MAX).min(range_hours.max(1))
}
