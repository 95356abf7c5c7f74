//!
//! Merging of cached and freshly fetched samples.
//!
use crate::types::{RecordKey, TimedRecord};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Start of the retention window, saturating at the earliest representable
/// time
#[must_use]
pub fn window_start(range_hours: u32, now: DateTime<Utc>) -> DateTime<Utc> {
    now.checked_sub_signed(Duration::hours(i64::from(range_hours)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Combine `old` and `new`, deduplicated by record key with `new` winning
/// on collision, dropping everything older than `now - range_hours` and
/// everything without a parsable timestamp. The result is not sorted.
pub fn merge_records<R: TimedRecord>(
    old: &[R],
    new: &[R],
    range_hours: u32,
    now: DateTime<Utc>,
) -> Vec<R> {
    let cutoff = window_start(range_hours, now);
    let mut merged: HashMap<RecordKey, R> = HashMap::with_capacity(old.len() + new.len());
    for record in old.iter().chain(new) {
        merged.insert(record.key(), record.clone());
    }
    merged
        .into_values()
        .filter(|r| r.time().is_some_and(|t| t >= cutoff))
        .collect()
}

/// Sort ascending by timestamp
pub fn sort_records<R: TimedRecord>(records: &mut [R]) {
    records.sort_by_cached_key(|r| r.time());
}
