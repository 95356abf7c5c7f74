//!
//! Uptime from presence of load samples per time slot.
//!
use super::merge::window_start;
use super::MAX_RANGE_HOURS;
use crate::types::TimedRecord;
use chrono::{DateTime, Duration, Utc};

/// State of one slot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// At least one sample inside the slot
    Online,
    /// No sample inside the slot
    Offline,
    /// Slot starts in the future. Never produced for the trailing window
    /// used by [`compute_uptime`], whose slots all start before `now`.
    Unknown,
}

/// One slot of the retention window
#[derive(Clone, Debug, PartialEq)]
pub struct UptimeSlot {
    pub start: DateTime<Utc>,
    pub state: SlotState,
}

/// Uptime over a retention window
#[derive(Clone, Debug, PartialEq)]
pub struct UptimeSummary {
    /// Width of every slot
    pub slot_hours: u32,
    pub slots: Vec<UptimeSlot>,
    pub online: usize,
    pub offline: usize,
    /// `online / (online + offline) * 100`, unknown slots excluded; 0 when
    /// no slot is known
    pub uptime_percent: f64,
}

/// Slot width for a range: 1 h up to a day, 6 h up to a week, else 24 h
#[must_use]
pub fn slot_hours(range_hours: u32) -> u32 {
    match range_hours {
        0..=24 => 1,
        25..=168 => 6,
        _ => 24,
    }
}

/// Bucket the window `[now - range_hours, now]` into slots and mark each
/// one by whether any record falls inside it. Ranges above
/// [`MAX_RANGE_HOURS`] are clamped.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn compute_uptime<R: TimedRecord>(
    records: &[R],
    range_hours: u32,
    now: DateTime<Utc>,
) -> UptimeSummary {
    let range_hours = range_hours.min(MAX_RANGE_HOURS);
    let width = slot_hours(range_hours);
    let count = range_hours.div_ceil(width).max(1) as usize;
    let start = window_start(range_hours, now);
    let slot_secs = i64::from(width) * 3600;

    let mut seen = vec![false; count];
    for time in records.iter().filter_map(|r| r.time()) {
        if time < start || time > now {
            continue;
        }
        let index = ((time - start).num_seconds() / slot_secs) as usize;
        seen[index.min(count - 1)] = true;
    }

    let slots: Vec<UptimeSlot> = seen
        .iter()
        .enumerate()
        .map(|(i, seen)| {
            let slot_start = start + Duration::hours(i64::from(width) * i as i64);
            let state = if slot_start > now {
                SlotState::Unknown
            } else if *seen {
                SlotState::Online
            } else {
                SlotState::Offline
            };
            UptimeSlot {
                start: slot_start,
                state,
            }
        })
        .collect();

    let online = slots.iter().filter(|s| s.state == SlotState::Online).count();
    let offline = slots.iter().filter(|s| s.state == SlotState::Offline).count();
    let known = online + offline;
    let uptime_percent = if known == 0 {
        0.0
    } else {
        online as f64 / known as f64 * 100.0
    };

    UptimeSummary {
        slot_hours: width,
        slots,
        online,
        offline,
        uptime_percent,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::LoadRecord;

    fn at(time: DateTime<Utc>) -> LoadRecord {
        LoadRecord {
            time: time.to_rfc3339(),
            ..Default::default()
        }
    }

    #[test]
    fn slot_widths() {
        assert_eq!(slot_hours(1), 1);
        assert_eq!(slot_hours(24), 1);
        assert_eq!(slot_hours(25), 6);
        assert_eq!(slot_hours(168), 6);
        assert_eq!(slot_hours(720), 24);
    }

    #[test]
    fn trailing_window_has_no_unknown_slots() {
        let now: DateTime<Utc> = "2025-03-02T00:00:00Z".parse().unwrap();
        for range in [1, 24, 25, 168, 720] {
            let summary = compute_uptime(&[at(now)], range, now);
            assert!(summary.slots.iter().all(|s| s.start <= now));
            assert!(summary.slots.iter().all(|s| s.state != SlotState::Unknown));
            assert_eq!(summary.online + summary.offline, summary.slots.len());
        }
    }

    #[test]
    fn oversized_range_is_clamped() {
        let now: DateTime<Utc> = "2025-03-02T00:00:00Z".parse().unwrap();
        let summary = compute_uptime(&[at(now)], u32::MAX, now);
        assert_eq!(summary.slot_hours, 24);
        assert_eq!(summary.slots.len(), (MAX_RANGE_HOURS / 24) as usize);
        assert_eq!(summary.online, 1);
    }

    #[test]
    fn hourly_slots_over_a_day() {
        let now: DateTime<Utc> = "2025-03-02T00:00:00Z".parse().unwrap();
        let start = now - Duration::hours(24);
        let records: Vec<_> = [0, 1, 5]
            .iter()
            .map(|h| at(start + Duration::hours(*h) + Duration::minutes(10)))
            .collect();

        let summary = compute_uptime(&records, 24, now);
        assert_eq!(summary.slots.len(), 24);
        for (i, slot) in summary.slots.iter().enumerate() {
            let expected = if [0, 1, 5].contains(&i) {
                SlotState::Online
            } else {
                SlotState::Offline
            };
            assert_eq!(slot.state, expected, "slot {i}");
        }
        assert_eq!(summary.online, 3);
        assert_eq!(summary.offline, 21);
        assert!((summary.uptime_percent - 12.5).abs() < 1e-9);
    }

    #[test]
    fn weekly_range_uses_six_hour_slots() {
        let now: DateTime<Utc> = "2025-03-08T00:00:00Z".parse().unwrap();
        let summary = compute_uptime(&[at(now)], 168, now);
        assert_eq!(summary.slot_hours, 6);
        assert_eq!(summary.slots.len(), 28);
        assert_eq!(summary.slots[27].state, SlotState::Online);
        assert_eq!(summary.online, 1);
    }

    #[test]
    fn no_records_means_zero_uptime() {
        let now: DateTime<Utc> = "2025-03-08T00:00:00Z".parse().unwrap();
        let summary = compute_uptime::<LoadRecord>(&[], 720, now);
        assert_eq!(summary.slots.len(), 30);
        assert_eq!(summary.offline, 30);
        assert!(summary.uptime_percent.abs() < f64::EPSILON);
    }
}
