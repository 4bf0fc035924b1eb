//! Schedule arithmetic for payouts, lock expiry and commission freezes.
//!
//! Everything here is pure: the caller passes `now`. A month is a fixed
//! 30 days, a year 365, there is no calendar awareness.

use crate::types::Timestamp;
use chrono::{Days, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MILLIS_PER_MINUTE: i64 = 60_000;
pub const MILLIS_PER_HOUR: i64 = 3_600_000;
pub const MILLIS_PER_DAY: i64 = 86_400_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Day,
    Week,
    Month,
}

impl IntervalUnit {
    pub fn days(&self) -> i64 {
        match self {
            IntervalUnit::Day => 1,
            IntervalUnit::Week => 7,
            IntervalUnit::Month => 30,
        }
    }

    pub fn millis(&self) -> i64 {
        self.days() * MILLIS_PER_DAY
    }
}

impl FromStr for IntervalUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(IntervalUnit::Day),
            "week" => Ok(IntervalUnit::Week),
            "month" => Ok(IntervalUnit::Month),
            other => Err(format!("Unknown interval unit: {}", other)),
        }
    }
}

/// Length of `count` units. A zero count is treated as one unit so a
/// schedule can never stall on a zero-length period.
pub fn period_millis(unit: IntervalUnit, count: u32) -> i64 {
    unit.millis() * i64::from(count.max(1))
}

pub fn add_interval(start: Timestamp, unit: IntervalUnit, count: u32) -> Timestamp {
    start.plus_millis(period_millis(unit, count))
}

pub fn add_days(start: Timestamp, days: u32) -> Timestamp {
    start.plus_millis(i64::from(days) * MILLIS_PER_DAY)
}

/// First `anchor + k * period` (k >= 1) that is at or after `now`.
pub fn next_occurrence(anchor: Timestamp, unit: IntervalUnit, count: u32, now: Timestamp) -> Timestamp {
    let period = period_millis(unit, count);
    let first = anchor.plus_millis(period);
    if first >= now {
        return first;
    }
    let behind = now.as_millis() - first.as_millis();
    let steps = (behind + period - 1) / period;
    first.plus_millis(steps * period)
}

/// Boundaries `next_due, next_due + period, ...` that `now` is strictly past.
/// A boundary exactly equal to `now` is not yet elapsed.
pub fn elapsed_boundaries(next_due: Timestamp, period: i64, now: Timestamp) -> Vec<Timestamp> {
    if period <= 0 || next_due >= now {
        return Vec::new();
    }
    let count = (now.as_millis() - next_due.as_millis() - 1) / period + 1;
    (0..count).map(|k| next_due.plus_millis(k * period)).collect()
}

/// Midnight UTC of the day after `ts`.
pub fn start_of_next_utc_day(ts: Timestamp) -> Timestamp {
    let next = ts
        .to_datetime()
        .and_then(|dt| dt.date_naive().checked_add_days(Days::new(1)))
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive).timestamp_millis());
    match next {
        Some(ms) => Timestamp::from_millis(ms),
        // out of chrono's range: fall back to whole-day arithmetic
        None => Timestamp::from_millis((ts.as_millis().div_euclid(MILLIS_PER_DAY) + 1) * MILLIS_PER_DAY),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockState {
    Unlocked,
    Locked { remaining_ms: i64 },
}

impl LockState {
    pub fn at(lock_until: Option<Timestamp>, now: Timestamp) -> Self {
        match lock_until {
            Some(until) if until > now => LockState::Locked {
                remaining_ms: now.millis_until(until),
            },
            _ => LockState::Unlocked,
        }
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, LockState::Locked { .. })
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockState::Unlocked => f.write_str("unlocked"),
            LockState::Locked { remaining_ms } => {
                let days = remaining_ms / MILLIS_PER_DAY;
                let hours = (remaining_ms % MILLIS_PER_DAY) / MILLIS_PER_HOUR;
                let minutes = (remaining_ms % MILLIS_PER_HOUR) / MILLIS_PER_MINUTE;
                if days > 0 {
                    write!(f, "{}d {}h", days, hours)
                } else if hours > 0 {
                    write!(f, "{}h {}m", hours, minutes)
                } else {
                    write!(f, "{}m", minutes.max(1))
                }
            }
        }
    }
}
