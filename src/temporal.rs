//! Calendar and time-of-day features derived from the parsed order timestamps.

use chrono::{Datelike, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};

use crate::canonical::CanonicalRecord;
use crate::config::{BinLabel, Bins};

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeOfDay {
    AfterMidnight,
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeOfDay {
    pub const ALL: [TimeOfDay; 5] = [
        Self::AfterMidnight,
        Self::Morning,
        Self::Afternoon,
        Self::Evening,
        Self::Night,
    ];
}

impl BinLabel for TimeOfDay {
    fn as_str(self) -> &'static str {
        match self {
            Self::AfterMidnight => "after_midnight",
            Self::Morning => "morning",
            Self::Afternoon => "afternoon",
            Self::Evening => "evening",
            Self::Night => "night",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemporalFeatures {
    pub order_day: Option<u32>,
    pub order_month: Option<u32>,
    pub order_day_of_week: Option<String>,
    pub is_weekend: Option<u8>,
    pub pickup_time_minutes: Option<f64>,
    pub order_time_hour: Option<u32>,
    pub order_time_of_day: Option<TimeOfDay>,
}

pub fn derive_temporal(record: &CanonicalRecord, bins: &Bins<TimeOfDay>) -> TemporalFeatures {
    let date = record.order_date;
    let order_time_hour = record.order_time.map(|t| t.hour());

    TemporalFeatures {
        order_day: date.map(|d| d.day()),
        order_month: date.map(|d| d.month()),
        order_day_of_week: date.map(|d| d.format("%A").to_string().to_lowercase()),
        is_weekend: date.map(|d| u8::from(matches!(d.weekday(), Weekday::Sat | Weekday::Sun))),
        pickup_time_minutes: match (record.order_time, record.order_picked_time) {
            (Some(ordered), Some(picked)) => Some(pickup_minutes(ordered, picked)),
            _ => None,
        },
        order_time_hour,
        order_time_of_day: order_time_hour.and_then(|hour| bins.assign(f64::from(hour))),
    }
}

/// Minutes from order to pickup on the time-of-day clock, wrapped into `[0, 1440)`.
///
/// Sub-second components are ignored.
pub fn pickup_minutes(ordered: NaiveTime, picked: NaiveTime) -> f64 {
    let ordered_s = i64::from(ordered.num_seconds_from_midnight());
    let picked_s = i64::from(picked.num_seconds_from_midnight());
    (picked_s - ordered_s).rem_euclid(SECONDS_PER_DAY) as f64 / 60.0
}
