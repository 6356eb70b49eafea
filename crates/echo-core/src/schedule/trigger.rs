//! Trigger windows and dedup keys.
//!
//! All computations are pure functions of a local wall-clock time so they
//! can be tested without a running scheduler.

use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::warn;

use crate::config::{config_minutes, config_secs, ScheduleConfig};

/// Dedup key used by one-shot schedules.
pub const ONCE_KEY: &str = "once";

/// Recurrence class of a schedule.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(from = "String", into = "String")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Frequency {
    /// Every day at HH:MM.
    #[default]
    Daily,
    /// Every hour at :MM.
    Hourly,
    /// Once a week on a weekday at HH:MM.
    Weekly,
    /// A single send at the next HH:MM.
    Once,
}

impl From<String> for Frequency {
    fn from(raw: String) -> Self {
        raw.trim().parse().unwrap_or_else(|_| {
            warn!(value = %raw, "Unrecognized schedule frequency, using daily");
            Frequency::Daily
        })
    }
}

impl From<Frequency> for String {
    fn from(frequency: Frequency) -> Self {
        frequency.to_string()
    }
}

/// Resolved schedule parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerSpec {
    pub frequency: Frequency,
    /// Trigger time; only the minute is used for hourly schedules.
    pub time: NaiveTime,
    /// Only used for weekly schedules.
    pub weekday: Weekday,
    /// Window after the instant that counts as on time.
    pub on_time: Duration,
    /// Window after the instant during which a missed run is caught up.
    pub grace: Duration,
}

impl TriggerSpec {
    pub fn new(frequency: Frequency, time: NaiveTime) -> Self {
        Self {
            frequency,
            time,
            weekday: Weekday::Mon,
            on_time: Duration::seconds(60),
            grace: Duration::minutes(30),
        }
    }

    pub fn with_weekday(mut self, weekday: Weekday) -> Self {
        self.weekday = weekday;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Resolve a schedule configuration. Malformed values fall back with a warning.
    pub fn from_config(config: &ScheduleConfig) -> Self {
        Self {
            frequency: config.frequency,
            time: config.trigger_time(),
            weekday: config.trigger_weekday(),
            on_time: config_secs(config.on_time_secs),
            grace: config_minutes(config.grace_minutes),
        }
    }

    /// Most recent theoretical instant at or before `now`.
    pub fn latest_instant(&self, now: NaiveDateTime) -> NaiveDateTime {
        match self.frequency {
            Frequency::Daily | Frequency::Once => {
                let today = now.date().and_time(self.time);
                if today > now {
                    today - Duration::days(1)
                } else {
                    today
                }
            }
            Frequency::Hourly => {
                let this_hour = hour_slot(now, self.time.minute());
                if this_hour > now {
                    this_hour - Duration::hours(1)
                } else {
                    this_hour
                }
            }
            Frequency::Weekly => {
                let back = days_between(self.weekday, now.weekday());
                let candidate = (now.date() - Duration::days(back)).and_time(self.time);
                if candidate > now {
                    candidate - Duration::days(7)
                } else {
                    candidate
                }
            }
        }
    }

    /// First theoretical instant strictly after `now`.
    pub fn next_instant(&self, now: NaiveDateTime) -> NaiveDateTime {
        self.latest_instant(now) + self.period()
    }

    fn period(&self) -> Duration {
        match self.frequency {
            Frequency::Daily | Frequency::Once => Duration::days(1),
            Frequency::Hourly => Duration::hours(1),
            Frequency::Weekly => Duration::days(7),
        }
    }
}

fn hour_slot(now: NaiveDateTime, minute: u32) -> NaiveDateTime {
    let time = NaiveTime::from_hms_opt(now.hour(), minute, 0).unwrap_or_else(|| now.time());
    now.date().and_time(time)
}

/// Days to go back from `current` to reach `target`.
fn days_between(target: Weekday, current: Weekday) -> i64 {
    let t = target.num_days_from_monday() as i64;
    let c = current.num_days_from_monday() as i64;
    (c - t).rem_euclid(7)
}

/// Dedup bucket of a theoretical instant.
pub fn trigger_key(frequency: Frequency, instant: NaiveDateTime) -> String {
    match frequency {
        Frequency::Daily => instant.format("%Y-%m-%d").to_string(),
        Frequency::Hourly => instant.format("%Y-%m-%d %H").to_string(),
        Frequency::Weekly => instant.format("%G-W%V").to_string(),
        Frequency::Once => ONCE_KEY.to_string(),
    }
}

/// Whether a send is due now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerState {
    /// Inside the on-time window of `instant`.
    OnTime { instant: NaiveDateTime, key: String },
    /// Missed the on-time window but still inside the grace period.
    Compensated {
        instant: NaiveDateTime,
        key: String,
        late_by: Duration,
    },
    /// Nothing due.
    Idle,
}

impl TriggerState {
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::OnTime { key, .. } | Self::Compensated { key, .. } => Some(key),
            Self::Idle => None,
        }
    }

    pub fn is_due(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// Classify `now` against the most recent instant of `spec`.
///
/// The grace period is measured from the instant, so a run is caught up
/// while `on_time <= elapsed <= grace` and dropped after that.
pub fn evaluate_trigger(now: NaiveDateTime, spec: &TriggerSpec) -> TriggerState {
    let instant = spec.latest_instant(now);
    let elapsed = now - instant;
    let key = trigger_key(spec.frequency, instant);
    if elapsed < spec.on_time {
        TriggerState::OnTime { instant, key }
    } else if elapsed <= spec.grace {
        TriggerState::Compensated {
            instant,
            key,
            late_by: elapsed,
        }
    } else {
        TriggerState::Idle
    }
}

/// Whole seconds until the next instant strictly after `now`.
pub fn seconds_until_next_trigger(now: NaiveDateTime, spec: &TriggerSpec) -> u64 {
    let wait = spec.next_instant(now) - now;
    wait.num_seconds().max(0) as u64
}
