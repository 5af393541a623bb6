//! Rate model: turns a human readable ceiling into a drip rate and capacity.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{LimiterError, Result};

/// Reference period a rate ceiling is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    /// Per-second ceiling
    Second,
    /// Per-minute ceiling
    Minute,
    /// Per-hour ceiling
    Hour,
    /// Per-day ceiling
    Day,
    /// Per-week ceiling
    Week,
    /// Per-month ceiling (52 weeks / 12)
    Month,
}

impl TimeUnit {
    /// Length of this unit in whole seconds.
    pub fn seconds(&self) -> u64 {
        match self {
            TimeUnit::Second => 1,
            TimeUnit::Minute => 60,
            TimeUnit::Hour => 3_600,
            TimeUnit::Day => 86_400,
            TimeUnit::Week => 604_800,
            TimeUnit::Month => (604_800 * 52) / 12,
        }
    }

    /// Parse a unit name such as `"second"` or `"hours"`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "s" | "sec" | "secs" | "second" | "seconds" => Some(TimeUnit::Second),
            "min" | "mins" | "minute" | "minutes" => Some(TimeUnit::Minute),
            "h" | "hour" | "hours" => Some(TimeUnit::Hour),
            "d" | "day" | "days" => Some(TimeUnit::Day),
            "w" | "week" | "weeks" => Some(TimeUnit::Week),
            "month" | "months" => Some(TimeUnit::Month),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            TimeUnit::Second => "second",
            TimeUnit::Minute => "minute",
            TimeUnit::Hour => "hour",
            TimeUnit::Day => "day",
            TimeUnit::Week => "week",
            TimeUnit::Month => "month",
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An immutable rate ceiling, e.g. "5 per second".
///
/// With burst allowed the bucket may fill to the full ceiling at once and is
/// throttled afterwards. Without burst the ceiling is reshaped into a uniform
/// drip: a capacity of one unit admitted at most once per
/// `time_unit / requested_capacity` seconds. Both shapes have the same
/// throughput.
#[derive(Debug, Clone, PartialEq)]
pub struct Rate {
    requested_capacity: f64,
    unit: Option<TimeUnit>,
    time_unit_seconds: f64,
    allow_burst: bool,
    capacity: f64,
    period: f64,
}

impl Rate {
    /// Create a rate of `capacity` per `unit`.
    pub fn new(capacity: f64, unit: TimeUnit, allow_burst: bool) -> Result<Self> {
        let mut rate = Self::per_seconds(capacity, unit.seconds() as f64, allow_burst)?;
        rate.unit = Some(unit);
        Ok(rate)
    }

    /// Create a rate of `capacity` per arbitrary period of `seconds`.
    pub fn per_seconds(capacity: f64, seconds: f64, allow_burst: bool) -> Result<Self> {
        if !capacity.is_finite() || capacity <= 0.0 {
            return Err(LimiterError::InvalidArgument(format!(
                "rate capacity must be a positive number, got {}",
                capacity
            )));
        }
        if !seconds.is_finite() || seconds <= 0.0 {
            return Err(LimiterError::InvalidArgument(format!(
                "rate time unit must be a positive number of seconds, got {}",
                seconds
            )));
        }

        let (effective_capacity, effective_period) = if allow_burst {
            (capacity, seconds)
        } else {
            (1.0, 1.0 / (capacity / seconds))
        };

        Ok(Self {
            requested_capacity: capacity,
            unit: None,
            time_unit_seconds: seconds,
            allow_burst,
            capacity: effective_capacity,
            period: effective_period,
        })
    }

    /// The ceiling as given by the caller.
    pub fn requested_capacity(&self) -> f64 {
        self.requested_capacity
    }

    /// The named unit, if the rate was built from one.
    pub fn unit(&self) -> Option<TimeUnit> {
        self.unit
    }

    pub fn time_unit_seconds(&self) -> f64 {
        self.time_unit_seconds
    }

    pub fn allow_burst(&self) -> bool {
        self.allow_burst
    }

    /// Effective bucket capacity after burst reshaping.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Effective period in seconds after burst reshaping.
    pub fn period(&self) -> f64 {
        self.period
    }

    /// Units drained from the bucket per second.
    pub fn rate_per_second(&self) -> f64 {
        self.capacity / self.period
    }

    /// Ordering used by the limiter: finer units first, then smaller capacities.
    pub(crate) fn cmp_for_limiter(&self, other: &Rate) -> Ordering {
        self.time_unit_seconds
            .total_cmp(&other.time_unit_seconds)
            .then(self.capacity.total_cmp(&other.capacity))
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unit {
            Some(unit) => write!(f, "{} / {}", self.requested_capacity, unit)?,
            None => write!(f, "{} / {}s", self.requested_capacity, self.time_unit_seconds)?,
        }
        write!(f, " ({} per second)", self.rate_per_second())
    }
}
