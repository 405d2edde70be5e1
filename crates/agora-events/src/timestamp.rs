//! Virtual Time Types
//!
//! A virtual day is a compressed window that drives daily quotas and
//! rumination. It is a plain counter: day 0 starts at the clock epoch
//! when compression is on, or at the Unix epoch in the configured UTC
//! offset when compression is off.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Index of a virtual day.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct VirtualDay(pub u64);

impl VirtualDay {
    pub fn next(self) -> Self {
        VirtualDay(self.0 + 1)
    }

    /// The previous day, or `None` on day 0.
    pub fn prev(self) -> Option<Self> {
        self.0.checked_sub(1).map(VirtualDay)
    }
}

impl fmt::Display for VirtualDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "day_{}", self.0)
    }
}

impl FromStr for VirtualDay {
    type Err = String;

    /// Parses `day_N` or a bare `N`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("day_").unwrap_or(s);
        digits
            .parse::<u64>()
            .map(VirtualDay)
            .map_err(|_| format!("invalid virtual day: '{}'", s))
    }
}

/// One reading of the virtual clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockReading {
    /// Wall-clock time of the reading.
    pub real_ts: DateTime<Utc>,
    pub virtual_day: VirtualDay,
    /// Position inside the virtual day.
    pub virtual_offset: Duration,
}
