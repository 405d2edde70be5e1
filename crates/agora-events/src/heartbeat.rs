//! Scheduler Heartbeat
//!
//! Persisted liveness record, readable by processes that do not share
//! memory with the scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub run_id: Uuid,
    pub state: RunState,
    pub interval_secs: f64,
    #[serde(default)]
    pub last_tick_id: Option<u64>,
    #[serde(default)]
    pub last_tick_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Heartbeat {
    pub fn started(run_id: Uuid, interval_secs: f64, now: DateTime<Utc>) -> Self {
        Self {
            run_id,
            state: RunState::Running,
            interval_secs,
            last_tick_id: None,
            last_tick_at: None,
            updated_at: now,
        }
    }

    /// True when the record claims to be running but has not been
    /// refreshed for longer than `grace_intervals` tick intervals.
    pub fn is_stale(&self, now: DateTime<Utc>, grace_intervals: f64) -> bool {
        if self.state != RunState::Running {
            return false;
        }
        let age = (now - self.updated_at).num_milliseconds() as f64 / 1000.0;
        age > self.interval_secs * grace_intervals
    }
}
