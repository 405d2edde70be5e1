//! Tick Records
//!
//! One immutable row per scheduler tick, appended to the telemetry stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::timestamp::VirtualDay;

/// Classified outcome of one agent's pipeline within a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Every external call the agent needed succeeded.
    Ok,
    /// Some calls failed but the agent still completed its path.
    PartialError,
    /// A call failed and the agent resolved cleanly to a skip.
    SkipError,
    /// Unrecoverable failure, e.g. a persistence write.
    Error,
}

impl AgentStatus {
    /// Combines two outcomes, keeping the more severe one.
    pub fn worst(self, other: AgentStatus) -> AgentStatus {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    fn severity(self) -> u8 {
        match self {
            AgentStatus::Ok => 0,
            AgentStatus::PartialError => 1,
            AgentStatus::SkipError => 2,
            AgentStatus::Error => 3,
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentStatus::Ok => write!(f, "ok"),
            AgentStatus::PartialError => write!(f, "partial_error"),
            AgentStatus::SkipError => write!(f, "skip_error"),
            AgentStatus::Error => write!(f, "error"),
        }
    }
}

/// Per-status agent counts for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusCounts {
    pub ok: u32,
    pub partial_error: u32,
    pub skip_error: u32,
    pub error: u32,
}

impl StatusCounts {
    pub fn record(&mut self, status: AgentStatus) {
        match status {
            AgentStatus::Ok => self.ok += 1,
            AgentStatus::PartialError => self.partial_error += 1,
            AgentStatus::SkipError => self.skip_error += 1,
            AgentStatus::Error => self.error += 1,
        }
    }

    pub fn get(&self, status: AgentStatus) -> u32 {
        match status {
            AgentStatus::Ok => self.ok,
            AgentStatus::PartialError => self.partial_error,
            AgentStatus::SkipError => self.skip_error,
            AgentStatus::Error => self.error,
        }
    }

    pub fn total(&self) -> u32 {
        self.ok + self.partial_error + self.skip_error + self.error
    }
}

/// What the population did during one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActionCounts {
    pub posted: u32,
    pub commented: u32,
    pub skipped: u32,
}

/// One row of tick telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickRecord {
    pub tick_id: u64,
    pub real_timestamp: DateTime<Utc>,
    pub virtual_day: VirtualDay,
    pub statuses: StatusCounts,
    #[serde(default)]
    pub actions: ActionCounts,
    /// Rumination steps run this tick.
    #[serde(default)]
    pub ruminations: u32,
    /// Agents still waiting for a rumination slot after this tick.
    #[serde(default)]
    pub rumination_backlog: u32,
    #[serde(default)]
    pub duration_ms: u64,
}

impl TickRecord {
    pub fn new(tick_id: u64, real_timestamp: DateTime<Utc>, virtual_day: VirtualDay) -> Self {
        Self {
            tick_id,
            real_timestamp,
            virtual_day,
            statuses: StatusCounts::default(),
            actions: ActionCounts::default(),
            ruminations: 0,
            rumination_backlog: 0,
            duration_ms: 0,
        }
    }

    /// Number of agents accounted for in this tick.
    pub fn agent_count(&self) -> u32 {
        self.statuses.total()
    }

    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_jsonl(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&AgentStatus::Ok).unwrap(), r#""ok""#);
        assert_eq!(
            serde_json::to_string(&AgentStatus::PartialError).unwrap(),
            r#""partial_error""#
        );
        assert_eq!(
            serde_json::to_string(&AgentStatus::SkipError).unwrap(),
            r#""skip_error""#
        );
    }

    #[test]
    fn test_worst_status() {
        assert_eq!(AgentStatus::Ok.worst(AgentStatus::SkipError), AgentStatus::SkipError);
        assert_eq!(AgentStatus::Error.worst(AgentStatus::PartialError), AgentStatus::Error);
        assert_eq!(AgentStatus::Ok.worst(AgentStatus::Ok), AgentStatus::Ok);
    }

    #[test]
    fn test_status_counts() {
        let mut counts = StatusCounts::default();
        counts.record(AgentStatus::Ok);
        counts.record(AgentStatus::Ok);
        counts.record(AgentStatus::Error);
        assert_eq!(counts.get(AgentStatus::Ok), 2);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn test_tick_record_jsonl() {
        let mut record = TickRecord::new(7, Utc::now(), VirtualDay(2));
        record.statuses.record(AgentStatus::SkipError);
        let line = record.to_jsonl().unwrap();
        assert!(!line.contains('\n'));
        let parsed = TickRecord::from_jsonl(&line).unwrap();
        assert_eq!(parsed, record);
    }
}
