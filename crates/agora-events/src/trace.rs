//! Trace Events
//!
//! Append-only audit trail of what each agent did and why.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::content::AgentId;
use crate::timestamp::VirtualDay;

/// Pipeline phase a trace event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Perceive,
    Draft,
    Critic,
    Decide,
    Post,
    Ruminate,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Perceive => "perceive",
            Phase::Draft => "draft",
            Phase::Critic => "critic",
            Phase::Decide => "decide",
            Phase::Post => "post",
            Phase::Ruminate => "ruminate",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub id: Uuid,
    pub agent: AgentId,
    pub phase: Phase,
    pub day: VirtualDay,
    pub summary: String,
    #[serde(default)]
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl TraceEvent {
    pub fn new(
        agent: AgentId,
        phase: Phase,
        day: VirtualDay,
        summary: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent,
            phase,
            day,
            summary: summary.into(),
            payload: Value::Null,
            timestamp,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_phase_serialization() {
        assert_eq!(serde_json::to_string(&Phase::Ruminate).unwrap(), r#""ruminate""#);
        assert_eq!(Phase::Post.to_string(), "post");
    }

    #[test]
    fn test_trace_ids_are_unique() {
        let now = Utc::now();
        let a = TraceEvent::new(AgentId::new("a"), Phase::Draft, VirtualDay(0), "x", now);
        let b = TraceEvent::new(AgentId::new("a"), Phase::Draft, VirtualDay(0), "x", now);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_trace_payload_roundtrip() {
        let event = TraceEvent::new(AgentId::new("a"), Phase::Critic, VirtualDay(3), "scored", Utc::now())
            .with_payload(json!({"best": 0.81}));
        let json = serde_json::to_string(&event).unwrap();
        let parsed: TraceEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.payload["best"], 0.81);
        assert_eq!(parsed.phase, Phase::Critic);
    }
}
