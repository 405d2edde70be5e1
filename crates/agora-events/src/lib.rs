//! Shared record types for the agora agent engine.
//!
//! This crate contains pure data structures with no scheduling logic.
//! It is a dependency for the engine crate and for anything that reads
//! the telemetry stream or the store snapshots.

pub mod content;
pub mod emotion;
pub mod heartbeat;
pub mod quota;
pub mod record;
pub mod rumination;
pub mod timestamp;
pub mod trace;

#[cfg(feature = "test-fixtures")]
pub mod fixtures;

pub use content::{
    generate_item_id, AgentId, CompositeScore, Draft, EngagementKind, EngagementTally, Persona,
    PublishedItem, Snippet,
};
pub use emotion::{Dimension, EmotionState, EmotionVector};
pub use heartbeat::{Heartbeat, RunState};
pub use quota::{ActionKind, QuotaCounter, QuotaLimits};
pub use record::{ActionCounts, AgentStatus, StatusCounts, TickRecord};
pub use rumination::{BaselineShift, ParseShiftError, RuminationResult};
pub use timestamp::{ClockReading, VirtualDay};
pub use trace::{Phase, TraceEvent};
