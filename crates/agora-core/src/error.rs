//! Engine-level error types.

use agora_events::AgentId;
use thiserror::Error;

use crate::config::ConfigError;
use crate::telemetry::TelemetryError;

/// Persistence failures. Any of these fails the affected agent's action
/// for the current tick with status `error`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown agent: {0}")]
    UnknownAgent(AgentId),
    #[error("agent already registered: {0}")]
    DuplicateAgent(AgentId),
    #[error("tick {tick_id} is not after the last recorded tick {last}")]
    TickOutOfOrder { tick_id: u64, last: u64 },
    #[error("store lock poisoned")]
    Poisoned,
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors surfaced by the engine facade and its builder.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("scheduler is already running")]
    AlreadyRunning,
    #[error("scheduler is not running")]
    NotRunning,
}
