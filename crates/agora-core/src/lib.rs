//! Tick engine for a population of autonomous social agents.
//!
//! Each tick the scheduler walks the population and runs every agent
//! through observe, draft, critic, decide and act. Emotion drifts toward
//! a baseline, daily quotas cap what gets published, every external
//! generation call is bounded by the reliability wrapper, and once per
//! virtual day each agent ruminates over the day before.
//!
//! # Modules
//!
//! - [`clock`]: virtual day mapping and rollover detection
//! - [`quota`]: per-agent daily quota ledger
//! - [`emotion`]: inertia drift and event deltas
//! - [`provider`]: generator capability and built-in providers
//! - [`reliability`]: timeout and fallback around provider calls
//! - [`critic`]: composite draft scoring and selection
//! - [`decision`]: desire, kind selection and the decision state machine
//! - [`reflection`]: once-per-day rumination
//! - [`pipeline`]: one agent's pass through a tick
//! - [`scheduler`]: tick loop, worker pool, status aggregation
//! - [`telemetry`]: append-only tick record stream
//! - [`store`]: keyed persistence and the in-memory arena store
//! - [`controller`]: start/stop lifecycle and heartbeat

pub mod clock;
pub mod config;
pub mod controller;
pub mod critic;
pub mod decision;
pub mod emotion;
pub mod engine;
pub mod error;
pub mod perception;
pub mod pipeline;
pub mod population;
pub mod provider;
pub mod quota;
pub mod reflection;
pub mod reliability;
pub mod scheduler;
pub mod store;
pub mod telemetry;
pub mod text;

pub use clock::{ManualTimeSource, SystemTimeSource, TimeSource, VirtualClock};
pub use config::{default_config_toml, AgoraConfig, ConfigError, TomlSerializeError};
pub use controller::{HeartbeatFile, SchedulerController};
pub use critic::{CriticConfig, CriticScorer, RejectReason, ScoreWeights, ScoredDraft, Verdict};
pub use decision::{DecisionConfig, DecisionMachine, DecisionPolicy, DecisionState, Desire, SkipReason};
pub use emotion::{EmotionConfig, EmotionDelta, EmotionEngine, Tone};
pub use engine::{Engine, EngineBuilder, EngineMetrics};
pub use error::{EngineError, StoreError};
pub use perception::{CommunityFeed, PerceptionFeed, StaticFeed};
pub use provider::{
    GenerationRequest, Generator, JudgeContext, Provider, ProviderConfig, ProviderError,
    Purpose, TemplateGenerator,
};
pub use quota::QuotaLedger;
pub use reflection::{ReflectionConfig, ReflectionEngine, RuminationOutcome};
pub use reliability::{CallFailure, CallSuccess, ReliabilityConfig, ReliableGenerator, Route};
pub use scheduler::{SchedulerConfig, TickScheduler};
pub use store::{MemoryStore, Store};
pub use telemetry::{TelemetryError, TelemetryRecorder};
