//! Engine facade.
//!
//! [`EngineBuilder`] wires the store, clock, providers, feed and
//! telemetry from an [`AgoraConfig`]; [`Engine`] exposes the tick entry
//! point and the read side: emotion, quota, traces, the tick stream and
//! summary metrics.

use std::sync::Arc;

use agora_events::{
    ActionKind, AgentId, EmotionState, Heartbeat, Persona, QuotaCounter, TickRecord, TraceEvent,
    VirtualDay,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::clock::{SystemTimeSource, TimeSource, VirtualClock};
use crate::config::AgoraConfig;
use crate::critic::CriticScorer;
use crate::decision::DecisionPolicy;
use crate::emotion::EmotionEngine;
use crate::error::{EngineError, StoreError};
use crate::perception::{CommunityFeed, PerceptionFeed};
use crate::pipeline::Pipeline;
use crate::population::seed_population;
use crate::provider::{Generator, Provider};
use crate::quota::QuotaLedger;
use crate::reflection::ReflectionEngine;
use crate::reliability::{ReliabilityStats, ReliableGenerator};
use crate::scheduler::TickScheduler;
use crate::store::{MemoryStore, Store};
use crate::telemetry::{TelemetryError, TelemetryRecorder};

/// Published items considered by [`Engine::metrics`].
const METRICS_WINDOW: usize = 1000;

/// Summary of what the population has done so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineMetrics {
    pub agents: usize,
    pub ticks_recorded: u64,
    pub last_tick_id: Option<u64>,
    pub posts: usize,
    pub comments: usize,
    /// Averages over published items; 0 when nothing was published
    pub avg_score: f64,
    pub avg_quality: f64,
    pub avg_persona: f64,
    pub avg_emotion: f64,
    /// Mean of `1 - |Δ|` between each agent's last two emotion snapshots
    pub emotion_continuity: f64,
    pub provider: ReliabilityStats,
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

pub struct EngineBuilder {
    config: AgoraConfig,
    store: Option<Arc<dyn Store>>,
    feed: Option<Arc<dyn PerceptionFeed>>,
    primary: Option<Provider>,
    fallback: Option<Provider>,
    time: Option<Arc<dyn TimeSource>>,
    epoch: Option<DateTime<Utc>>,
}

impl EngineBuilder {
    pub fn new(config: AgoraConfig) -> Self {
        Self {
            config,
            store: None,
            feed: None,
            primary: None,
            fallback: None,
            time: None,
            epoch: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn feed(mut self, feed: Arc<dyn PerceptionFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Replaces the configured primary provider.
    pub fn generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.primary = Some(Provider::external(generator));
        self
    }

    /// Replaces the configured fallback provider. It is only used when
    /// `reliability.fallback_enabled` is set.
    pub fn fallback_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.fallback = Some(Provider::external(generator));
        self
    }

    pub fn time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.time = Some(time);
        self
    }

    /// Pins virtual day 0 to `epoch` instead of the build time.
    pub fn epoch(mut self, epoch: DateTime<Utc>) -> Self {
        self.epoch = Some(epoch);
        self
    }

    pub fn build(self) -> Result<Engine, EngineError> {
        let config = self.config;
        config.validate()?;

        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let time = self.time.unwrap_or_else(|| Arc::new(SystemTimeSource));
        // a restored store keeps its day numbering across restarts
        let epoch = match self.epoch {
            Some(epoch) => epoch,
            None => store.pin_clock_epoch(time.now())?,
        };
        let clock = VirtualClock::with_epoch(&config.clock, time, epoch);
        clock.restore_seen(store.seen_days()?);
        let feed = self.feed.unwrap_or_else(|| {
            Arc::new(CommunityFeed::new(store.clone(), config.scheduler.seed))
        });

        let reliability = &config.reliability;
        let primary = self
            .primary
            .unwrap_or_else(|| Provider::from_config(&reliability.primary));
        let mut generator = ReliableGenerator::new(primary, reliability.timeout());
        let fallback = self
            .fallback
            .or_else(|| reliability.fallback.as_ref().map(Provider::from_config));
        if let Some(fallback) = fallback {
            generator = generator.with_fallback(fallback, reliability.fallback_enabled);
        }

        let emotion = EmotionEngine::new(config.emotion.clone());
        let pipeline = Arc::new(Pipeline {
            store: store.clone(),
            clock: Arc::new(clock),
            ledger: QuotaLedger::new(store.clone(), config.quota),
            emotion: emotion.clone(),
            generator,
            critic: CriticScorer::new(config.critic.clone()),
            policy: DecisionPolicy::new(config.decision.clone()),
            reflection: ReflectionEngine::new(config.reflection.clone(), emotion),
            feed,
            seed: config.scheduler.seed,
        });

        let mut telemetry =
            TelemetryRecorder::new(store.clone(), config.telemetry.broadcast_capacity);
        if let Some(path) = &config.telemetry.jsonl_path {
            telemetry = telemetry.with_jsonl(path).map_err(TelemetryError::from)?;
        }
        let telemetry = Arc::new(telemetry);
        let scheduler = Arc::new(TickScheduler::new(
            pipeline,
            telemetry.clone(),
            config.scheduler.clone(),
        ));

        tracing::debug!(
            "engine built: interval {}s, {} candidates, timeout {}s",
            config.scheduler.interval_secs,
            config.critic.candidates,
            config.reliability.timeout_secs
        );
        Ok(Engine {
            config,
            store,
            scheduler,
            telemetry,
        })
    }
}

pub struct Engine {
    config: AgoraConfig,
    store: Arc<dyn Store>,
    scheduler: Arc<TickScheduler>,
    telemetry: Arc<TelemetryRecorder>,
}

impl Engine {
    pub fn builder(config: AgoraConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &AgoraConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<TickScheduler> {
        &self.scheduler
    }

    pub fn telemetry(&self) -> &Arc<TelemetryRecorder> {
        &self.telemetry
    }

    pub fn clock(&self) -> &VirtualClock {
        &self.scheduler.pipeline().clock
    }

    /// Registers the configured seed population. Returns how many agents
    /// were created.
    pub fn seed_population(&self) -> Result<usize, EngineError> {
        let created = seed_population(
            self.store.as_ref(),
            &self.config.population,
            self.config.emotion.inertia,
        )?;
        Ok(created)
    }

    pub fn register_agent(
        &self,
        agent: &AgentId,
        persona: Persona,
        emotion: EmotionState,
    ) -> Result<(), StoreError> {
        self.store.register_agent(agent, persona, emotion)
    }

    pub async fn run_tick(&self) -> TickRecord {
        self.scheduler.run_tick().await
    }

    pub fn get_emotion(&self, agent: &AgentId) -> Result<EmotionState, StoreError> {
        self.store.load_emotion(agent)
    }

    pub fn get_quota(&self, agent: &AgentId, day: VirtualDay) -> Result<QuotaCounter, StoreError> {
        self.scheduler.pipeline().ledger.get_quota(agent, day)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TickRecord> {
        self.telemetry.subscribe()
    }

    pub fn recent_traces(&self, limit: usize) -> Result<Vec<TraceEvent>, StoreError> {
        self.store.recent_traces(limit)
    }

    pub fn recent_ticks(&self, limit: usize) -> Result<Vec<TickRecord>, StoreError> {
        self.store.recent_ticks(limit)
    }

    /// Last heartbeat written by a controller, if any.
    pub fn status(&self) -> Result<Option<Heartbeat>, StoreError> {
        self.store.read_heartbeat()
    }

    pub fn metrics(&self) -> Result<EngineMetrics, StoreError> {
        let agents = self.store.agents()?;
        let items = self.store.community_items(METRICS_WINDOW)?;

        let mut continuity = Vec::new();
        for agent in &agents {
            let history = self.store.emotion_history(agent)?;
            if let [.., previous, current] = history.as_slice() {
                continuity.push((1.0 - current.mean_abs_diff(previous)).max(0.0));
            }
        }

        Ok(EngineMetrics {
            agents: agents.len(),
            ticks_recorded: self.telemetry.record_count(),
            last_tick_id: self.store.last_tick_id()?,
            posts: items.iter().filter(|i| i.kind == ActionKind::Post).count(),
            comments: items.iter().filter(|i| i.kind == ActionKind::Comment).count(),
            avg_score: mean(items.iter().map(|i| i.score.total)),
            avg_quality: mean(items.iter().map(|i| i.score.quality)),
            avg_persona: mean(items.iter().map(|i| i.score.persona_consistency)),
            avg_emotion: mean(items.iter().map(|i| i.score.emotion_alignment)),
            emotion_continuity: mean(continuity.into_iter()),
            provider: self.scheduler.pipeline().generator.stats(),
        })
    }
}
