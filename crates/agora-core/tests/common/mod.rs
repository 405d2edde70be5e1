//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agora_core::provider::{GenerationRequest, Generator, JudgeContext, ProviderError};
use agora_core::{AgoraConfig, Engine, ManualTimeSource, MemoryStore, PerceptionFeed, StaticFeed, Store, StoreError};
use agora_events::{
    fixtures, ActionKind, AgentId, EmotionState, EmotionVector, EngagementKind, EngagementTally,
    Heartbeat, Persona, PublishedItem, QuotaCounter, QuotaLimits, RuminationResult, TickRecord,
    TraceEvent, VirtualDay,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
}

/// A comment-worthy text that shares almost every token with
/// `fixtures::sample_persona()`.
pub const ON_PERSONA_TEXT: &str = "Memory systems and developer tooling focuses on evidence based \
     opinions because curious style, core value, communication #sample";

/// Returns the same text for every draft and a fixed judge score.
pub struct ScriptedGenerator {
    pub text: String,
    pub judge: f64,
    pub calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new(text: &str, judge: f64) -> Self {
        Self {
            text: text.to_string(),
            judge,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.text.clone())
    }

    async fn judge(&self, _text: &str, _context: &JudgeContext) -> Result<f64, ProviderError> {
        Ok(self.judge)
    }
}

/// Drafts fine but its judge is always down.
pub struct JudgeDownGenerator {
    pub text: String,
}

#[async_trait]
impl Generator for JudgeDownGenerator {
    fn name(&self) -> &str {
        "judge_down"
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<String, ProviderError> {
        Ok(self.text.clone())
    }

    async fn judge(&self, _text: &str, _context: &JudgeContext) -> Result<f64, ProviderError> {
        Err(ProviderError::Unavailable("judge offline".into()))
    }
}

/// Never answers.
pub struct HangingGenerator;

#[async_trait]
impl Generator for HangingGenerator {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<String, ProviderError> {
        std::future::pending().await
    }

    async fn judge(&self, _text: &str, _context: &JudgeContext) -> Result<f64, ProviderError> {
        std::future::pending().await
    }
}

/// Answers after a fixed delay.
pub struct SlowGenerator {
    pub delay: Duration,
}

#[async_trait]
impl Generator for SlowGenerator {
    fn name(&self) -> &str {
        "slow"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
        tokio::time::sleep(self.delay).await;
        Ok(format!("Slow thoughts on {:?} worth sharing with everyone here", request.purpose))
    }

    async fn judge(&self, _text: &str, _context: &JudgeContext) -> Result<f64, ProviderError> {
        tokio::time::sleep(self.delay).await;
        Ok(0.5)
    }
}

/// Delegates to a [`MemoryStore`] but refuses emotion writes for one agent.
pub struct FailingStore {
    pub inner: MemoryStore,
    pub broken: AgentId,
}

impl Store for FailingStore {
    fn register_agent(&self, agent: &AgentId, persona: Persona, emotion: EmotionState) -> Result<(), StoreError> {
        self.inner.register_agent(agent, persona, emotion)
    }

    fn agents(&self) -> Result<Vec<AgentId>, StoreError> {
        self.inner.agents()
    }

    fn load_emotion(&self, agent: &AgentId) -> Result<EmotionState, StoreError> {
        self.inner.load_emotion(agent)
    }

    fn save_emotion(&self, agent: &AgentId, emotion: &EmotionState) -> Result<(), StoreError> {
        if agent == &self.broken {
            return Err(StoreError::Unavailable("disk full".to_string()));
        }
        self.inner.save_emotion(agent, emotion)
    }

    fn emotion_history(&self, agent: &AgentId) -> Result<Vec<EmotionVector>, StoreError> {
        self.inner.emotion_history(agent)
    }

    fn load_persona(&self, agent: &AgentId) -> Result<Persona, StoreError> {
        self.inner.load_persona(agent)
    }

    fn quota(&self, agent: &AgentId, day: VirtualDay, limits: &QuotaLimits) -> Result<QuotaCounter, StoreError> {
        self.inner.quota(agent, day, limits)
    }

    fn try_consume(
        &self,
        agent: &AgentId,
        day: VirtualDay,
        kind: ActionKind,
        limits: &QuotaLimits,
    ) -> Result<bool, StoreError> {
        self.inner.try_consume(agent, day, kind, limits)
    }

    fn commit_action(&self, item: PublishedItem, limits: &QuotaLimits) -> Result<Option<PublishedItem>, StoreError> {
        self.inner.commit_action(item, limits)
    }

    fn recent_items(&self, agent: &AgentId, limit: usize) -> Result<Vec<PublishedItem>, StoreError> {
        self.inner.recent_items(agent, limit)
    }

    fn items_on_day(&self, agent: &AgentId, day: VirtualDay) -> Result<Vec<PublishedItem>, StoreError> {
        self.inner.items_on_day(agent, day)
    }

    fn community_items(&self, limit: usize) -> Result<Vec<PublishedItem>, StoreError> {
        self.inner.community_items(limit)
    }

    fn record_engagement(&self, agent: &AgentId, day: VirtualDay, kind: EngagementKind) -> Result<(), StoreError> {
        self.inner.record_engagement(agent, day, kind)
    }

    fn engagement(&self, agent: &AgentId, day: VirtualDay) -> Result<EngagementTally, StoreError> {
        self.inner.engagement(agent, day)
    }

    fn append_trace(&self, event: TraceEvent) -> Result<(), StoreError> {
        self.inner.append_trace(event)
    }

    fn recent_traces(&self, limit: usize) -> Result<Vec<TraceEvent>, StoreError> {
        self.inner.recent_traces(limit)
    }

    fn rumination(&self, agent: &AgentId, day: VirtualDay) -> Result<Option<RuminationResult>, StoreError> {
        self.inner.rumination(agent, day)
    }

    fn record_rumination(
        &self,
        result: RuminationResult,
        persona: &Persona,
        emotion: &EmotionState,
    ) -> Result<(RuminationResult, bool), StoreError> {
        self.inner.record_rumination(result, persona, emotion)
    }

    fn append_tick(&self, record: &TickRecord) -> Result<(), StoreError> {
        self.inner.append_tick(record)
    }

    fn recent_ticks(&self, limit: usize) -> Result<Vec<TickRecord>, StoreError> {
        self.inner.recent_ticks(limit)
    }

    fn last_tick_id(&self) -> Result<Option<u64>, StoreError> {
        self.inner.last_tick_id()
    }

    fn write_heartbeat(&self, heartbeat: &Heartbeat) -> Result<(), StoreError> {
        self.inner.write_heartbeat(heartbeat)
    }

    fn read_heartbeat(&self) -> Result<Option<Heartbeat>, StoreError> {
        self.inner.read_heartbeat()
    }
    fn clock_epoch(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.inner.clock_epoch()
    }

    fn pin_clock_epoch(&self, epoch: DateTime<Utc>) -> Result<DateTime<Utc>, StoreError> {
        self.inner.pin_clock_epoch(epoch)
    }

    fn record_seen(&self, agent: &AgentId, day: VirtualDay) -> Result<(), StoreError> {
        self.inner.record_seen(agent, day)
    }

    fn seen_days(&self) -> Result<Vec<(AgentId, VirtualDay)>, StoreError> {
        self.inner.seen_days()
    }
}

pub struct Harness {
    pub engine: Engine,
    pub time: Arc<ManualTimeSource>,
}

/// An engine on manual time over `store`, with the sample feed unless
/// another is given and the configured providers unless `generator` is.
pub fn harness(
    config: AgoraConfig,
    store: Arc<dyn Store>,
    feed: Option<Arc<dyn PerceptionFeed>>,
    generator: Option<Arc<dyn Generator>>,
) -> Harness {
    let time = Arc::new(ManualTimeSource::new(start_time()));
    let feed = feed.unwrap_or_else(|| Arc::new(StaticFeed::new(fixtures::sample_feed())));
    let mut builder = agora_core::EngineBuilder::new(config)
        .store(store)
        .feed(feed)
        .time_source(time.clone());
    if let Some(generator) = generator {
        builder = builder.generator(generator);
    }
    Harness {
        engine: builder.build().unwrap(),
        time,
    }
}

/// Registers `names` with the sample persona and a calm emotion.
pub fn register(engine: &Engine, names: &[&str]) -> Vec<AgentId> {
    names
        .iter()
        .map(|name| {
            let agent = AgentId::new(*name);
            engine
                .register_agent(&agent, fixtures::sample_persona(), fixtures::calm_emotion())
                .unwrap();
            agent
        })
        .collect()
}
