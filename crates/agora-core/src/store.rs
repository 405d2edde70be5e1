//! Keyed persistence.
//!
//! [`Store`] is the durable-store seam: emotion, persona, quota, published
//! items, engagement, traces, ruminations, tick records and the heartbeat,
//! each keyed by agent and day or tick. [`MemoryStore`] is an arena of
//! per-agent records behind their own locks, so two agents never contend
//! and every multi-field update for one agent is a single critical
//! section. It can be snapshotted to and restored from a JSON file.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use agora_events::{
    generate_item_id, ActionKind, AgentId, EmotionState, EmotionVector, EngagementKind,
    EngagementTally, Heartbeat, Persona, PublishedItem, QuotaCounter, QuotaLimits,
    RuminationResult, TickRecord, TraceEvent, VirtualDay,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Emotion snapshots kept per agent for continuity metrics.
const EMOTION_HISTORY: usize = 32;

pub trait Store: Send + Sync {
    fn register_agent(
        &self,
        agent: &AgentId,
        persona: Persona,
        emotion: EmotionState,
    ) -> Result<(), StoreError>;

    /// Registered agents in id order.
    fn agents(&self) -> Result<Vec<AgentId>, StoreError>;

    fn load_emotion(&self, agent: &AgentId) -> Result<EmotionState, StoreError>;
    fn save_emotion(&self, agent: &AgentId, emotion: &EmotionState) -> Result<(), StoreError>;
    /// Most recent saved emotion vectors, oldest first.
    fn emotion_history(&self, agent: &AgentId) -> Result<Vec<EmotionVector>, StoreError>;

    fn load_persona(&self, agent: &AgentId) -> Result<Persona, StoreError>;

    /// Counter for (agent, day), created at `limits` on first access.
    fn quota(
        &self,
        agent: &AgentId,
        day: VirtualDay,
        limits: &QuotaLimits,
    ) -> Result<QuotaCounter, StoreError>;

    /// Atomically decrements the counter if any of `kind` remains.
    fn try_consume(
        &self,
        agent: &AgentId,
        day: VirtualDay,
        kind: ActionKind,
        limits: &QuotaLimits,
    ) -> Result<bool, StoreError>;

    /// Consumes one unit of `item.kind` and stores the item as one unit.
    /// Returns the stored item with its assigned id, or `None` when the
    /// quota was already spent and nothing was written.
    fn commit_action(
        &self,
        item: PublishedItem,
        limits: &QuotaLimits,
    ) -> Result<Option<PublishedItem>, StoreError>;

    /// The agent's latest published items, newest first.
    fn recent_items(&self, agent: &AgentId, limit: usize)
        -> Result<Vec<PublishedItem>, StoreError>;
    fn items_on_day(&self, agent: &AgentId, day: VirtualDay)
        -> Result<Vec<PublishedItem>, StoreError>;
    /// Latest items across all agents, newest first.
    fn community_items(&self, limit: usize) -> Result<Vec<PublishedItem>, StoreError>;

    fn record_engagement(
        &self,
        agent: &AgentId,
        day: VirtualDay,
        kind: EngagementKind,
    ) -> Result<(), StoreError>;
    fn engagement(&self, agent: &AgentId, day: VirtualDay) -> Result<EngagementTally, StoreError>;

    fn append_trace(&self, event: TraceEvent) -> Result<(), StoreError>;
    /// Latest trace events, newest first.
    fn recent_traces(&self, limit: usize) -> Result<Vec<TraceEvent>, StoreError>;

    fn rumination(
        &self,
        agent: &AgentId,
        day: VirtualDay,
    ) -> Result<Option<RuminationResult>, StoreError>;

    /// Stores a rumination together with the persona and emotion it
    /// produced, unless one already exists for (agent, day). Returns the
    /// stored result and whether this call inserted it.
    fn record_rumination(
        &self,
        result: RuminationResult,
        persona: &Persona,
        emotion: &EmotionState,
    ) -> Result<(RuminationResult, bool), StoreError>;

    /// Appends a tick record; ids must strictly increase.
    fn append_tick(&self, record: &TickRecord) -> Result<(), StoreError>;
    /// Latest tick records, newest first.
    fn recent_ticks(&self, limit: usize) -> Result<Vec<TickRecord>, StoreError>;
    fn last_tick_id(&self) -> Result<Option<u64>, StoreError>;

    fn write_heartbeat(&self, heartbeat: &Heartbeat) -> Result<(), StoreError>;
    fn read_heartbeat(&self) -> Result<Option<Heartbeat>, StoreError>;

    /// The instant virtual day 0 began, once pinned.
    fn clock_epoch(&self) -> Result<Option<DateTime<Utc>>, StoreError>;
    /// Pins the clock epoch unless one is already stored. Returns the
    /// epoch in effect.
    fn pin_clock_epoch(&self, epoch: DateTime<Utc>) -> Result<DateTime<Utc>, StoreError>;

    /// Records the latest virtual day the scheduler ran `agent` on. An
    /// earlier day never replaces a later one.
    fn record_seen(&self, agent: &AgentId, day: VirtualDay) -> Result<(), StoreError>;
    /// Last seen day of every agent that has run at least once.
    fn seen_days(&self) -> Result<Vec<(AgentId, VirtualDay)>, StoreError>;
}

/// Everything the store keeps for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AgentRecord {
    persona: Persona,
    emotion: EmotionState,
    #[serde(default)]
    emotion_history: VecDeque<EmotionVector>,
    #[serde(default)]
    quotas: BTreeMap<VirtualDay, QuotaCounter>,
    #[serde(default)]
    items: Vec<PublishedItem>,
    #[serde(default)]
    engagement: BTreeMap<VirtualDay, EngagementTally>,
    #[serde(default)]
    ruminations: BTreeMap<VirtualDay, RuminationResult>,
    #[serde(default)]
    last_seen: Option<VirtualDay>,
}

impl AgentRecord {
    fn new(persona: Persona, emotion: EmotionState) -> Self {
        let mut emotion_history = VecDeque::with_capacity(EMOTION_HISTORY);
        emotion_history.push_back(emotion.current);
        Self {
            persona,
            emotion,
            emotion_history,
            quotas: BTreeMap::new(),
            items: Vec::new(),
            engagement: BTreeMap::new(),
            ruminations: BTreeMap::new(),
            last_seen: None,
        }
    }

    fn counter(&mut self, agent: &AgentId, day: VirtualDay, limits: &QuotaLimits) -> &mut QuotaCounter {
        self.quotas
            .entry(day)
            .or_insert_with(|| QuotaCounter::fresh(agent.clone(), day, limits))
    }

    fn set_emotion(&mut self, emotion: &EmotionState) {
        self.emotion = emotion.clone();
        if self.emotion_history.len() == EMOTION_HISTORY {
            self.emotion_history.pop_front();
        }
        self.emotion_history.push_back(emotion.current);
    }
}

/// Serialized form of a [`MemoryStore`].
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    agents: BTreeMap<AgentId, AgentRecord>,
    #[serde(default)]
    traces: Vec<TraceEvent>,
    #[serde(default)]
    ticks: Vec<TickRecord>,
    #[serde(default)]
    heartbeat: Option<Heartbeat>,
    #[serde(default)]
    next_item: u64,
    #[serde(default)]
    clock_epoch: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    agents: RwLock<BTreeMap<AgentId, Arc<Mutex<AgentRecord>>>>,
    traces: Mutex<Vec<TraceEvent>>,
    ticks: Mutex<Vec<TickRecord>>,
    heartbeat: Mutex<Option<Heartbeat>>,
    next_item: AtomicU64,
    clock_epoch: Mutex<Option<DateTime<Utc>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex.lock().map_err(|_| StoreError::Poisoned)
}

fn newest_first<T: Clone>(items: &[T], limit: usize) -> Vec<T> {
    items.iter().rev().take(limit).cloned().collect()
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, agent: &AgentId) -> Result<Arc<Mutex<AgentRecord>>, StoreError> {
        let agents = self.agents.read().map_err(|_| StoreError::Poisoned)?;
        agents
            .get(agent)
            .cloned()
            .ok_or_else(|| StoreError::UnknownAgent(agent.clone()))
    }

    fn with_record<R>(
        &self,
        agent: &AgentId,
        f: impl FnOnce(&mut AgentRecord) -> R,
    ) -> Result<R, StoreError> {
        let record = self.record(agent)?;
        let mut guard = lock(&record)?;
        Ok(f(&mut guard))
    }

    /// Writes the whole store as JSON. The file is replaced atomically.
    pub fn save_snapshot(&self, path: &Path) -> Result<(), StoreError> {
        let snapshot = self.snapshot()?;
        let json = serde_json::to_string_pretty(&snapshot)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn load_snapshot(path: &Path) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&content)?;
        let agents = snapshot
            .agents
            .into_iter()
            .map(|(id, record)| (id, Arc::new(Mutex::new(record))))
            .collect();
        Ok(Self {
            agents: RwLock::new(agents),
            traces: Mutex::new(snapshot.traces),
            ticks: Mutex::new(snapshot.ticks),
            heartbeat: Mutex::new(snapshot.heartbeat),
            next_item: AtomicU64::new(snapshot.next_item),
            clock_epoch: Mutex::new(snapshot.clock_epoch),
        })
    }

    fn snapshot(&self) -> Result<Snapshot, StoreError> {
        let records: Vec<(AgentId, Arc<Mutex<AgentRecord>>)> = {
            let agents = self.agents.read().map_err(|_| StoreError::Poisoned)?;
            agents.iter().map(|(id, r)| (id.clone(), r.clone())).collect()
        };
        let mut agents = BTreeMap::new();
        for (id, record) in records {
            agents.insert(id, lock(&record)?.clone());
        }
        Ok(Snapshot {
            agents,
            traces: lock(&self.traces)?.clone(),
            ticks: lock(&self.ticks)?.clone(),
            heartbeat: lock(&self.heartbeat)?.clone(),
            next_item: self.next_item.load(Ordering::SeqCst),
            clock_epoch: *lock(&self.clock_epoch)?,
        })
    }
}

impl Store for MemoryStore {
    fn register_agent(
        &self,
        agent: &AgentId,
        persona: Persona,
        emotion: EmotionState,
    ) -> Result<(), StoreError> {
        let mut agents = self.agents.write().map_err(|_| StoreError::Poisoned)?;
        if agents.contains_key(agent) {
            return Err(StoreError::DuplicateAgent(agent.clone()));
        }
        agents.insert(
            agent.clone(),
            Arc::new(Mutex::new(AgentRecord::new(persona, emotion))),
        );
        Ok(())
    }

    fn agents(&self) -> Result<Vec<AgentId>, StoreError> {
        let agents = self.agents.read().map_err(|_| StoreError::Poisoned)?;
        Ok(agents.keys().cloned().collect())
    }

    fn load_emotion(&self, agent: &AgentId) -> Result<EmotionState, StoreError> {
        self.with_record(agent, |r| r.emotion.clone())
    }

    fn save_emotion(&self, agent: &AgentId, emotion: &EmotionState) -> Result<(), StoreError> {
        self.with_record(agent, |r| r.set_emotion(emotion))
    }

    fn emotion_history(&self, agent: &AgentId) -> Result<Vec<EmotionVector>, StoreError> {
        self.with_record(agent, |r| r.emotion_history.iter().copied().collect())
    }

    fn load_persona(&self, agent: &AgentId) -> Result<Persona, StoreError> {
        self.with_record(agent, |r| r.persona.clone())
    }

    fn quota(
        &self,
        agent: &AgentId,
        day: VirtualDay,
        limits: &QuotaLimits,
    ) -> Result<QuotaCounter, StoreError> {
        self.with_record(agent, |r| r.counter(agent, day, limits).clone())
    }

    fn try_consume(
        &self,
        agent: &AgentId,
        day: VirtualDay,
        kind: ActionKind,
        limits: &QuotaLimits,
    ) -> Result<bool, StoreError> {
        self.with_record(agent, |r| r.counter(agent, day, limits).consume(kind))
    }

    fn commit_action(
        &self,
        mut item: PublishedItem,
        limits: &QuotaLimits,
    ) -> Result<Option<PublishedItem>, StoreError> {
        let agent = item.agent.clone();
        self.with_record(&agent, |r| {
            if !r.counter(&agent, item.day, limits).consume(item.kind) {
                return None;
            }
            let seq = self.next_item.fetch_add(1, Ordering::SeqCst) + 1;
            item.id = generate_item_id(seq);
            r.items.push(item.clone());
            Some(item)
        })
    }

    fn recent_items(
        &self,
        agent: &AgentId,
        limit: usize,
    ) -> Result<Vec<PublishedItem>, StoreError> {
        self.with_record(agent, |r| newest_first(&r.items, limit))
    }

    fn items_on_day(
        &self,
        agent: &AgentId,
        day: VirtualDay,
    ) -> Result<Vec<PublishedItem>, StoreError> {
        self.with_record(agent, |r| {
            r.items.iter().filter(|i| i.day == day).cloned().collect()
        })
    }

    fn community_items(&self, limit: usize) -> Result<Vec<PublishedItem>, StoreError> {
        let mut all = Vec::new();
        for agent in self.agents()? {
            all.extend(self.recent_items(&agent, limit)?);
        }
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        all.truncate(limit);
        Ok(all)
    }

    fn record_engagement(
        &self,
        agent: &AgentId,
        day: VirtualDay,
        kind: EngagementKind,
    ) -> Result<(), StoreError> {
        self.with_record(agent, |r| r.engagement.entry(day).or_default().record(kind))
    }

    fn engagement(&self, agent: &AgentId, day: VirtualDay) -> Result<EngagementTally, StoreError> {
        self.with_record(agent, |r| r.engagement.get(&day).copied().unwrap_or_default())
    }

    fn append_trace(&self, event: TraceEvent) -> Result<(), StoreError> {
        lock(&self.traces)?.push(event);
        Ok(())
    }

    fn recent_traces(&self, limit: usize) -> Result<Vec<TraceEvent>, StoreError> {
        Ok(newest_first(lock(&self.traces)?.as_slice(), limit))
    }

    fn rumination(
        &self,
        agent: &AgentId,
        day: VirtualDay,
    ) -> Result<Option<RuminationResult>, StoreError> {
        self.with_record(agent, |r| r.ruminations.get(&day).cloned())
    }

    fn record_rumination(
        &self,
        result: RuminationResult,
        persona: &Persona,
        emotion: &EmotionState,
    ) -> Result<(RuminationResult, bool), StoreError> {
        let agent = result.agent.clone();
        self.with_record(&agent, |r| {
            if let Some(existing) = r.ruminations.get(&result.day) {
                return (existing.clone(), false);
            }
            r.persona = persona.clone();
            r.set_emotion(emotion);
            r.ruminations.insert(result.day, result.clone());
            (result, true)
        })
    }

    fn append_tick(&self, record: &TickRecord) -> Result<(), StoreError> {
        let mut ticks = lock(&self.ticks)?;
        if let Some(last) = ticks.last() {
            if record.tick_id <= last.tick_id {
                return Err(StoreError::TickOutOfOrder {
                    tick_id: record.tick_id,
                    last: last.tick_id,
                });
            }
        }
        ticks.push(record.clone());
        Ok(())
    }

    fn recent_ticks(&self, limit: usize) -> Result<Vec<TickRecord>, StoreError> {
        Ok(newest_first(lock(&self.ticks)?.as_slice(), limit))
    }

    fn last_tick_id(&self) -> Result<Option<u64>, StoreError> {
        Ok(lock(&self.ticks)?.last().map(|t| t.tick_id))
    }

    fn write_heartbeat(&self, heartbeat: &Heartbeat) -> Result<(), StoreError> {
        *lock(&self.heartbeat)? = Some(heartbeat.clone());
        Ok(())
    }

    fn read_heartbeat(&self) -> Result<Option<Heartbeat>, StoreError> {
        Ok(lock(&self.heartbeat)?.clone())
    }

    fn clock_epoch(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(*lock(&self.clock_epoch)?)
    }

    fn pin_clock_epoch(&self, epoch: DateTime<Utc>) -> Result<DateTime<Utc>, StoreError> {
        Ok(*lock(&self.clock_epoch)?.get_or_insert(epoch))
    }

    fn record_seen(&self, agent: &AgentId, day: VirtualDay) -> Result<(), StoreError> {
        self.with_record(agent, |r| {
            r.last_seen = Some(r.last_seen.map_or(day, |seen| seen.max(day)));
        })
    }

    fn seen_days(&self) -> Result<Vec<(AgentId, VirtualDay)>, StoreError> {
        let records: Vec<(AgentId, Arc<Mutex<AgentRecord>>)> = {
            let agents = self.agents.read().map_err(|_| StoreError::Poisoned)?;
            agents.iter().map(|(id, r)| (id.clone(), r.clone())).collect()
        };
        let mut seen = Vec::new();
        for (id, record) in records {
            if let Some(day) = lock(&record)?.last_seen {
                seen.push((id, day));
            }
        }
        Ok(seen)
    }
}
