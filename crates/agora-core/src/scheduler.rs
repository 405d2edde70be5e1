//! Tick scheduler.
//!
//! Runs every agent of the population once per tick on a bounded worker
//! pool, detects virtual-day rollovers, hands a budgeted number of
//! ruminations to agents that crossed into a new day, and folds all
//! per-agent outcomes into exactly one [`TickRecord`].
//!
//! Pipelines still running at the tick deadline are aborted and counted
//! as `skip_error`; they start over with fresh reads on the next tick.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agora_events::{ActionKind, AgentId, AgentStatus, TickRecord, VirtualDay};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::pipeline::{AgentOutcome, Pipeline, TickInput};
use crate::telemetry::TelemetryRecorder;

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between ticks
    pub interval_secs: f64,
    /// Soft deadline per tick in seconds; defaults to the interval
    pub deadline_secs: Option<f64>,
    /// Agent pipelines running at once
    pub max_concurrency: usize,
    /// Seed for agent order and desire jitter
    pub seed: u64,
    /// Visit agents in a seeded shuffled order
    pub shuffle: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 600.0,
            deadline_secs: None,
            max_concurrency: 8,
            seed: 42,
            shuffle: true,
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs.max(0.001))
    }

    pub fn deadline(&self) -> Duration {
        match self.deadline_secs {
            Some(secs) => Duration::from_secs_f64(secs.max(0.001)),
            None => self.interval(),
        }
    }
}

struct TickState {
    next_tick: u64,
    /// Agents owed a rumination, oldest first.
    backlog: VecDeque<(AgentId, VirtualDay)>,
}

pub struct TickScheduler {
    pipeline: Arc<Pipeline>,
    telemetry: Arc<TelemetryRecorder>,
    config: SchedulerConfig,
    state: tokio::sync::Mutex<TickState>,
    agent_locks: Mutex<HashMap<AgentId, Arc<tokio::sync::Mutex<()>>>>,
    workers: Arc<Semaphore>,
}

impl TickScheduler {
    pub fn new(
        pipeline: Arc<Pipeline>,
        telemetry: Arc<TelemetryRecorder>,
        config: SchedulerConfig,
    ) -> Self {
        let next_tick = telemetry.last_tick_id().map_or(1, |last| last + 1);
        let workers = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Self {
            pipeline,
            telemetry,
            config,
            state: tokio::sync::Mutex::new(TickState {
                next_tick,
                backlog: VecDeque::new(),
            }),
            agent_locks: Mutex::new(HashMap::new()),
            workers,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Agents waiting for a rumination slot.
    pub async fn rumination_backlog(&self) -> usize {
        self.state.lock().await.backlog.len()
    }

    /// The per-agent guard serializing that agent's pipelines.
    pub fn agent_lock(&self, agent: &AgentId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.agent_locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.entry(agent.clone()).or_default().clone()
    }

    fn visiting_order(&self, tick_id: u64, mut agents: Vec<AgentId>) -> Vec<AgentId> {
        if self.config.shuffle {
            let mut rng = SmallRng::seed_from_u64(
                self.config.seed ^ tick_id.wrapping_mul(0x9e37_79b9_7f4a_7c15),
            );
            agents.shuffle(&mut rng);
        }
        agents
    }

    /// Runs one tick to completion and returns its record. Ticks never
    /// overlap; a second caller waits for the first to finish.
    pub async fn run_tick(&self) -> TickRecord {
        let started = Instant::now();
        let mut state = self.state.lock().await;
        let tick_id = state.next_tick;
        let clock = &self.pipeline.clock;
        let reading = clock.now();
        let day = reading.virtual_day;
        let mut record = TickRecord::new(tick_id, reading.real_ts, day);

        let agents = match self.pipeline.store.agents() {
            Ok(agents) => self.visiting_order(tick_id, agents),
            Err(e) => {
                tracing::error!("tick {}: cannot load population: {}", tick_id, e);
                Vec::new()
            }
        };

        let reflection = self.pipeline.reflection.config();
        for agent in &agents {
            if let Err(e) = self.pipeline.store.record_seen(agent, day) {
                tracing::warn!("tick {}: cannot record {} as seen: {}", tick_id, agent, e);
            }
            if let Some(prior) = clock.mark_seen(agent, day) {
                let owed = (agent.clone(), prior);
                if reflection.enabled && !state.backlog.contains(&owed) {
                    state.backlog.push_back(owed);
                }
            }
        }
        let assigned = take_budget(&mut state.backlog, &agents, reflection.budget_per_tick);

        let mut set = JoinSet::new();
        for agent in &agents {
            let input = TickInput {
                tick_id,
                day,
                ruminate: assigned.get(agent).copied(),
            };
            let agent = agent.clone();
            let pipeline = self.pipeline.clone();
            let workers = self.workers.clone();
            let guard = self.agent_lock(&agent);
            set.spawn(async move {
                let Ok(_permit) = workers.acquire_owned().await else {
                    return AgentOutcome::unfinished(agent, AgentStatus::Error, "worker pool closed");
                };
                let Ok(_busy) = guard.try_lock_owned() else {
                    return AgentOutcome::unfinished(agent, AgentStatus::SkipError, "agent busy");
                };
                pipeline.run(&agent, input).await
            });
        }

        let deadline = started + self.config.deadline();
        let mut outcomes: HashMap<AgentId, AgentOutcome> = HashMap::new();
        let mut deadline_hit = false;
        loop {
            match tokio::time::timeout_at(deadline, set.join_next()).await {
                Ok(Some(Ok(outcome))) => {
                    outcomes.insert(outcome.agent.clone(), outcome);
                }
                Ok(Some(Err(e))) => {
                    tracing::error!("tick {}: agent task failed: {}", tick_id, e);
                }
                Ok(None) => break,
                Err(_) => {
                    deadline_hit = true;
                    set.abort_all();
                    while let Some(joined) = set.join_next().await {
                        if let Ok(outcome) = joined {
                            outcomes.insert(outcome.agent.clone(), outcome);
                        }
                    }
                    break;
                }
            }
        }
        if deadline_hit {
            tracing::warn!(
                "tick {}: deadline reached with {} of {} agents unfinished",
                tick_id,
                agents.len() - outcomes.len(),
                agents.len()
            );
        }

        let mut requeue = Vec::new();
        for agent in &agents {
            let outcome = outcomes.remove(agent).unwrap_or_else(|| {
                if deadline_hit {
                    AgentOutcome::unfinished(agent.clone(), AgentStatus::SkipError, "tick deadline")
                } else {
                    AgentOutcome::unfinished(agent.clone(), AgentStatus::Error, "pipeline aborted")
                }
            });
            record.statuses.record(outcome.status);
            match outcome.published.as_ref().map(|item| item.kind) {
                Some(ActionKind::Post) => record.actions.posted += 1,
                Some(ActionKind::Comment) => record.actions.commented += 1,
                None => record.actions.skipped += 1,
            }
            if outcome.ruminated {
                record.ruminations += 1;
            }
            if let Some(&prior) = assigned.get(agent) {
                let closed = self
                    .pipeline
                    .store
                    .rumination(agent, prior)
                    .map(|r| r.is_some())
                    .unwrap_or(false);
                if !closed {
                    requeue.push((agent.clone(), prior));
                }
            }
        }
        for owed in requeue.into_iter().rev() {
            state.backlog.push_front(owed);
        }

        record.rumination_backlog = state.backlog.len() as u32;
        record.duration_ms = started.elapsed().as_millis() as u64;
        if let Err(e) = self.telemetry.record(&record) {
            tracing::error!("tick {}: telemetry append failed: {}", tick_id, e);
        }
        state.next_tick = tick_id + 1;

        tracing::info!(
            "tick {} {}: ok={} partial={} skip_error={} error={} posted={} commented={} ruminations={}",
            tick_id,
            day,
            record.statuses.ok,
            record.statuses.partial_error,
            record.statuses.skip_error,
            record.statuses.error,
            record.actions.posted,
            record.actions.commented,
            record.ruminations
        );
        record
    }
}

/// Pops up to `budget` owed ruminations for agents in this tick, at most
/// one per agent. Entries for agents not in the population are dropped;
/// second entries for an agent stay queued in order.
fn take_budget(
    backlog: &mut VecDeque<(AgentId, VirtualDay)>,
    agents: &[AgentId],
    budget: usize,
) -> HashMap<AgentId, VirtualDay> {
    let present: HashSet<&AgentId> = agents.iter().collect();
    let mut assigned = HashMap::new();
    let mut deferred = Vec::new();
    while assigned.len() < budget {
        let Some((agent, prior)) = backlog.pop_front() else {
            break;
        };
        if !present.contains(&agent) {
            continue;
        }
        if assigned.contains_key(&agent) {
            deferred.push((agent, prior));
            continue;
        }
        assigned.insert(agent, prior);
    }
    for owed in deferred.into_iter().rev() {
        backlog.push_front(owed);
    }
    assigned
}
