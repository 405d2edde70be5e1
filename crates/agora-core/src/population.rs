//! Population seeding.
//!
//! Agents are named `seed_user_NNN_ai` and get a persona drawn from fixed
//! topic, style and value lists plus an emotion vector jittered around
//! the default. Each agent's draws come from its own seeded RNG, so the
//! same seed always yields the same population regardless of size.

use std::collections::BTreeSet;

use agora_events::{AgentId, Dimension, EmotionState, EmotionVector, Persona};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::decision::stable_hash;
use crate::error::StoreError;
use crate::store::Store;

const TOPICS: &[&str] = &[
    "open-source AI agents",
    "LLM product design",
    "developer tooling",
    "memory systems",
    "human-AI collaboration",
    "community moderation",
    "learning in public",
    "creative coding",
];

const STYLES: &[&str] = &[
    "concise",
    "curious",
    "optimistic",
    "critical but fair",
    "builder-minded",
    "reflective",
];

const VALUES: &[&str] = &[
    "signal over noise",
    "transparent experiments",
    "kind but direct feedback",
    "evidence-based opinions",
    "practical engineering",
];

/// Population configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationConfig {
    /// Agents created at startup
    pub size: usize,
    /// Seed for persona and emotion draws
    pub seed: u64,
    /// Maximum jitter applied to each default emotion dimension
    pub emotion_jitter: f64,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            size: 8,
            seed: 7,
            emotion_jitter: 0.12,
        }
    }
}

/// Handle of the `index`-th seeded agent, starting at 1.
pub fn seeded_agent_id(index: usize) -> AgentId {
    AgentId::new(format!("seed_user_{:03}_ai", index))
}

fn rng_for(seed: u64, agent: &AgentId) -> SmallRng {
    SmallRng::seed_from_u64(seed ^ stable_hash(agent.as_str()))
}

fn pick<'a>(rng: &mut SmallRng, options: &[&'a str]) -> &'a str {
    options.choose(rng).copied().unwrap_or_default()
}

/// Persona and starting emotion for one agent.
pub fn draw_agent(config: &PopulationConfig, agent: &AgentId, inertia: f64) -> (Persona, EmotionState) {
    let mut rng = rng_for(config.seed, agent);
    let topic = pick(&mut rng, TOPICS);
    let style = pick(&mut rng, STYLES);
    let value = pick(&mut rng, VALUES);
    let persona = Persona::new(format!(
        "@{} focuses on {}. Communication style: {}. Core value: {}.",
        agent, topic, style, value
    ));

    let mut vector = EmotionVector::default();
    let jitter = config.emotion_jitter.abs();
    if jitter > 0.0 {
        for &dim in Dimension::all() {
            vector.add(dim, rng.gen_range(-jitter..=jitter));
        }
    }
    (persona, EmotionState::new(vector, inertia))
}

/// Registers the configured population, skipping agents that already
/// exist. Returns how many were created.
pub fn seed_population(
    store: &dyn Store,
    config: &PopulationConfig,
    inertia: f64,
) -> Result<usize, StoreError> {
    let existing: BTreeSet<AgentId> = store.agents()?.into_iter().collect();
    let mut created = 0;
    for index in 1..=config.size {
        let agent = seeded_agent_id(index);
        if existing.contains(&agent) {
            continue;
        }
        let (persona, emotion) = draw_agent(config, &agent, inertia);
        store.register_agent(&agent, persona, emotion)?;
        created += 1;
    }
    if created > 0 {
        tracing::info!("seeded {} agents ({} total)", created, existing.len() + created);
    }
    Ok(created)
}
