//! Perception feeds.
//!
//! A [`PerceptionFeed`] tells an agent what it sees on a tick and how the
//! community responded to it since the last tick. Browsing and ranking
//! live outside the engine; these implementations cover tests and the
//! demonstration daemon.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use agora_events::{AgentId, EngagementKind, Snippet};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::decision::stable_hash;
use crate::store::Store;

pub trait PerceptionFeed: Send + Sync {
    /// Community content visible to `agent` this tick.
    fn fetch_context(&self, agent: &AgentId) -> Vec<Snippet>;

    /// Responses to the agent's own content since the last call.
    fn engagement(&self, _agent: &AgentId) -> Vec<EngagementKind> {
        Vec::new()
    }
}

/// A fixed feed with scripted engagement.
#[derive(Debug, Default)]
pub struct StaticFeed {
    snippets: Vec<Snippet>,
    pending: Mutex<HashMap<AgentId, Vec<EngagementKind>>>,
}

impl StaticFeed {
    pub fn new(snippets: Vec<Snippet>) -> Self {
        Self {
            snippets,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Queues engagement for the agent's next perception.
    pub fn push_engagement(&self, agent: &AgentId, kinds: &[EngagementKind]) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.entry(agent.clone()).or_default().extend_from_slice(kinds);
        }
    }
}

impl PerceptionFeed for StaticFeed {
    fn fetch_context(&self, agent: &AgentId) -> Vec<Snippet> {
        self.snippets
            .iter()
            .filter(|s| s.author.as_ref() != Some(agent))
            .cloned()
            .collect()
    }

    fn engagement(&self, agent: &AgentId) -> Vec<EngagementKind> {
        self.pending
            .lock()
            .ok()
            .and_then(|mut pending| pending.remove(agent))
            .unwrap_or_default()
    }
}

/// Feed built from what the population itself published, plus a few
/// bootstrap posts. Engagement on each published item is rolled once,
/// seeded by the item id, and likelier for well-scored items.
pub struct CommunityFeed {
    store: Arc<dyn Store>,
    bootstrap: Vec<Snippet>,
    window: usize,
    seed: u64,
    judged: Mutex<HashSet<String>>,
}

impl CommunityFeed {
    pub fn new(store: Arc<dyn Store>, seed: u64) -> Self {
        Self {
            store,
            bootstrap: Self::bootstrap_posts(),
            window: 10,
            seed,
            judged: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    pub fn bootstrap_posts() -> Vec<Snippet> {
        vec![
            Snippet::new(
                "bootstrap_1",
                "Welcome to the community. Share what you are building and what you learned this week.",
            )
            .with_quality(0.8),
            Snippet::new(
                "bootstrap_2",
                "Question for everyone: which tooling change saved you the most time this year?",
            )
            .with_engagement(2, 2),
            Snippet::new(
                "bootstrap_3",
                "Reminder that evidence beats opinions. Link your data when you make a claim.",
            ),
        ]
    }

    fn roll(&self, item_id: &str, quality: f64) -> EngagementKind {
        let mut rng = SmallRng::seed_from_u64(self.seed ^ stable_hash(item_id));
        let q = quality.clamp(0.0, 1.0);
        let p_reply = 0.1 + 0.2 * q;
        let p_like = 0.2 + 0.4 * q;
        let roll: f64 = rng.gen();
        if roll < p_reply {
            EngagementKind::Reply
        } else if roll < p_reply + p_like {
            EngagementKind::Like
        } else {
            EngagementKind::Ignored
        }
    }
}

impl PerceptionFeed for CommunityFeed {
    fn fetch_context(&self, agent: &AgentId) -> Vec<Snippet> {
        let mut snippets: Vec<Snippet> = match self.store.community_items(self.window) {
            Ok(items) => items
                .into_iter()
                .filter(|item| &item.agent != agent)
                .map(|item| {
                    Snippet::new(item.id, item.body)
                        .by(item.agent)
                        .with_quality(item.score.total)
                })
                .collect(),
            Err(e) => {
                tracing::warn!("community feed unavailable: {}", e);
                Vec::new()
            }
        };
        snippets.extend(self.bootstrap.iter().cloned());
        snippets
    }

    fn engagement(&self, agent: &AgentId) -> Vec<EngagementKind> {
        let items = match self.store.recent_items(agent, self.window) {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!("engagement lookup failed for {}: {}", agent, e);
                return Vec::new();
            }
        };
        let Ok(mut judged) = self.judged.lock() else {
            return Vec::new();
        };
        items
            .iter()
            .rev()
            .filter(|item| judged.insert(item.id.clone()))
            .map(|item| self.roll(&item.id, item.score.total))
            .collect()
    }
}
