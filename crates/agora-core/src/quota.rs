//! Daily quota ledger.
//!
//! Thin policy layer over the store: counters are keyed by (agent, day),
//! created lazily at the configured maxima, and only ever decremented by
//! an atomic store operation. A committed action and its consumption are
//! the same operation, so a crash between the two cannot happen.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use agora_events::{ActionKind, AgentId, PublishedItem, QuotaCounter, QuotaLimits, VirtualDay};

use crate::error::StoreError;
use crate::store::Store;

pub struct QuotaLedger {
    store: Arc<dyn Store>,
    limits: QuotaLimits,
    /// Day each agent's counters were last read on.
    current_day: Mutex<HashMap<AgentId, VirtualDay>>,
}

impl QuotaLedger {
    pub fn new(store: Arc<dyn Store>, limits: QuotaLimits) -> Self {
        Self {
            store,
            limits,
            current_day: Mutex::new(HashMap::new()),
        }
    }

    pub fn limits(&self) -> &QuotaLimits {
        &self.limits
    }

    /// Moves the agent onto `day`, creating a fresh counter when the day
    /// changed. Returns true on a change. Must run before any read for the
    /// agent in a tick.
    pub fn reset_if_new_day(&self, agent: &AgentId, day: VirtualDay) -> Result<bool, StoreError> {
        let changed = {
            let mut current = self.current_day.lock().map_err(|_| StoreError::Poisoned)?;
            match current.insert(agent.clone(), day) {
                Some(previous) if previous >= day => {
                    current.insert(agent.clone(), previous);
                    false
                }
                _ => true,
            }
        };
        if changed {
            let counter = self.store.quota(agent, day, &self.limits)?;
            tracing::debug!(
                "{} quota for {}: post={} comment={}",
                agent,
                day,
                counter.post_remaining,
                counter.comment_remaining
            );
        }
        Ok(changed)
    }

    /// The agent's current day; the latest day passed to `reset_if_new_day`.
    pub fn current_day(&self, agent: &AgentId) -> Option<VirtualDay> {
        self.current_day
            .lock()
            .ok()
            .and_then(|current| current.get(agent).copied())
    }

    fn day_for(&self, agent: &AgentId) -> VirtualDay {
        self.current_day(agent).unwrap_or_default()
    }

    pub fn remaining(&self, agent: &AgentId, kind: ActionKind) -> Result<u32, StoreError> {
        let counter = self.get_quota(agent, self.day_for(agent))?;
        Ok(counter.remaining(kind))
    }

    pub fn try_consume(&self, agent: &AgentId, kind: ActionKind) -> Result<bool, StoreError> {
        self.store
            .try_consume(agent, self.day_for(agent), kind, &self.limits)
    }

    pub fn get_quota(&self, agent: &AgentId, day: VirtualDay) -> Result<QuotaCounter, StoreError> {
        self.store.quota(agent, day, &self.limits)
    }

    /// Stores `item` and consumes its quota in one step. `None` means the
    /// quota was gone by the time of the commit.
    pub fn commit(&self, item: PublishedItem) -> Result<Option<PublishedItem>, StoreError> {
        self.store.commit_action(item, &self.limits)
    }
}
