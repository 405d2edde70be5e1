//! Daily Quota Types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::content::AgentId;
use crate::timestamp::VirtualDay;

/// Kinds of publishing action an agent can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Post,
    Comment,
}

impl ActionKind {
    /// The alternative kind tried when this one is exhausted.
    pub fn other(self) -> Self {
        match self {
            ActionKind::Post => ActionKind::Comment,
            ActionKind::Comment => ActionKind::Post,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Post => write!(f, "post"),
            ActionKind::Comment => write!(f, "comment"),
        }
    }
}

/// Configured daily maxima per action kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaLimits {
    pub post: u32,
    pub comment: u32,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self { post: 1, comment: 2 }
    }
}

impl QuotaLimits {
    pub fn limit(&self, kind: ActionKind) -> u32 {
        match kind {
            ActionKind::Post => self.post,
            ActionKind::Comment => self.comment,
        }
    }
}

/// Remaining actions for one agent on one virtual day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaCounter {
    pub agent: AgentId,
    pub day: VirtualDay,
    pub post_remaining: u32,
    pub comment_remaining: u32,
}

impl QuotaCounter {
    /// A counter at the configured maxima.
    pub fn fresh(agent: AgentId, day: VirtualDay, limits: &QuotaLimits) -> Self {
        Self {
            agent,
            day,
            post_remaining: limits.post,
            comment_remaining: limits.comment,
        }
    }

    pub fn remaining(&self, kind: ActionKind) -> u32 {
        match kind {
            ActionKind::Post => self.post_remaining,
            ActionKind::Comment => self.comment_remaining,
        }
    }

    /// Decrements the counter for `kind`. Returns false, leaving the
    /// counter untouched, when nothing remains.
    pub fn consume(&mut self, kind: ActionKind) -> bool {
        let slot = match kind {
            ActionKind::Post => &mut self.post_remaining,
            ActionKind::Comment => &mut self.comment_remaining,
        };
        match slot.checked_sub(1) {
            Some(left) => {
                *slot = left;
                true
            }
            None => false,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.post_remaining == 0 && self.comment_remaining == 0
    }
}
