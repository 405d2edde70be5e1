//! Content Types
//!
//! Agents, personas, drafts, published items and engagement signals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::quota::ActionKind;
use crate::timestamp::VirtualDay;

/// Stable identity of an agent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        AgentId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        AgentId(value.to_string())
    }
}

/// Generates a sequential published-item ID.
pub fn generate_item_id(sequence: u64) -> String {
    format!("item_{:08}", sequence)
}

/// A piece of community content seen while browsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub id: String,
    /// Author handle; `None` for anonymous content.
    #[serde(default)]
    pub author: Option<AgentId>,
    pub body: String,
    /// Quality score attached by whoever published it, 0 for humans.
    #[serde(default)]
    pub quality: f64,
    #[serde(default)]
    pub likes: u32,
    #[serde(default)]
    pub replies: u32,
}

impl Snippet {
    pub fn new(id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            author: None,
            body: body.into(),
            quality: 0.0,
            likes: 0,
            replies: 0,
        }
    }

    pub fn by(mut self, author: AgentId) -> Self {
        self.author = Some(author);
        self
    }

    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_engagement(mut self, likes: u32, replies: u32) -> Self {
        self.likes = likes;
        self.replies = replies;
        self
    }

    /// Content that stands out: a well-scored item or one with traction.
    pub fn is_high_signal(&self) -> bool {
        self.quality >= 0.7 || self.likes + self.replies >= 3
    }

    /// Ranking key for high-signal sampling.
    pub fn signal_strength(&self) -> f64 {
        self.quality + (self.likes + self.replies) as f64 * 0.1
    }
}

/// A candidate text produced during one decision attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    /// Position among the candidates; used for tie-breaking.
    pub index: usize,
    pub text: String,
    /// False when the text failed structural validation.
    pub valid: bool,
}

impl Draft {
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
            valid: true,
        }
    }

    pub fn malformed(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
            valid: false,
        }
    }
}

/// Score breakdown for one draft.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CompositeScore {
    pub quality: f64,
    pub persona_consistency: f64,
    pub emotion_alignment: f64,
    pub diversity_penalty: f64,
    /// Weighted total after the penalty.
    pub total: f64,
}

impl CompositeScore {
    /// The zero score given to malformed drafts.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Total before the diversity penalty was subtracted.
    pub fn raw_total(&self) -> f64 {
        self.total + self.diversity_penalty
    }
}

/// A committed post or comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedItem {
    pub id: String,
    pub agent: AgentId,
    pub kind: ActionKind,
    pub body: String,
    /// Snippet replied to, for comments.
    #[serde(default)]
    pub parent_id: Option<String>,
    pub day: VirtualDay,
    pub score: CompositeScore,
    pub created_at: DateTime<Utc>,
}

/// Persona text: a fixed seed plus accumulated rumination patches.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Persona {
    pub seed: String,
    #[serde(default)]
    pub patches: Vec<String>,
}

impl Persona {
    pub fn new(seed: impl Into<String>) -> Self {
        Self {
            seed: seed.into(),
            patches: Vec::new(),
        }
    }

    /// Full persona text as shown to the generator.
    pub fn render(&self) -> String {
        let mut text = self.seed.clone();
        for patch in &self.patches {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(patch);
        }
        text
    }

    /// Appends a patch, truncated to `max_patch_chars`, then drops the
    /// oldest patches until the rendered text fits `max_len` chars. A seed
    /// longer than `max_len` is clipped to it first.
    /// Returns the patch actually applied, if any.
    pub fn apply_patch(
        &mut self,
        patch: &str,
        max_patch_chars: usize,
        max_len: usize,
    ) -> Option<String> {
        let trimmed: String = patch.trim().chars().take(max_patch_chars).collect();
        let trimmed = trimmed.trim().to_string();
        if trimmed.is_empty() {
            return None;
        }
        if self.seed.chars().count() > max_len {
            self.seed = self.seed.chars().take(max_len).collect();
        }
        self.patches.push(trimmed.clone());
        while self.render().chars().count() > max_len && !self.patches.is_empty() {
            self.patches.remove(0);
        }
        if self.patches.last() == Some(&trimmed) {
            Some(trimmed)
        } else {
            None
        }
    }
}

/// How the community responded to an agent's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementKind {
    Like,
    Reply,
    Ignored,
}

/// Per-day engagement counts for one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EngagementTally {
    pub likes: u32,
    pub replies: u32,
    pub ignored: u32,
}

impl EngagementTally {
    pub fn record(&mut self, kind: EngagementKind) {
        match kind {
            EngagementKind::Like => self.likes += 1,
            EngagementKind::Reply => self.replies += 1,
            EngagementKind::Ignored => self.ignored += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.likes + self.replies + self.ignored
    }

    /// Positive minus ignored, in [-1, 1]; 0 with no signal.
    pub fn balance(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        (self.likes + self.replies) as f64 / total as f64 * 2.0 - 1.0
    }
}
